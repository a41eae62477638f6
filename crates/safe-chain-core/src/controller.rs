//! The proxy controller (C8): owns the listening socket, builds the
//! ecosystem router from an oracle and a rewrite policy, and exposes the
//! aggregate bookkeeping the wrapper orchestrator reads at shutdown.
//!
//! Lifecycle mirrors the teacher's `NetworkProxy`/`NetworkProxyHandle` split:
//! `start` binds an ephemeral loopback listener and returns a live
//! controller; `stop` aborts the listener task with a bounded grace period
//! so the wrapper's cleanup stage can never hang on it.

use crate::certs::ManagedMitmCa;
use crate::ecosystem::Ecosystem;
use crate::ecosystem::EcosystemRouter;
use crate::ecosystem::build_npm_interceptor;
use crate::ecosystem::build_pypi_interceptor;
use crate::mitm::MitmServices;
use crate::npm_rewrite::RewritePolicy;
use crate::oracle::MalwareOracle;
use crate::state::BlockedRequest;
use crate::state::ProxyState;
use crate::upstream::UpstreamClient;
use anyhow::Context as _;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Soft shutdown deadline per spec §4.7: long enough for an in-flight
/// connection to notice the abort, short enough that the wrapper's cleanup
/// stage never blocks on it.
const STOP_GRACE_PERIOD: Duration = Duration::from_millis(1000);

/// C8: lifecycle of the listening socket plus the aggregate state the
/// wrapper reads to compute its exit code and summary.
pub struct ProxyController {
    addr: SocketAddr,
    state: Arc<ProxyState>,
    serve_task: Option<JoinHandle<()>>,
}

impl ProxyController {
    /// Binds `127.0.0.1:0`, wires the npm/PyPI interceptors for `ecosystem`
    /// off the given oracle and rewrite policy, and starts serving. The OS
    /// assigns the port; read it back with [`ProxyController::port`].
    pub async fn start(
        ecosystem: Ecosystem,
        oracle: Arc<dyn MalwareOracle>,
        rewrite_policy: RewritePolicy,
    ) -> Result<Self> {
        let ca = ManagedMitmCa::load_or_create().context("load or create managed MITM CA")?;
        let state = Arc::new(ProxyState::new());
        let rewrite_policy = Arc::new(rewrite_policy);

        let npm = build_npm_interceptor(oracle.clone(), rewrite_policy, state.clone());
        let pypi = build_pypi_interceptor(oracle);
        let router = EcosystemRouter::new(ecosystem, npm, pypi);
        let upstream = UpstreamClient::from_env_proxy();

        let services = Arc::new(MitmServices {
            ca,
            router,
            upstream,
            state: state.clone(),
        });

        let bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let (addr, serve_task) = crate::mitm::serve(bind_addr, services)
            .await
            .context("start MITM proxy listener")?;

        Ok(Self {
            addr,
            state,
            serve_task: Some(serve_task),
        })
    }

    /// The OS-assigned loopback port the child should be pointed at.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `true` iff no malware was blocked during the run.
    pub fn verify_no_malicious_packages(&self) -> bool {
        self.state.verify_no_malicious_packages()
    }

    pub fn has_suppressed_versions(&self) -> bool {
        self.state.has_suppressed_versions()
    }

    pub fn blocked_requests(&self) -> Vec<BlockedRequest> {
        self.state.blocked_requests()
    }

    /// Abort the listener task, waiting up to [`STOP_GRACE_PERIOD`] for it to
    /// unwind before force-resolving so the wrapper's cleanup stage cannot
    /// hang.
    pub async fn stop(mut self) {
        let Some(serve_task) = self.serve_task.take() else {
            return;
        };
        serve_task.abort();
        if tokio::time::timeout(STOP_GRACE_PERIOD, serve_task)
            .await
            .is_err()
        {
            warn!("MITM proxy listener did not stop within the grace period; forcing shutdown");
        }
    }
}

impl Drop for ProxyController {
    /// Last-resort abort for a controller dropped without calling `stop`
    /// (e.g. an early `?`-propagated error in the wrapper). A bare `drop` of
    /// a `JoinHandle` does not abort its task, so without this the listener
    /// would keep running detached.
    fn drop(&mut self) {
        if let Some(serve_task) = self.serve_task.take() {
            serve_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::NeverMalware;

    #[tokio::test]
    async fn start_binds_loopback_ephemeral_port() {
        let controller = ProxyController::start(
            Ecosystem::Js,
            Arc::new(NeverMalware),
            RewritePolicy::default(),
        )
        .await
        .expect("controller should start");

        assert!(controller.addr().ip().is_loopback());
        assert_ne!(controller.port(), 0);
        assert!(controller.verify_no_malicious_packages());
        assert!(!controller.has_suppressed_versions());

        controller.stop().await;
    }
}
