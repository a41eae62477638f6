//! The wrapper orchestrator (C9): the `safe-chain <npm|pnpm|yarn|pip|uv> ...`
//! entry point that ties the proxy (C8), the package-manager adapters, and
//! the malware oracle together for a single wrapped invocation.
//!
//! Shape grounded on the teacher's `network-proxy-cli/src/main.rs`
//! (`#[tokio::main] async fn main()`, `tracing_subscriber` init, `clap`
//! parsing up front) generalized to the six-step flow spec §4.8 describes:
//! parse flags, resolve the package manager, pre-scan, start the proxy, run
//! the child, print a summary and tear down.

mod ca_bundle;
mod env;
mod flags;
mod logging;
mod shims;
mod summary;

use anyhow::Context as _;
use anyhow::Result;
use clap::Parser as _;
use safe_chain_core::AuditCounters;
use safe_chain_core::Ecosystem;
use safe_chain_core::MalwareOracle;
use safe_chain_core::ProxyController;
use safe_chain_core::RewritePolicy;
use safe_chain_core::SafeChainError;
use safe_chain_core::audit_changes;
use safe_chain_oracle::JsonMalwareOracle;
use safe_chain_oracle::LoggingMalwareOracle;
use safe_chain_pm::PackageManager;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing::warn;

/// How long the pre-scan stage is allowed to spend resolving dependency
/// updates before the wrapper gives up and fails closed (spec §4.8 step 3,
/// §7 "pre-scan timed out").
const PRE_SCAN_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> ExitCode {
    let log = logging::BufferedLog::new();
    let exit_code = match try_run(&log).await {
        Ok(code) => code,
        Err(err) => {
            warn!("{err:#}");
            eprintln!("safe-chain: {err:#}");
            1
        }
    };
    log.flush_to_stderr();
    ExitCode::from(exit_code)
}

async fn try_run(log: &logging::BufferedLog) -> Result<u8> {
    safe_chain_utils::ensure_rustls_crypto_provider();

    let raw_argv: Vec<String> = std::env::args().skip(1).collect();
    let (wrapper_tokens, child_argv) = flags::extract_wrapper_argv(&raw_argv);
    let wrapper_flags = flags::WrapperFlags::try_parse_from(wrapper_tokens)
        .context("failed to parse --safe-chain-* flags")?;

    logging::init(log, wrapper_flags.logging);

    if child_argv.is_empty() {
        anyhow::bail!("usage: safe-chain <npm|pnpm|yarn|pip|uv> [args...]");
    }

    let package_manager = safe_chain_pm::detect_by_basename(&child_argv[0]).with_context(|| {
        format!(
            "{} is not a recognized package manager (expected npm, pnpm, yarn, pip, or uv)",
            child_argv[0]
        )
    })?;
    let ecosystem = package_manager.ecosystem();
    info!(tool = package_manager.name(), "wrapping package manager invocation");

    let safe_chain_home = safe_chain_utils::find_safe_chain_home()
        .context("resolve safe-chain home directory")?;
    std::fs::create_dir_all(&safe_chain_home)
        .with_context(|| format!("failed to create {}", safe_chain_home.display()))?;
    shims::write_shims(&safe_chain_home, wrapper_flags.include_python)
        .context("write package-manager shims")?;

    let oracle: Arc<dyn MalwareOracle> = {
        let json_oracle = JsonMalwareOracle::load_default().context("load malware database")?;
        if wrapper_flags.logging == flags::LogLevel::Verbose {
            Arc::new(LoggingMalwareOracle::new(json_oracle))
        } else {
            Arc::new(json_oracle)
        }
    };

    let counters = AuditCounters::default();

    // Step 3 (spec §4.8): pre-scan before the proxy ever starts, so a
    // disallowed change never gets the chance to dial out.
    if package_manager.is_supported_command(&child_argv) {
        let changes = tokio::time::timeout(
            PRE_SCAN_TIMEOUT,
            package_manager.dependency_updates_for_command(&child_argv),
        )
        .await
        .map_err(|_| SafeChainError::PreScanTimeout(PRE_SCAN_TIMEOUT))?
        .context("pre-scan dependency resolution failed")?;

        let audit = audit_changes(&changes, oracle.as_ref(), &counters);
        if !audit.is_allowed() {
            summary::print_disallowed_changes(&audit.disallowed);
            return Ok(1);
        }
    }

    let rewrite_policy = RewritePolicy {
        minimum_package_age_hours: wrapper_flags.minimum_package_age_hours,
        skip: wrapper_flags.skip_minimum_package_age,
        ..Default::default()
    };

    // Step 2/4 (spec §4.8): start the proxy and point the child at it.
    let controller = ProxyController::start(ecosystem, oracle, rewrite_policy)
        .await
        .context("start MITM proxy")?;

    let run_result = run_child(&controller, &safe_chain_home, ecosystem, &child_argv, log).await;

    let blocked_requests = controller.blocked_requests();
    let has_suppressed_versions = controller.has_suppressed_versions();
    controller.stop().await;

    let child_exit_code = run_result?;

    // Step 5 (spec §4.8): the proxy's own blocked-malware list, if any,
    // takes precedence over the pre-scan audit counters and over the
    // child's own exit status.
    summary::print_run_summary(&blocked_requests, counters.snapshot(), has_suppressed_versions);
    if !blocked_requests.is_empty() {
        return Ok(1);
    }
    Ok(child_exit_code)
}

/// Builds the CA material and environment for the child, spawns it with
/// inherited stdio, and waits for it to exit. `log` is flushed on every
/// SIGINT/SIGTERM so our own lines never interleave with a long-lived
/// child's own terminal output.
async fn run_child(
    controller: &ProxyController,
    safe_chain_home: &std::path::Path,
    ecosystem: Ecosystem,
    child_argv: &[String],
    log: &logging::BufferedLog,
) -> Result<u8> {
    let (root_ca_path, _root_ca_pem) =
        safe_chain_core::ensure_root_ca().context("resolve safe-chain root CA")?;
    let ca_bundle_path =
        ca_bundle::build_and_write(safe_chain_home).context("build CA bundle")?;

    let caller_env: HashMap<String, String> = std::env::vars().collect();
    let child_env = env::build_child_env(
        controller.port(),
        &root_ca_path,
        &ca_bundle_path,
        ecosystem,
        &caller_env,
    )
    .context("build child environment")?;

    let mut command = tokio::process::Command::new(&child_argv[0]);
    command.args(&child_argv[1..]);
    for stale_key in &child_env.stale_case_variants {
        command.env_remove(stale_key);
    }
    command.envs(&child_env.vars);

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {}", child_argv[0]))?;

    let status = wait_with_signal_flush(&mut child, log).await?;
    drop(child_env.pip_config_guard);
    Ok(status)
}

#[cfg(unix)]
async fn wait_with_signal_flush(
    child: &mut tokio::process::Child,
    log: &logging::BufferedLog,
) -> Result<u8> {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.context("failed to wait for child process")?;
                return Ok(exit_code_of(status));
            }
            _ = sigint.recv() => {
                log.flush_to_stderr();
            }
            _ = sigterm.recv() => {
                log.flush_to_stderr();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_with_signal_flush(
    child: &mut tokio::process::Child,
    _log: &logging::BufferedLog,
) -> Result<u8> {
    let status = child.wait().await.context("failed to wait for child process")?;
    Ok(exit_code_of(status))
}

/// A child killed by a signal rather than exiting normally has no exit
/// code; spec §6 says an abnormal child termination should still surface as
/// a failure, so that case maps to 1 rather than 0.
fn exit_code_of(status: std::process::ExitStatus) -> u8 {
    status.code().map(|code| code as u8).unwrap_or(1)
}
