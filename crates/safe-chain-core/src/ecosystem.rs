//! The ecosystem router (C6) and the concrete npm/PyPI interceptor wiring
//! that plugs the URL parsers (C3), the oracle (C2), and the npm rewriter
//! (C4) into the interceptor builder (C5).

use crate::interceptor::Interceptor;
use crate::interceptor::InterceptionContext;
use crate::interceptor::intercept_requests;
use crate::npm_rewrite::RewritePolicy;
use crate::npm_rewrite::coerce_accept_header;
use crate::npm_rewrite::rewrite_packument;
use crate::npm_url;
use crate::oracle::MalwareOracle;
use crate::policy::normalize_host;
use crate::pypi_url;
use crate::state::ProxyState;
use std::sync::Arc;
use time::OffsetDateTime;
use url::Url;

/// Which package ecosystem this run's proxy is guarding. Set once at
/// startup by the wrapper binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ecosystem {
    Js,
    Py,
}

const NPM_HOSTS: &[&str] = &["registry.npmjs.org", "registry.yarnpkg.com"];
const PYPI_HOSTS: &[&str] = &[
    "files.pythonhosted.org",
    "pypi.org",
    "pypi.python.org",
    "pythonhosted.org",
];

fn matches_npm_host(host: &str) -> bool {
    NPM_HOSTS.contains(&host)
}

fn matches_pypi_host(host: &str) -> bool {
    PYPI_HOSTS.contains(&host)
}

/// Dispatches a CONNECT target host to the right [`Interceptor`], or `None`
/// if it should be blind-tunnelled (spec §4.5).
pub struct EcosystemRouter {
    ecosystem: Ecosystem,
    npm: Interceptor,
    pypi: Interceptor,
}

impl EcosystemRouter {
    pub fn new(ecosystem: Ecosystem, npm: Interceptor, pypi: Interceptor) -> Self {
        Self { ecosystem, npm, pypi }
    }

    pub fn interceptor_for_host(&self, host: &str) -> Option<&Interceptor> {
        let host = normalize_host(host);
        match self.ecosystem {
            Ecosystem::Js if matches_npm_host(&host) => Some(&self.npm),
            Ecosystem::Py if matches_pypi_host(&host) => Some(&self.pypi),
            _ => None,
        }
    }
}

/// Builds the npm interceptor: blocks known-malicious tarballs, leaves
/// special `/-/` endpoints untouched, and wires the minimum-age rewriter
/// onto packument (metadata) responses.
pub fn build_npm_interceptor(
    oracle: Arc<dyn MalwareOracle>,
    rewrite_policy: Arc<RewritePolicy>,
    state: Arc<ProxyState>,
) -> Interceptor {
    intercept_requests(vec![move |ctx: &mut InterceptionContext| {
        let Some(path) = request_path(ctx.target_url()) else {
            return;
        };
        match npm_url::classify(&path) {
            npm_url::NpmUrlKind::Tarball => {
                if let Some((name, version)) = npm_url::parse_tarball(&path)
                    && oracle.is_malware(&name, &version)
                {
                    ctx.block_malware(&name, &version);
                }
            }
            npm_url::NpmUrlKind::Special => {}
            npm_url::NpmUrlKind::Metadata => {
                ctx.modify_request_headers(coerce_accept_header);
                let policy = rewrite_policy.clone();
                let state = state.clone();
                ctx.modify_body(move |body, headers| {
                    let outcome = rewrite_packument(&body, headers, OffsetDateTime::now_utc(), &policy);
                    if outcome.suppressed {
                        state.mark_suppressed_versions();
                    }
                    outcome.body
                });
            }
        }
    }])
}

/// Builds the PyPI interceptor: blocks known-malicious wheels/sdists; no
/// response body is ever modified (spec §4.2.2, scenario S3).
pub fn build_pypi_interceptor(oracle: Arc<dyn MalwareOracle>) -> Interceptor {
    intercept_requests(vec![move |ctx: &mut InterceptionContext| {
        let Some(path) = request_path(ctx.target_url()) else {
            return;
        };
        if let Some((name, version)) = pypi_url::parse(&path)
            && oracle.is_malware(&name, &version)
        {
            ctx.block_malware(&name, &version);
        }
    }])
}

/// Extracts the path component (query/fragment stripped, per spec §4.2) from
/// a full `https://host/path?query` target URL.
fn request_path(target_url: &str) -> Option<String> {
    Url::parse(target_url).ok().map(|u| u.path().to_string())
}
