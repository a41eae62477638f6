#![deny(clippy::print_stdout, clippy::print_stderr)]

//! The safe-chain interception engine: dynamic leaf-certificate minting
//! (C1), registry URL parsing (C3), the npm packument age-filter (C4), the
//! interceptor builder (C5), the ecosystem router (C6), the MITM server
//! (C7), and the proxy controller (C8) that wraps them into one lifecycle.
//!
//! The wrapper orchestrator (C9) and the concrete package-manager/oracle
//! implementations live in sibling crates; this crate only depends on the
//! [`oracle::MalwareOracle`] trait boundary.

mod audit;
mod certs;
mod controller;
mod ecosystem;
mod errors;
mod interceptor;
mod mitm;
mod npm_rewrite;
mod npm_url;
pub mod oracle;
mod policy;
mod pypi_url;
mod responses;
mod state;
mod upstream;

pub use audit::AuditCounters;
pub use audit::AuditResult;
pub use audit::AuditSnapshot;
pub use audit::ChangeType;
pub use audit::DisallowedChange;
pub use audit::PackageChange;
pub use audit::audit_changes;
pub use certs::ensure_root_ca;
pub use controller::ProxyController;
pub use ecosystem::Ecosystem;
pub use errors::SafeChainError;
pub use interceptor::BlockResponse;
pub use interceptor::InterceptionContext;
pub use interceptor::InterceptionHandler;
pub use interceptor::Interceptor;
pub use interceptor::MalwareBlockedEvent;
pub use interceptor::intercept_requests;
pub use npm_rewrite::RewritePolicy;
pub use npm_rewrite::base_name as npm_base_name;
pub use npm_rewrite::rewrite_packument;
pub use npm_url::NpmUrlKind;
pub use npm_url::classify as classify_npm_url;
pub use npm_url::parse_tarball as parse_npm_tarball_url;
pub use oracle::MalwareOracle;
pub use oracle::NeverMalware;
pub use policy::normalize_host;
pub use pypi_url::parse as parse_pypi_url;
pub use responses::BLOCKED_BY_SAFE_CHAIN;
pub use state::BlockedRequest;
pub use state::ProxyState;
