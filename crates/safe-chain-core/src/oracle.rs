//! The malware oracle boundary (C2 in the design).
//!
//! The oracle itself — how the malware database is loaded, refreshed, and
//! queried — is an external collaborator per the system scope. Everything in
//! this crate only needs `isMalware(name, version) -> bool`, so that's the
//! entire trait.

/// Answers whether a `(package, version)` pair is known-malicious.
///
/// Implementations must be cheap to call repeatedly and safe to share across
/// concurrent requests; a request-handling path calls this once per parsed
/// tarball/wheel/sdist URL and once per `PackageChange` during a pre-scan.
pub trait MalwareOracle: Send + Sync {
    fn is_malware(&self, name: &str, version: &str) -> bool;
}

/// An oracle that never flags anything. Useful for tests and for ecosystems
/// that have no interceptor wired (the router already keeps those requests
/// out of the MITM path entirely, but this keeps call sites total).
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverMalware;

impl MalwareOracle for NeverMalware {
    fn is_malware(&self, _name: &str, _version: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_malware_is_always_clean() {
        assert!(!NeverMalware.is_malware("left-pad", "1.0.0"));
    }
}
