//! Proxy-wide bookkeeping (C8's aggregate state): the blocked-request list
//! and the suppressed-versions flag the wrapper prints in its summary.
//!
//! Per §5, these are process-wide and mutated concurrently from every
//! connection handler, so mutation is serialized behind a mutex rather than
//! left as ad hoc shared globals.

use crate::interceptor::MalwareBlockedEvent;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// One blocked request, per spec §3 Proxy state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedRequest {
    pub package_name: String,
    pub version: String,
    pub url: String,
}

impl From<MalwareBlockedEvent> for BlockedRequest {
    fn from(event: MalwareBlockedEvent) -> Self {
        Self {
            package_name: event.package_name,
            version: event.version,
            url: event.target_url,
        }
    }
}

/// `{blockedRequests, hasSuppressedVersions}` plus the port the controller
/// fills in once bound. Single-writer via the event bus; read freely at
/// shutdown.
#[derive(Debug, Default)]
pub struct ProxyState {
    blocked_requests: Mutex<Vec<BlockedRequest>>,
    has_suppressed_versions: AtomicBool,
}

impl ProxyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_blocked(&self, request: BlockedRequest) {
        self.blocked_requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request);
    }

    pub fn blocked_requests(&self) -> Vec<BlockedRequest> {
        self.blocked_requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn mark_suppressed_versions(&self) {
        self.has_suppressed_versions.store(true, Ordering::Relaxed);
    }

    pub fn has_suppressed_versions(&self) -> bool {
        self.has_suppressed_versions.load(Ordering::Relaxed)
    }

    /// `true` iff `blockedRequests` is empty.
    pub fn verify_no_malicious_packages(&self) -> bool {
        self.blocked_requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_no_malicious_packages_reflects_blocked_list() {
        let state = ProxyState::new();
        assert!(state.verify_no_malicious_packages());
        state.record_blocked(BlockedRequest {
            package_name: "malicious-package".to_string(),
            version: "1.0.0".to_string(),
            url: "https://registry.npmjs.org/malicious-package/-/malicious-package-1.0.0.tgz"
                .to_string(),
        });
        assert!(!state.verify_no_malicious_packages());
        assert_eq!(state.blocked_requests().len(), 1);
    }

    #[test]
    fn suppressed_versions_flag_is_sticky() {
        let state = ProxyState::new();
        assert!(!state.has_suppressed_versions());
        state.mark_suppressed_versions();
        assert!(state.has_suppressed_versions());
    }
}
