//! User-facing output: the pre-scan rejection list (step 3) and the
//! end-of-run summary (step 5) spec §4.8 describes.

use safe_chain_core::AuditSnapshot;
use safe_chain_core::BlockedRequest;
use safe_chain_core::DisallowedChange;

/// Printed when the pre-scan finds disallowed changes; the child is never
/// spawned in this case.
pub fn print_disallowed_changes(disallowed: &[DisallowedChange]) {
    println!("safe-chain: blocked {} disallowed package change(s):", disallowed.len());
    for change in disallowed {
        println!(
            "  - {}@{}: {}",
            change.change.name, change.change.version, change.reason
        );
    }
}

/// Printed after the child exits. If the proxy blocked any malware during
/// the run, that list takes precedence over the audit summary per spec
/// §4.8 step 5.
pub fn print_run_summary(
    blocked_requests: &[BlockedRequest],
    audit: AuditSnapshot,
    has_suppressed_versions: bool,
) {
    if !blocked_requests.is_empty() {
        println!(
            "safe-chain: blocked {} malicious request(s) during this run:",
            blocked_requests.len()
        );
        for request in blocked_requests {
            println!(
                "  - {}@{} ({})",
                request.package_name, request.version, request.url
            );
        }
        return;
    }

    println!(
        "safe-chain: pre-scan checked {} change(s) ({} safe, {} flagged)",
        audit.total, audit.safe, audit.malware
    );
    if has_suppressed_versions {
        println!(
            "safe-chain: some package versions were hidden for being younger than the minimum age threshold"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safe_chain_core::ChangeType;
    use safe_chain_core::PackageChange;

    #[test]
    fn print_disallowed_changes_does_not_panic() {
        print_disallowed_changes(&[DisallowedChange {
            change: PackageChange {
                name: "malicious".to_string(),
                version: "1.0.0".to_string(),
                change_type: ChangeType::Add,
            },
            reason: "malicious@1.0.0 is a known-malicious package".to_string(),
        }]);
    }

    #[test]
    fn print_run_summary_does_not_panic() {
        print_run_summary(&[], AuditSnapshot { total: 2, safe: 2, malware: 0 }, true);
    }
}
