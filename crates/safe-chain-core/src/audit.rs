//! Pre-scan bookkeeping: turning a dependency-update resolver's output into
//! an allow/deny verdict, and the process-wide counters the wrapper prints
//! in its summary.

use crate::oracle::MalwareOracle;
use serde::Deserialize;
use serde::Serialize;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Change,
    Remove,
}

/// A single dependency-graph edit reported by a package-manager adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageChange {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
}

/// A disallowed change, tagged with the reason it was flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisallowedChange {
    #[serde(flatten)]
    pub change: PackageChange,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditResult {
    pub allowed: Vec<PackageChange>,
    pub disallowed: Vec<DisallowedChange>,
}

impl AuditResult {
    /// `isAllowed ⇔ disallowed = ∅`.
    pub fn is_allowed(&self) -> bool {
        self.disallowed.is_empty()
    }
}

/// Audit every proposed change against the oracle.
///
/// `remove`-type changes don't consult the oracle and don't move the
/// counters: uninstalling a package can never introduce malware onto disk.
pub fn audit_changes(
    changes: &[PackageChange],
    oracle: &dyn MalwareOracle,
    counters: &AuditCounters,
) -> AuditResult {
    let mut result = AuditResult::default();
    for change in changes {
        if change.change_type == ChangeType::Remove {
            result.allowed.push(change.clone());
            continue;
        }

        counters.total.fetch_add(1, Ordering::Relaxed);
        if oracle.is_malware(&change.name, &change.version) {
            counters.malware.fetch_add(1, Ordering::Relaxed);
            result.disallowed.push(DisallowedChange {
                change: change.clone(),
                reason: format!(
                    "{}@{} is a known-malicious package",
                    change.name, change.version
                ),
            });
        } else {
            counters.safe.fetch_add(1, Ordering::Relaxed);
            result.allowed.push(change.clone());
        }
    }
    result
}

/// Process-wide `{total, safe, malware}` triple. Monotonically
/// non-decreasing during a run; a fresh instance is created per process.
#[derive(Debug, Default)]
pub struct AuditCounters {
    total: AtomicU64,
    safe: AtomicU64,
    malware: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditSnapshot {
    pub total: u64,
    pub safe: u64,
    pub malware: u64,
}

impl AuditCounters {
    pub fn snapshot(&self) -> AuditSnapshot {
        AuditSnapshot {
            total: self.total.load(Ordering::Relaxed),
            safe: self.safe.load(Ordering::Relaxed),
            malware: self.malware.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::NeverMalware;
    use pretty_assertions::assert_eq;

    struct FlagsByName<'a>(&'a [&'a str]);

    impl MalwareOracle for FlagsByName<'_> {
        fn is_malware(&self, name: &str, _version: &str) -> bool {
            self.0.contains(&name)
        }
    }

    fn change(name: &str, version: &str, change_type: ChangeType) -> PackageChange {
        PackageChange {
            name: name.to_string(),
            version: version.to_string(),
            change_type,
        }
    }

    #[test]
    fn remove_changes_skip_the_oracle_and_counters() {
        let counters = AuditCounters::default();
        let changes = vec![change("left-pad", "1.0.0", ChangeType::Remove)];
        let result = audit_changes(&changes, &FlagsByName(&["left-pad"]), &counters);
        assert!(result.is_allowed());
        assert_eq!(counters.snapshot(), AuditSnapshot { total: 0, safe: 0, malware: 0 });
    }

    #[test]
    fn malware_add_is_disallowed_and_counted() {
        let counters = AuditCounters::default();
        let changes = vec![change("malicious", "1.0.0", ChangeType::Add)];
        let result = audit_changes(&changes, &FlagsByName(&["malicious"]), &counters);
        assert!(!result.is_allowed());
        assert_eq!(result.disallowed.len(), 1);
        assert_eq!(counters.snapshot(), AuditSnapshot { total: 1, safe: 0, malware: 1 });
    }

    #[test]
    fn total_equals_safe_plus_malware() {
        let counters = AuditCounters::default();
        let changes = vec![
            change("lodash", "4.17.21", ChangeType::Add),
            change("malicious", "1.0.0", ChangeType::Change),
            change("left-pad", "1.0.0", ChangeType::Remove),
        ];
        audit_changes(&changes, &FlagsByName(&["malicious"]), &counters);
        let snap = counters.snapshot();
        assert_eq!(snap.total, snap.safe + snap.malware);
    }

    #[test]
    fn clean_changes_are_all_allowed() {
        let counters = AuditCounters::default();
        let changes = vec![change("lodash", "4.17.21", ChangeType::Add)];
        let result = audit_changes(&changes, &NeverMalware, &counters);
        assert!(result.is_allowed());
        assert_eq!(result.allowed.len(), 1);
    }
}
