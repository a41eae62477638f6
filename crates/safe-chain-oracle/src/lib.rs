//! A concrete [`MalwareOracle`] (C2) implementation: a JSON-file-backed
//! known-bad `(package, version)` database.
//!
//! Spec §1 treats the malware database loader as an external collaborator —
//! "we consume it as an oracle" — so this crate is deliberately the
//! simplest thing that satisfies the trait: load a flat JSON document once,
//! answer lookups from an in-memory map. There is no refresh, no network
//! fetch, no scoring; those are out of scope by design.

use anyhow::Context as _;
use anyhow::Result;
use safe_chain_core::MalwareOracle;
use serde::Deserialize;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use tracing::debug;
use tracing::warn;

const MALWARE_DB_FILE: &str = "malware-db.json";

/// Per-package entry: either every version is malicious (`"*"`) or a
/// specific set of known-bad versions.
#[derive(Debug, Clone, PartialEq, Eq)]
enum VersionRule {
    All,
    Versions(HashSet<String>),
}

/// Wire format for the malware database file: `{"name": ["1.0.0", "*"]}`.
/// A bare `"*"` entry in the version array blocks every version of that
/// package; anything else is matched by exact string.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct MalwareDbFile(HashMap<String, Vec<String>>);

/// A known-bad `(package, version)` lookup backed by an in-memory map
/// loaded once at startup.
#[derive(Debug, Default, Clone)]
pub struct JsonMalwareOracle {
    entries: HashMap<String, VersionRule>,
}

impl JsonMalwareOracle {
    /// An oracle with no known-bad entries. Useful for tests and for a
    /// missing/unreadable database file, where failing open (never blocking
    /// anything) is safer than failing the whole run.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: MalwareDbFile =
            serde_json::from_str(raw).context("failed to parse malware database JSON")?;
        let entries = file
            .0
            .into_iter()
            .map(|(name, versions)| {
                let rule = if versions.iter().any(|v| v == "*") {
                    VersionRule::All
                } else {
                    VersionRule::Versions(versions.into_iter().collect())
                };
                (name, rule)
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read malware database {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Loads the database at `<safe-chain-home>/malware-db.json`. A missing
    /// file is not fatal — it yields an empty oracle and a verbose log,
    /// since the proxy must still run even when no database has been
    /// provisioned yet. A *malformed* file is fatal, per spec §7's "missing
    /// CA material"-style startup failures: a corrupt database silently
    /// behaving as empty would be a worse failure mode than refusing to
    /// start.
    pub fn load_default() -> Result<Self> {
        let path = default_db_path()?;
        if !path.exists() {
            debug!("no malware database at {}; starting with an empty one", path.display());
            return Ok(Self::empty());
        }
        Self::load_from_path(&path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn default_db_path() -> Result<PathBuf> {
    let home = safe_chain_utils::find_safe_chain_home()
        .context("failed to resolve safe-chain home for malware database")?;
    Ok(home.join(MALWARE_DB_FILE))
}

impl MalwareOracle for JsonMalwareOracle {
    fn is_malware(&self, name: &str, version: &str) -> bool {
        match self.entries.get(name) {
            Some(VersionRule::All) => true,
            Some(VersionRule::Versions(versions)) => versions.contains(version),
            None => false,
        }
    }
}

/// Wraps another oracle to also log every hit at warn level, for visibility
/// in `--safe-chain-logging=verbose` runs without plumbing logging through
/// every call site that already holds an `Arc<dyn MalwareOracle>`.
pub struct LoggingMalwareOracle<O> {
    inner: O,
}

impl<O: MalwareOracle> LoggingMalwareOracle<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

impl<O: MalwareOracle> MalwareOracle for LoggingMalwareOracle<O> {
    fn is_malware(&self, name: &str, version: &str) -> bool {
        let flagged = self.inner.is_malware(name, version);
        if flagged {
            warn!("malware oracle flagged {name}@{version}");
        }
        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exact_version_match_is_malware() {
        let oracle =
            JsonMalwareOracle::from_json(r#"{"malicious-package": ["1.0.0"]}"#).unwrap();
        assert!(oracle.is_malware("malicious-package", "1.0.0"));
        assert!(!oracle.is_malware("malicious-package", "2.0.0"));
        assert!(!oracle.is_malware("lodash", "1.0.0"));
    }

    #[test]
    fn wildcard_version_blocks_every_version() {
        let oracle = JsonMalwareOracle::from_json(r#"{"evil": ["*"]}"#).unwrap();
        assert!(oracle.is_malware("evil", "0.0.1"));
        assert!(oracle.is_malware("evil", "99.99.99"));
    }

    #[test]
    fn empty_oracle_flags_nothing() {
        let oracle = JsonMalwareOracle::empty();
        assert!(!oracle.is_malware("anything", "1.0.0"));
        assert!(oracle.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = JsonMalwareOracle::from_json("not json").unwrap_err();
        assert!(err.to_string().contains("malware database"));
    }

    #[test]
    fn logging_oracle_delegates_verdict() {
        let inner = JsonMalwareOracle::from_json(r#"{"evil": ["*"]}"#).unwrap();
        let oracle = LoggingMalwareOracle::new(inner);
        assert!(oracle.is_malware("evil", "1.0.0"));
        assert!(!oracle.is_malware("good", "1.0.0"));
    }

    #[test]
    fn missing_db_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("SAFE_CHAIN_HOME", dir.path());
        }
        let oracle = JsonMalwareOracle::load_default().unwrap();
        assert!(oracle.is_empty());
        unsafe {
            std::env::remove_var("SAFE_CHAIN_HOME");
        }
    }

    #[test]
    fn load_counts_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("malware-db.json"),
            r#"{"evil": ["*"], "bad-pkg": ["1.0.0", "2.0.0"]}"#,
        )
        .unwrap();
        let oracle = JsonMalwareOracle::load_from_path(&dir.path().join("malware-db.json")).unwrap();
        assert_eq!(oracle.len(), 2);
    }
}
