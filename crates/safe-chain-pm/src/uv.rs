//! Recognizer for `uv add pkg==version` / `uv pip install pkg==version`.

use crate::PackageManager;
use crate::split_name_version;
use async_trait::async_trait;
use safe_chain_core::ChangeType;
use safe_chain_core::Ecosystem;
use safe_chain_core::PackageChange;

#[derive(Debug, Clone, Copy, Default)]
pub struct Uv;

#[async_trait]
impl PackageManager for Uv {
    fn name(&self) -> &'static str {
        "uv"
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Py
    }

    fn is_supported_command(&self, argv: &[String]) -> bool {
        pinned_package_tokens(argv).next().is_some()
    }

    async fn dependency_updates_for_command(
        &self,
        argv: &[String],
    ) -> anyhow::Result<Vec<PackageChange>> {
        Ok(pinned_package_tokens(argv)
            .filter_map(|token| split_name_version(token, "=="))
            .map(|(name, version)| PackageChange {
                name: name.to_string(),
                version: version.to_string(),
                change_type: ChangeType::Add,
            })
            .collect())
    }
}

/// `uv add pkg==version` or `uv pip install pkg==version` — either
/// subcommand form is accepted.
fn pinned_package_tokens(argv: &[String]) -> impl Iterator<Item = &str> {
    let mut rest = argv.iter();
    let is_add = rest
        .by_ref()
        .any(|arg| arg == "add" || arg == "install");
    rest.filter(move |_| is_add)
        .map(String::as_str)
        .filter(|arg| !arg.starts_with('-'))
        .filter(|arg| arg.contains("=="))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn uv_add_pinned_version_is_parsed() {
        let uv = Uv;
        let args = argv(&["uv", "add", "malicious==1.0.0"]);
        let changes = uv.dependency_updates_for_command(&args).await.unwrap();
        assert_eq!(changes[0].name, "malicious");
        assert_eq!(changes[0].version, "1.0.0");
    }

    #[tokio::test]
    async fn uv_pip_install_pinned_version_is_parsed() {
        let uv = Uv;
        let args = argv(&["uv", "pip", "install", "malicious==1.0.0"]);
        let changes = uv.dependency_updates_for_command(&args).await.unwrap();
        assert_eq!(changes[0].name, "malicious");
    }

    #[test]
    fn bare_uv_sync_is_unsupported() {
        let uv = Uv;
        assert!(!uv.is_supported_command(&argv(&["uv", "sync"])));
    }
}
