//! Recognizer for `pip install pkg==version`. pip's CLI doesn't have an
//! `add` subcommand; only `install` (and its `-U`/`--upgrade` variants)
//! installs something new.

use crate::PackageManager;
use crate::split_name_version;
use async_trait::async_trait;
use safe_chain_core::ChangeType;
use safe_chain_core::Ecosystem;
use safe_chain_core::PackageChange;

#[derive(Debug, Clone, Copy, Default)]
pub struct Pip;

#[async_trait]
impl PackageManager for Pip {
    fn name(&self) -> &'static str {
        "pip"
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

fn pinned_package_tokens(argv: &[String]) -> impl Iterator<Item = &str> {
    let mut rest = argv.iter();
    let is_install = rest.by_ref().any(|arg| arg == "install");
    rest.filter(move |_| is_install)
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
    async fn pip_install_pinned_version_is_parsed() {
        let pip = Pip;
        let args = argv(&["pip", "install", "malicious==1.0.0"]);
        assert!(pip.is_supported_command(&args));
        let changes = pip.dependency_updates_for_command(&args).await.unwrap();
        assert_eq!(
            changes,
            vec![PackageChange {
                name: "malicious".to_string(),
                version: "1.0.0".to_string(),
                change_type: ChangeType::Add,
            }]
        );
    }

    #[test]
    fn unpinned_requirement_is_unsupported() {
        let pip = Pip;
        assert!(!pip.is_supported_command(&argv(&["pip", "install", "requests"])));
    }

    #[test]
    fn requirements_file_install_is_unsupported() {
        let pip = Pip;
        assert!(!pip.is_supported_command(&argv(&["pip", "install", "-r", "requirements.txt"])));
    }
}
