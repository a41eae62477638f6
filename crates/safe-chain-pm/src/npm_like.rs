//! Shared recognizer for npm, pnpm, and yarn: all three accept
//! `<tool> (install|add|i) <pkg>@<version> ...` for adding a pinned
//! dependency, which is the only shape we bother pre-scanning.

use crate::PackageManager;
use crate::split_name_version;
use async_trait::async_trait;
use safe_chain_core::ChangeType;
use safe_chain_core::Ecosystem;
use safe_chain_core::PackageChange;

const ADD_SUBCOMMANDS: &[&str] = &["install", "i", "add"];

#[derive(Debug, Clone, Copy)]
pub struct NpmLike {
    name: &'static str,
}

impl NpmLike {
    pub const fn npm() -> Self {
        Self { name: "npm" }
    }

    pub const fn pnpm() -> Self {
        Self { name: "pnpm" }
    }

    pub const fn yarn() -> Self {
        Self { name: "yarn" }
    }
}

#[async_trait]
impl PackageManager for NpmLike {
    fn name(&self) -> &'static str {
        self.name
    }

    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Js
    }

    fn is_supported_command(&self, argv: &[String]) -> bool {
        pinned_package_tokens(argv).next().is_some()
    }

    async fn dependency_updates_for_command(
        &self,
        argv: &[String],
    ) -> anyhow::Result<Vec<PackageChange>> {
        Ok(pinned_package_tokens(argv)
            .filter_map(|token| split_name_version(token, "@"))
            .map(|(name, version)| PackageChange {
                name: name.to_string(),
                version: version.to_string(),
                change_type: ChangeType::Add,
            })
            .collect())
    }
}

/// Positional arguments after an `install`/`add`/`i` subcommand that
/// themselves contain an `@version` pin. Bare package names (`npm install
/// lodash`, which installs whatever `latest` resolves to at request time)
/// are left for the proxy's packument rewriter/oracle to catch on the wire
/// — this pre-scan only catches the "developer pinned a known-bad version
/// up front" case.
fn pinned_package_tokens(argv: &[String]) -> impl Iterator<Item = &str> {
    let mut rest = argv.iter();
    let is_add_subcommand = rest.by_ref().any(|arg| ADD_SUBCOMMANDS.contains(&arg.as_str()));
    rest.filter(move |_| is_add_subcommand)
        .map(String::as_str)
        .filter(|arg| !arg.starts_with('-'))
        .filter(|arg| arg.rfind('@').is_some_and(|idx| idx > 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn npm_install_pinned_version_is_supported() {
        let npm = NpmLike::npm();
        let args = argv(&["npm", "install", "malicious-package@1.0.0"]);
        assert!(npm.is_supported_command(&args));
        let changes = npm.dependency_updates_for_command(&args).await.unwrap();
        assert_eq!(
            changes,
            vec![PackageChange {
                name: "malicious-package".to_string(),
                version: "1.0.0".to_string(),
                change_type: ChangeType::Add,
            }]
        );
    }

    #[tokio::test]
    async fn yarn_add_scoped_package_is_parsed() {
        let yarn = NpmLike::yarn();
        let args = argv(&["yarn", "add", "@babel/core@7.22.0"]);
        let changes = yarn.dependency_updates_for_command(&args).await.unwrap();
        assert_eq!(changes[0].name, "@babel/core");
        assert_eq!(changes[0].version, "7.22.0");
    }

    #[test]
    fn bare_install_with_no_args_is_unsupported() {
        let pnpm = NpmLike::pnpm();
        assert!(!pnpm.is_supported_command(&argv(&["pnpm", "install"])));
    }

    #[test]
    fn unpinned_package_name_is_unsupported() {
        let npm = NpmLike::npm();
        assert!(!npm.is_supported_command(&argv(&["npm", "install", "lodash"])));
    }

    #[test]
    fn non_install_subcommand_is_unsupported() {
        let npm = NpmLike::npm();
        assert!(!npm.is_supported_command(&argv(&["npm", "run", "build"])));
    }
}
