//! Package-manager adapters (C9's collaborators): the `PackageManager`
//! trait boundary the wrapper orchestrator pre-scans through, plus narrow,
//! best-effort recognizers for npm/pnpm/yarn/pip/uv.
//!
//! Spec §1 explicitly scopes full dependency-update resolution out of this
//! system ("per-package-manager dependency-update resolvers... only their
//! result shape is consumed"). These adapters exist so the orchestrator has
//! something to compile and test against; they parse the common
//! `install <pkg>@<version>` / `add <pkg>==<version>` invocations and fall
//! back to "no changes found" (never an error) for anything they don't
//! recognize — a real resolver would walk the full dependency graph, this
//! one only reads argv.

mod npm_like;
mod pip;
mod registry;
mod uv;

pub use npm_like::NpmLike;
pub use pip::Pip;
pub use registry::all_package_managers;
pub use registry::detect_by_basename;
pub use uv::Uv;

use async_trait::async_trait;
use safe_chain_core::Ecosystem;
use safe_chain_core::PackageChange;

/// The external collaborator boundary spec §4.8 describes: given the
/// wrapped child's argv, decide whether it's worth pre-scanning and, if so,
/// produce the `PackageChange`s it would apply.
#[async_trait]
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &'static str;

    /// Which registry ecosystem this tool's proxy should guard.
    fn ecosystem(&self) -> Ecosystem;

    /// Whether `argv` (after the wrapper's own `--safe-chain-*` flags have
    /// been stripped) is a command this adapter knows how to pre-scan.
    fn is_supported_command(&self, argv: &[String]) -> bool;

    /// Best-effort `PackageChange`s for a supported command. Only called
    /// when `is_supported_command` returned `true`.
    async fn dependency_updates_for_command(
        &self,
        argv: &[String],
    ) -> anyhow::Result<Vec<PackageChange>>;
}

/// Splits a `pkg@version`/`pkg==version` token into `(name, version)`.
/// Scoped npm packages (`@babel/core@7.22.0`) have their own leading `@`,
/// so the split point is the *last* occurrence of the separator, not the
/// first.
pub(crate) fn split_name_version<'a>(
    token: &'a str,
    separator: &str,
) -> Option<(&'a str, &'a str)> {
    let idx = token.rfind(separator)?;
    let (name, version) = (&token[..idx], &token[idx + separator.len()..]);
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name, version))
}
