//! Writes per-tool shim scripts into `<safe_chain_home>/shims/` for CI
//! setups that prepend a directory to `PATH` instead of invoking the
//! wrapper directly (spec §6 persisted-state layout, §1 non-goals: we only
//! *write* the shim files here, installation onto `PATH` stays an external
//! collaborator).

use anyhow::Context as _;
use anyhow::Result;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

const SHIMS_DIR: &str = "shims";
const JS_TOOLS: &[&str] = &["npm", "pnpm", "yarn"];
const PY_TOOLS: &[&str] = &["pip", "uv"];

/// Writes a shim for each JS package manager, and additionally for the
/// Python ones when `include_python` is set (`--include-python`).
pub fn write_shims(safe_chain_home: &Path, include_python: bool) -> Result<Vec<PathBuf>> {
    let shims_dir = safe_chain_home.join(SHIMS_DIR);
    fs::create_dir_all(&shims_dir)
        .with_context(|| format!("failed to create {}", shims_dir.display()))?;

    let mut tools: Vec<&str> = JS_TOOLS.to_vec();
    if include_python {
        tools.extend_from_slice(PY_TOOLS);
    }

    tools
        .into_iter()
        .map(|tool| write_shim(&shims_dir, tool))
        .collect()
}

fn write_shim(shims_dir: &Path, tool: &str) -> Result<PathBuf> {
    let path = shims_dir.join(tool);
    let script = format!("#!/bin/sh\nexec safe-chain {tool} \"$@\"\n");
    fs::write(&path, script).with_context(|| format!("failed to write shim {}", path.display()))?;
    set_executable(&path)?;
    Ok(path)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to chmod {}", path.display()))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
