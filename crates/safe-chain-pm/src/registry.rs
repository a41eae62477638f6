//! Dispatch of a wrapped command's argv[0] to the matching [`PackageManager`]
//! adapter, by basename so `/usr/bin/npm`, `npm.cmd`, and `npm` all match.

use crate::NpmLike;
use crate::PackageManager;
use crate::Pip;
use crate::Uv;
use std::sync::Arc;

pub fn all_package_managers() -> Vec<Arc<dyn PackageManager>> {
    vec![
        Arc::new(NpmLike::npm()),
        Arc::new(NpmLike::pnpm()),
        Arc::new(NpmLike::yarn()),
        Arc::new(Pip),
        Arc::new(Uv),
    ]
}

/// Resolves argv[0] (e.g. `/usr/local/bin/npm` or `npm.cmd`) to its adapter.
pub fn detect_by_basename(argv0: &str) -> Option<Arc<dyn PackageManager>> {
    let basename = basename_without_extension(argv0);
    all_package_managers()
        .into_iter()
        .find(|pm| pm.name() == basename)
}

fn basename_without_extension(path: &str) -> &str {
    let basename = path.rsplit(['/', '\\']).next().unwrap_or(path);
    basename
        .strip_suffix(".cmd")
        .or_else(|| basename.strip_suffix(".exe"))
        .or_else(|| basename.strip_suffix(".ps1"))
        .unwrap_or(basename)
}
