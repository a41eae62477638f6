//! Environment wiring for the wrapped child process (spec §6 "Environment
//! variables set for the child").
//!
//! Grounded on the teacher's `apply_proxy_env_overrides`/`set_env_keys`
//! shape in `network-proxy/src/proxy.rs`: a flat `HashMap<String, String>`
//! built up by inserting canonical keys, with the rule that the managed
//! values always override whatever the caller's own environment supplied
//! (a script-level `HTTPS_PROXY` cannot be used to route around us).

use anyhow::Context as _;
use anyhow::Result;
use safe_chain_core::Ecosystem;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

/// Deletes the freshly materialized `PIP_CONFIG_FILE` temp file when the
/// wrapper run ends, regardless of exit path.
pub struct PipConfigGuard {
    path: PathBuf,
}

impl Drop for PipConfigGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The environment to apply to the child process, plus an optional guard
/// whose lifetime must outlive the child (it owns the materialized pip
/// config temp file).
pub struct ChildEnv {
    pub vars: HashMap<String, String>,
    pub pip_config_guard: Option<PipConfigGuard>,
    /// Case-variant spellings of `vars`' keys already present in the
    /// caller's environment (e.g. `https_proxy` when we're about to set
    /// `HTTPS_PROXY`) that must be unset on the child's process builder, not
    /// just shadowed, since env vars differing only by case coexist rather
    /// than overwrite on Unix. See [`build_child_env`].
    pub stale_case_variants: Vec<String>,
}

/// Builds the environment overrides for `ecosystem`'s child process.
///
/// `port` is the proxy's loopback port, `root_ca_path` the safe-chain root
/// certificate (for Node's `NODE_EXTRA_CA_CERTS`), `ca_bundle_path` the
/// combined bundle (for Python's cert env vars), and `caller_env` the
/// process's inherited environment — consulted to merge a pre-existing
/// `PIP_CONFIG_FILE` and to flag stale case-variant spellings of the
/// managed keys, but never mutated in place.
pub fn build_child_env(
    port: u16,
    root_ca_path: &Path,
    ca_bundle_path: &Path,
    ecosystem: Ecosystem,
    caller_env: &HashMap<String, String>,
) -> Result<ChildEnv> {
    let proxy_url = format!("http://localhost:{port}");
    let mut vars = HashMap::new();

    vars.insert("HTTPS_PROXY".to_string(), proxy_url.clone());
    vars.insert("GLOBAL_AGENT_HTTP_PROXY".to_string(), proxy_url.clone());
    vars.insert(
        "NODE_EXTRA_CA_CERTS".to_string(),
        root_ca_path.display().to_string(),
    );

    let mut pip_config_guard = None;
    if ecosystem == Ecosystem::Py {
        let bundle = ca_bundle_path.display().to_string();
        vars.insert("SSL_CERT_FILE".to_string(), bundle.clone());
        vars.insert("REQUESTS_CA_BUNDLE".to_string(), bundle.clone());
        vars.insert("PIP_CERT".to_string(), bundle.clone());

        let guard = materialize_pip_config_file(&bundle, &proxy_url, caller_env)
            .context("materialize PIP_CONFIG_FILE")?;
        vars.insert(
            "PIP_CONFIG_FILE".to_string(),
            guard.path.display().to_string(),
        );
        pip_config_guard = Some(guard);
    }

    let stale_case_variants = stale_case_variants(&vars, caller_env);

    Ok(ChildEnv {
        vars,
        pip_config_guard,
        stale_case_variants,
    })
}

/// Per spec §6, "the upper-cased variant of the proxy-required names wins
/// over user-provided variants regardless of case" — env vars differing
/// only by case are distinct on Unix, so a caller-set `https_proxy` would
/// otherwise sit right alongside our `HTTPS_PROXY` and some tools prefer the
/// lowercase spelling. Collect every caller key that case-insensitively
/// matches one of our managed keys without being an exact match, so the
/// caller can `env_remove` them before applying `vars`.
fn stale_case_variants(vars: &HashMap<String, String>, caller_env: &HashMap<String, String>) -> Vec<String> {
    caller_env
        .keys()
        .filter(|caller_key| {
            !vars.contains_key(caller_key.as_str())
                && vars
                    .keys()
                    .any(|managed_key| managed_key.eq_ignore_ascii_case(caller_key))
        })
        .cloned()
        .collect()
}

/// Builds a fresh pip INI file with `[global] cert = ..., proxy = ...`,
/// merging in any pre-existing `PIP_CONFIG_FILE`'s contents first so
/// unrelated pip settings the developer already had survive.
fn materialize_pip_config_file(
    cert_path: &str,
    proxy_url: &str,
    caller_env: &HashMap<String, String>,
) -> Result<PipConfigGuard> {
    let mut contents = String::new();
    if let Some(existing_path) = lookup_case_insensitive(caller_env, "PIP_CONFIG_FILE")
        && let Ok(existing) = fs::read_to_string(existing_path)
    {
        contents.push_str(&existing);
        if !contents.ends_with('\n') {
            contents.push('\n');
        }
    }

    if !contents.contains("[global]") {
        contents.push_str("[global]\n");
    }
    contents.push_str(&format!("cert = {cert_path}\n"));
    contents.push_str(&format!("proxy = {proxy_url}\n"));

    let path = std::env::temp_dir().join(format!("safe-chain-pip-{}.ini", std::process::id()));
    fs::write(&path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(PipConfigGuard { path })
}

/// The caller's `PIP_CONFIG_FILE` may be spelled in any case; per spec §6
/// "the upper-cased variant of the proxy-required names wins over
/// user-provided variants regardless of case", so the lookup itself is
/// case-insensitive but prefers an exact-case match first.
fn lookup_case_insensitive<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    if let Some(value) = env.get(key) {
        return Some(value.as_str());
    }
    env.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}
