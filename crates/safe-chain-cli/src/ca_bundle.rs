//! Builds the combined CA bundle (spec §6 persisted-state layout) for
//! Python clients that consult a CA bundle file rather than the OS trust
//! store directly: the platform's native root certificates plus the
//! safe-chain MITM root, PEM-encoded into one file.
//!
//! Grounded on the teacher's `rustls-native-certs` dependency (real DER
//! certs from the OS store, unlike `webpki-roots`'s trust-anchor-only
//! API, which cannot be re-serialized as PEM) and `base64` for the manual
//! DER-to-PEM encoding.

use anyhow::Context as _;
use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tracing::warn;

const CA_BUNDLE_FILE: &str = "ca-bundle.pem";
const PEM_LINE_WIDTH: usize = 64;

/// Builds `<safe_chain_home>/ca-bundle.pem` from the OS trust store plus
/// the safe-chain root, overwriting any existing bundle (unlike the root
/// CA's key material, this file holds no secret and should track the
/// current OS trust store on every run).
pub fn build_and_write(safe_chain_home: &Path) -> Result<PathBuf> {
    let mut pem = String::new();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!("skipping unreadable native root certificate: {err}");
    }
    for cert in &native.certs {
        pem.push_str(&der_to_pem(cert.as_ref()));
    }

    let (_root_path, root_pem) =
        safe_chain_core::ensure_root_ca().context("resolve safe-chain root CA for CA bundle")?;
    pem.push_str(&root_pem);

    let bundle_path = safe_chain_home.join(CA_BUNDLE_FILE);
    write_atomic(&bundle_path, pem.as_bytes())
        .with_context(|| format!("failed to write CA bundle {}", bundle_path.display()))?;
    Ok(bundle_path)
}

fn der_to_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Overwrite-safe atomic write: unlike the CA key, this file has no
/// create-new requirement, so a plain temp-file-then-rename is enough.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .context("CA bundle path has no parent directory")?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let tmp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));
    fs::write(&tmp_path, contents)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| {
        format!("failed to rename {} -> {}", tmp_path.display(), path.display())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn der_to_pem_wraps_base64_at_64_chars_with_headers() {
        let pem = der_to_pem(b"hello world");
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
        let body_line = pem.lines().nth(1).unwrap();
        assert_eq!(body_line, STANDARD.encode(b"hello world"));
    }

    #[test]
    fn build_and_write_includes_safe_chain_root() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("SAFE_CHAIN_HOME", dir.path());
        }
        let bundle_path = build_and_write(dir.path()).unwrap();
        let bundle = fs::read_to_string(&bundle_path).unwrap();
        assert!(bundle.contains("-----BEGIN CERTIFICATE-----"));
        unsafe {
            std::env::remove_var("SAFE_CHAIN_HOME");
        }
    }
}
