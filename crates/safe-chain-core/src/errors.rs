//! Typed errors the wrapper orchestrator matches on to compute its exit code.
//!
//! Everything else (socket I/O, cert parsing, upstream dialing) stays
//! `anyhow::Error` — these variants exist only where a caller needs to branch
//! on *kind*, not just report failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SafeChainError {
    #[error("fatal startup failure: {0}")]
    FatalStartup(String),

    #[error("pre-scan found disallowed package changes")]
    PreScanDisallowed,

    #[error("pre-scan timed out after {0:?}")]
    PreScanTimeout(std::time::Duration),

    #[error("proxy blocked malware during the run")]
    MalwareBlocked,
}

impl SafeChainError {
    /// Exit-code precedence per the wire contract: fatal startup > pre-scan
    /// disallowed > pre-scan timeout > proxy-blocked malware.
    pub fn precedence(&self) -> u8 {
        match self {
            SafeChainError::FatalStartup(_) => 0,
            SafeChainError::PreScanDisallowed => 1,
            SafeChainError::PreScanTimeout(_) => 2,
            SafeChainError::MalwareBlocked => 3,
        }
    }
}
