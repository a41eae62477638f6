//! Splits the wrapper's own `--safe-chain-*` flags (and the bare
//! `--include-python` flag) out of argv, wherever they appear, leaving the
//! untouched child command behind.
//!
//! Spec §6: "Any argument starting with `--safe-chain-` (case-insensitive)
//! is a wrapper flag and is stripped before forwarding." This doesn't fit
//! `clap::Parser`'s positional model directly (the wrapper flags and the
//! child's own argv are interleaved), so extraction is hand-rolled here;
//! the extracted tokens are then handed to `clap` for the case-sensitive,
//! last-wins parsing clap already does well.

use clap::Parser;
use clap::ValueEnum;

const SAFE_CHAIN_PREFIX: &str = "--safe-chain-";
const INCLUDE_PYTHON_FLAG: &str = "--include-python";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Silent,
    Normal,
    Verbose,
}

/// The wrapper's own command-line surface, parsed from the tokens
/// [`extract_wrapper_argv`] pulled out of the full invocation. `clap`
/// handles last-wins semantics here for free: a repeated non-multiple
/// `--arg=value` overwrites the field each time it's parsed.
#[derive(Debug, Clone, Parser)]
#[command(name = "safe-chain", no_binary_name = true)]
pub struct WrapperFlags {
    #[arg(long = "safe-chain-logging", default_value = "silent")]
    pub logging: LogLevel,

    #[arg(long = "safe-chain-skip-minimum-package-age")]
    pub skip_minimum_package_age: bool,

    #[arg(long = "safe-chain-minimum-package-age-hours", default_value_t = 24)]
    pub minimum_package_age_hours: u64,

    #[arg(long = "include-python")]
    pub include_python: bool,
}

/// Splits `argv` into `(wrapper_flag_tokens, child_argv)`. `child_argv[0]`
/// is the wrapped command itself (`npm`, `pip`, ...), matching the shape
/// `safe_chain_pm::PackageManager` adapters expect.
pub fn extract_wrapper_argv(argv: &[String]) -> (Vec<String>, Vec<String>) {
    let mut wrapper_tokens = Vec::new();
    let mut child_argv = Vec::new();
    for arg in argv {
        let name = arg.split('=').next().unwrap_or(arg);
        if name.to_ascii_lowercase().starts_with(SAFE_CHAIN_PREFIX) {
            wrapper_tokens.push(lowercase_flag_name(arg));
        } else if arg == INCLUDE_PYTHON_FLAG {
            wrapper_tokens.push(arg.clone());
        } else {
            child_argv.push(arg.clone());
        }
    }
    (wrapper_tokens, child_argv)
}

/// Lowercases only the `--flag-name` portion of a `--flag-name=value`
/// token so `clap` matches it regardless of the caller's casing, without
/// touching the value's case (logging levels aside, values are free text).
fn lowercase_flag_name(arg: &str) -> String {
    match arg.split_once('=') {
        Some((name, value)) => format!("{}={value}", name.to_ascii_lowercase()),
        None => arg.to_ascii_lowercase(),
    }
}
