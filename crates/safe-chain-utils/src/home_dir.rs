use dirs::home_dir;
use std::path::PathBuf;

/// Returns the path to the safe-chain persisted-state directory, which can be
/// overridden by the `SAFE_CHAIN_HOME` environment variable. If not set,
/// defaults to `~/.safe-chain`.
///
/// - If `SAFE_CHAIN_HOME` is set, the value must exist and be a directory. The
///   value will be canonicalized and this function will Err otherwise.
/// - If `SAFE_CHAIN_HOME` is not set, this function does not verify that the
///   directory exists.
pub fn find_safe_chain_home() -> std::io::Result<PathBuf> {
    let env_override = std::env::var("SAFE_CHAIN_HOME")
        .ok()
        .filter(|val| !val.is_empty());
    find_safe_chain_home_from_env(env_override.as_deref())
}

fn find_safe_chain_home_from_env(env_override: Option<&str>) -> std::io::Result<PathBuf> {
    match env_override {
        Some(val) => {
            let path = PathBuf::from(val);
            let metadata = std::fs::metadata(&path).map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("SAFE_CHAIN_HOME points to {val:?}, but that path does not exist"),
                ),
                _ => std::io::Error::new(
                    err.kind(),
                    format!("failed to read SAFE_CHAIN_HOME {val:?}: {err}"),
                ),
            })?;

            if !metadata.is_dir() {
                Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("SAFE_CHAIN_HOME points to {val:?}, but that path is not a directory"),
                ))
            } else {
                path.canonicalize().map_err(|err| {
                    std::io::Error::new(
                        err.kind(),
                        format!("failed to canonicalize SAFE_CHAIN_HOME {val:?}: {err}"),
                    )
                })
            }
        }
        None => {
            let mut p = home_dir().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "could not find home directory",
                )
            })?;
            p.push(".safe-chain");
            Ok(p)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::find_safe_chain_home_from_env;
    use dirs::home_dir;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::io::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn find_safe_chain_home_env_missing_path_is_fatal() {
        let temp_home = TempDir::new().expect("temp home");
        let missing = temp_home.path().join("missing-safe-chain-home");
        let missing_str = missing
            .to_str()
            .expect("missing safe-chain home path should be valid utf-8");

        let err =
            find_safe_chain_home_from_env(Some(missing_str)).expect_err("missing SAFE_CHAIN_HOME");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(
            err.to_string().contains("SAFE_CHAIN_HOME"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn find_safe_chain_home_env_file_path_is_fatal() {
        let temp_home = TempDir::new().expect("temp home");
        let file_path = temp_home.path().join("safe-chain-home.txt");
        fs::write(&file_path, "not a directory").expect("write temp file");
        let file_str = file_path
            .to_str()
            .expect("file safe-chain home path should be valid utf-8");

        let err = find_safe_chain_home_from_env(Some(file_str)).expect_err("file SAFE_CHAIN_HOME");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(
            err.to_string().contains("not a directory"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn find_safe_chain_home_env_valid_directory_canonicalizes() {
        let temp_home = TempDir::new().expect("temp home");
        let temp_str = temp_home
            .path()
            .to_str()
            .expect("temp safe-chain home path should be valid utf-8");

        let resolved =
            find_safe_chain_home_from_env(Some(temp_str)).expect("valid SAFE_CHAIN_HOME");
        let expected = temp_home
            .path()
            .canonicalize()
            .expect("canonicalize temp home");
        assert_eq!(resolved, expected);
    }

    #[test]
    fn find_safe_chain_home_without_env_uses_default_home_dir() {
        let resolved = find_safe_chain_home_from_env(None).expect("default SAFE_CHAIN_HOME");
        let mut expected = home_dir().expect("home dir");
        expected.push(".safe-chain");
        assert_eq!(resolved, expected);
    }
}
