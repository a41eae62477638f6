//! Classification and parsing of npm registry request paths.

/// How an npm registry path should be treated by the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpmUrlKind {
    /// A tarball download, e.g. `/lodash/-/lodash-4.17.21.tgz`.
    Tarball,
    /// An opaque endpoint under `/-/` that is not a tarball (search, dist-tags, ping, …).
    Special,
    /// A package metadata (packument) request.
    Metadata,
}

/// Classify a request path (query/fragment already stripped).
pub fn classify(path: &str) -> NpmUrlKind {
    if path.ends_with(".tgz") {
        NpmUrlKind::Tarball
    } else if path.contains("/-/") {
        NpmUrlKind::Special
    } else {
        NpmUrlKind::Metadata
    }
}

/// Parse `(name, version)` out of a tarball path. Returns `None` for anything
/// that is not a well-formed tarball filename — callers must not treat a
/// missing result as a sign of malice.
pub fn parse_tarball(path: &str) -> Option<(String, String)> {
    let filename = path.rsplit('/').next()?;
    let stem = filename.strip_suffix(".tgz")?;
    if stem.is_empty() {
        return None;
    }

    // The version always starts right after the dash that precedes the
    // leading digit of the semver major component; package names may
    // themselves contain dashes (`safe-chain-test`), so the naive "last
    // dash" split breaks on prerelease tags like `18.3.0-canary-abc123`.
    let dash = stem
        .char_indices()
        .find(|&(i, c)| c == '-' && stem.as_bytes().get(i + 1).is_some_and(u8::is_ascii_digit))
        .map(|(i, _)| i)?;
    let name_part = &stem[..dash];
    let version = &stem[dash + 1..];
    if name_part.is_empty() || version.is_empty() {
        return None;
    }

    // Scoped packages (`@babel/core`) ship tarballs without the scope in the
    // filename (`core-7.22.0.tgz`); recover it from the path, which looks
    // like `/@scope/name/-/name-version.tgz`.
    let before_marker = path.split("/-/").next().unwrap_or(path);
    let segments: Vec<&str> = before_marker.split('/').filter(|s| !s.is_empty()).collect();
    let name = if segments.len() >= 2 && segments[segments.len() - 2].starts_with('@') {
        format!("{}/{name_part}", segments[segments.len() - 2])
    } else {
        name_part.to_string()
    };

    Some((name, version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_tarball() {
        assert_eq!(
            classify("/lodash/-/lodash-4.17.21.tgz"),
            NpmUrlKind::Tarball
        );
    }

    #[test]
    fn classifies_special_endpoint() {
        assert_eq!(classify("/-/v1/search"), NpmUrlKind::Special);
        assert_eq!(classify("/lodash/-/dist-tags"), NpmUrlKind::Special);
    }

    #[test]
    fn classifies_metadata() {
        assert_eq!(classify("/lodash"), NpmUrlKind::Metadata);
        assert_eq!(classify("/@babel/core"), NpmUrlKind::Metadata);
    }

    #[test]
    fn parses_unscoped_tarball() {
        assert_eq!(
            parse_tarball("/lodash/-/lodash-4.17.21.tgz"),
            Some(("lodash".to_string(), "4.17.21".to_string()))
        );
    }

    #[test]
    fn parses_scoped_tarball() {
        assert_eq!(
            parse_tarball("/@babel/core/-/core-7.22.0.tgz"),
            Some(("@babel/core".to_string(), "7.22.0".to_string()))
        );
    }

    #[test]
    fn parses_hyphenated_name() {
        assert_eq!(
            parse_tarball("/safe-chain-test/-/safe-chain-test-1.0.0.tgz"),
            Some(("safe-chain-test".to_string(), "1.0.0".to_string()))
        );
    }

    #[test]
    fn parses_prerelease_with_embedded_dash() {
        assert_eq!(
            parse_tarball("/react/-/react-18.3.0-canary-abc123.tgz"),
            Some(("react".to_string(), "18.3.0-canary-abc123".to_string()))
        );
        assert_eq!(
            parse_tarball("/pkg/-/pkg-5.0.0-beta.1.tgz"),
            Some(("pkg".to_string(), "5.0.0-beta.1".to_string()))
        );
    }

    #[test]
    fn parses_build_metadata() {
        assert_eq!(
            parse_tarball("/pkg/-/pkg-1.0.0-rc.1+build.123.tgz"),
            Some(("pkg".to_string(), "1.0.0-rc.1+build.123".to_string()))
        );
    }

    #[test]
    fn metadata_only_path_has_no_parse_result() {
        assert_eq!(parse_tarball("/lodash"), None);
    }
}
