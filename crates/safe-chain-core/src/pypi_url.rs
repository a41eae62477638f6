//! Parsing of PyPI wheel and sdist filenames out of request paths.

const SDIST_EXTENSIONS: &[&str] = &[".tar.gz", ".zip", ".tar.bz2", ".tar.xz"];

/// Parse `(dist, version)` from the last path segment of a PyPI download
/// URL. Returns `None` for anything that isn't a recognized wheel or sdist
/// filename, or whose version is the literal string `latest`.
pub fn parse(path: &str) -> Option<(String, String)> {
    let filename = path.rsplit('/').next()?;
    let decoded = urlencoding::decode(filename).ok()?;
    if decoded.ends_with(".whl") {
        parse_wheel(&decoded)
    } else {
        parse_sdist(&decoded)
    }
}

fn parse_wheel(filename: &str) -> Option<(String, String)> {
    let stem = filename.strip_suffix(".whl")?;
    // `<dist>-<version>(-<buildtag>)?-<pytag>-<abitag>-<platform>.whl`: the
    // first dash separates dist from version; trailing tag fields are not
    // needed.
    let mut parts = stem.splitn(3, '-');
    let dist = parts.next()?;
    let version = parts.next()?;
    if dist.is_empty() || version.is_empty() || version == "latest" {
        return None;
    }
    Some((dist.to_string(), version.to_string()))
}

fn parse_sdist(filename: &str) -> Option<(String, String)> {
    let stem = SDIST_EXTENSIONS
        .iter()
        .find_map(|ext| filename.strip_suffix(ext))?;
    // `<dist>-<version>.<ext>`: unlike wheels, sdist names carry no trailing
    // tags, so the version starts after the *last* dash.
    let dash = stem.rfind('-')?;
    let name = &stem[..dash];
    let version = &stem[dash + 1..];
    if name.is_empty() || version.is_empty() || version == "latest" {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_wheel() {
        assert_eq!(
            parse("/packages/xx/yy/requests-2.28.1-py3-none-any.whl"),
            Some(("requests".to_string(), "2.28.1".to_string()))
        );
    }

    #[test]
    fn parses_wheel_with_build_tag() {
        assert_eq!(
            parse("/packages/xx/yy/numpy-1.26.0-1-cp311-cp311-manylinux_2_17_x86_64.whl"),
            Some(("numpy".to_string(), "1.26.0".to_string()))
        );
    }

    #[test]
    fn parses_sdist_tar_gz() {
        assert_eq!(
            parse("/packages/xx/yy/requests-2.28.1.tar.gz"),
            Some(("requests".to_string(), "2.28.1".to_string()))
        );
    }

    #[test]
    fn parses_sdist_with_dotted_name() {
        assert_eq!(
            parse("/packages/xx/yy/zope.interface-5.5.2.tar.gz"),
            Some(("zope.interface".to_string(), "5.5.2".to_string()))
        );
    }

    #[test]
    fn rejects_literal_latest_version() {
        assert_eq!(parse("/packages/xx/yy/requests-latest.tar.gz"), None);
        assert_eq!(
            parse("/packages/xx/yy/requests-latest-py3-none-any.whl"),
            None
        );
    }

    #[test]
    fn unrecognized_extension_passes_through() {
        assert_eq!(parse("/simple/requests/"), None);
    }

    #[test]
    fn decodes_percent_encoded_segments() {
        assert_eq!(
            parse("/packages/xx/yy/my%2Dpkg-1.0.0.tar.gz"),
            Some(("my-pkg".to_string(), "1.0.0".to_string()))
        );
    }
}
