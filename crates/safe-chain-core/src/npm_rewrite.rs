//! The npm packument rewriter (C4): hides versions younger than a
//! configurable minimum age while preserving dist-tag semantics.

use rama_http::HeaderMap;
use rama_http::HeaderValue;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashSet;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

const COMPACT_PACKUMENT_MEDIA_TYPE: &str = "application/vnd.npm.install-v1+json";
const FULL_PACKUMENT_MEDIA_TYPE: &str = "application/json";

/// Configuration for the age-filter (per-process, not per-request).
#[derive(Debug, Clone)]
pub struct RewritePolicy {
    pub minimum_package_age_hours: u64,
    pub skip: bool,
    /// Base package names (the entire `@scope` for scoped packages, per the
    /// design note in spec §9) exempt from version removal.
    pub exempt_base_names: HashSet<String>,
}

impl Default for RewritePolicy {
    fn default() -> Self {
        Self {
            minimum_package_age_hours: 24,
            skip: false,
            exempt_base_names: HashSet::new(),
        }
    }
}

/// `@scope/name` -> `@scope`; anything else is its own base name.
pub fn base_name(name: &str) -> &str {
    if name.starts_with('@') {
        name.split('/').next().unwrap_or(name)
    } else {
        name
    }
}

fn is_exempt(policy: &RewritePolicy, name: &str) -> bool {
    policy.exempt_base_names.contains(base_name(name))
}

/// If the request's `accept` header asks for the compact packument (which
/// omits `time`), force the full form so the rewriter has timestamps to
/// work with.
pub fn coerce_accept_header(headers: &mut HeaderMap) {
    let Some(accept) = headers.get(rama_http::header::ACCEPT) else {
        return;
    };
    let Ok(accept_str) = accept.to_str() else {
        return;
    };
    if accept_str.contains(COMPACT_PACKUMENT_MEDIA_TYPE) {
        headers.insert(
            rama_http::header::ACCEPT,
            HeaderValue::from_static(FULL_PACKUMENT_MEDIA_TYPE),
        );
    }
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(rama_http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false)
}

fn strip_caching_headers(headers: &mut HeaderMap) {
    headers.remove(rama_http::header::ETAG);
    headers.remove(rama_http::header::LAST_MODIFIED);
    headers.remove(rama_http::header::CACHE_CONTROL);
}

/// Outcome of attempting a rewrite: the (possibly unchanged) body bytes, and
/// whether any version was actually suppressed.
pub struct RewriteOutcome {
    pub body: Vec<u8>,
    pub suppressed: bool,
}

impl RewriteOutcome {
    fn unchanged(body: &[u8]) -> Self {
        Self { body: body.to_vec(), suppressed: false }
    }
}

/// Rewrite a packument response body in place. Returns the (possibly
/// unchanged) body bytes; mutates `headers` to drop caching headers iff a
/// version was actually removed. Errors are swallowed per §4.4/§7: the
/// original body is returned unchanged and a verbose log is emitted.
pub fn rewrite_packument(
    body: &[u8],
    headers: &mut HeaderMap,
    now: OffsetDateTime,
    policy: &RewritePolicy,
) -> RewriteOutcome {
    if policy.skip || body.is_empty() || !content_type_is_json(headers) {
        return RewriteOutcome::unchanged(body);
    }

    let Ok(mut doc) = serde_json::from_slice::<Value>(body) else {
        debug!("packument rewriter: body is not valid JSON, passing through");
        return RewriteOutcome::unchanged(body);
    };

    let Some(obj) = doc.as_object_mut() else {
        return RewriteOutcome::unchanged(body);
    };
    if !obj.contains_key("time") || !obj.contains_key("versions") || !obj.contains_key("dist-tags")
    {
        return RewriteOutcome::unchanged(body);
    }

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if is_exempt(policy, &name) {
        return RewriteOutcome::unchanged(body);
    }

    let cutoff = now - Duration::seconds((policy.minimum_package_age_hours as i64) * 3600);
    let removed = remove_young_versions(obj, cutoff);
    if removed.is_empty() {
        // Re-serializing unconditionally would break idempotence (property 4)
        // only if serialization were non-deterministic; it's not, but an
        // unmodified packument should still be passed through byte-identical
        // to the upstream response rather than re-encoded.
        return RewriteOutcome::unchanged(body);
    }

    clean_dist_tags(obj, &removed);
    strip_caching_headers(headers);

    match serde_json::to_vec(&doc) {
        Ok(bytes) => RewriteOutcome { body: bytes, suppressed: true },
        Err(err) => {
            debug!("packument rewriter: failed to re-serialize ({err}), passing through");
            RewriteOutcome::unchanged(body)
        }
    }
}

/// Remove every `time`/`versions` entry younger than `cutoff`. Per the open
/// question in spec §9, a version listed in `versions` without a matching
/// `time` entry is left untouched — we only ever act on keys we find in
/// `time`.
fn remove_young_versions(obj: &mut Map<String, Value>, cutoff: OffsetDateTime) -> HashSet<String> {
    let mut removed = HashSet::new();

    let candidate_versions: Vec<String> = obj
        .get("time")
        .and_then(Value::as_object)
        .map(|time| {
            time.iter()
                .filter(|(k, _)| k.as_str() != "created" && k.as_str() != "modified")
                .filter_map(|(k, v)| {
                    let ts = v.as_str()?;
                    let parsed = OffsetDateTime::parse(ts, &Rfc3339).ok()?;
                    (parsed > cutoff).then(|| k.clone())
                })
                .collect()
        })
        .unwrap_or_default();

    if candidate_versions.is_empty() {
        return removed;
    }

    if let Some(time_obj) = obj.get_mut("time").and_then(Value::as_object_mut) {
        for version in &candidate_versions {
            time_obj.remove(version);
        }
    }
    if let Some(versions_obj) = obj.get_mut("versions").and_then(Value::as_object_mut) {
        for version in &candidate_versions {
            versions_obj.remove(version);
        }
    }

    removed.extend(candidate_versions);
    removed
}

/// Drop dist-tags pointing at a removed version, then recompute `latest` if
/// it was one of them.
fn clean_dist_tags(obj: &mut Map<String, Value>, removed: &HashSet<String>) {
    let had_latest = obj
        .get("dist-tags")
        .and_then(Value::as_object)
        .and_then(|tags| tags.get("latest"))
        .and_then(Value::as_str)
        .is_some();

    let mut latest_was_removed = false;
    if let Some(tags) = obj.get_mut("dist-tags").and_then(Value::as_object_mut) {
        let stale_tags: Vec<String> = tags
            .iter()
            .filter(|(_, v)| v.as_str().is_some_and(|v| removed.contains(v)))
            .map(|(k, _)| k.clone())
            .collect();
        for tag in stale_tags {
            if tag == "latest" {
                latest_was_removed = true;
            }
            tags.remove(&tag);
        }
    }

    if had_latest && latest_was_removed {
        recompute_latest(obj);
    }
}

/// Pick a new `latest` over the surviving `time` entries: prefer the
/// max-timestamp full release (no `-` in the version string); fall back to
/// the max-timestamp prerelease; otherwise leave `latest` unset. Ties are
/// broken lexicographically ascending on version (spec leaves the tie-break
/// unspecified; this is documented in DESIGN.md).
fn recompute_latest(obj: &mut Map<String, Value>) {
    let mut surviving: Vec<(String, OffsetDateTime)> = obj
        .get("time")
        .and_then(Value::as_object)
        .map(|time| {
            time.iter()
                .filter(|(k, _)| k.as_str() != "created" && k.as_str() != "modified")
                .filter_map(|(k, v)| {
                    let ts = OffsetDateTime::parse(v.as_str()?, &Rfc3339).ok()?;
                    Some((k.clone(), ts))
                })
                .collect()
        })
        .unwrap_or_default();

    surviving.sort_by(|a, b| a.0.cmp(&b.0));

    let full_releases: Vec<_> = surviving
        .iter()
        .filter(|(v, _)| !v.contains('-'))
        .collect();
    let chosen = best_by_timestamp(&full_releases).or_else(|| {
        let prereleases: Vec<_> = surviving.iter().filter(|(v, _)| v.contains('-')).collect();
        best_by_timestamp(&prereleases)
    });

    if let Some(tags) = obj.get_mut("dist-tags").and_then(Value::as_object_mut) {
        match chosen {
            Some(version) => {
                tags.insert("latest".to_string(), Value::String(version));
            }
            None => {
                tags.remove("latest");
            }
        }
    }
}

fn best_by_timestamp(candidates: &[&(String, OffsetDateTime)]) -> Option<String> {
    candidates
        .iter()
        .max_by_key(|(_, ts)| *ts)
        .map(|(v, _)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn headers_json() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            rama_http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(rama_http::header::ETAG, HeaderValue::from_static("\"abc\""));
        headers.insert(
            rama_http::header::LAST_MODIFIED,
            HeaderValue::from_static("Tue, 01 Jan 2024 00:00:00 GMT"),
        );
        headers.insert(
            rama_http::header::CACHE_CONTROL,
            HeaderValue::from_static("max-age=300"),
        );
        headers
    }

    fn sample_packument(now: OffsetDateTime) -> Vec<u8> {
        let fmt = |hours_ago: i64| (now - Duration::hours(hours_ago)).format(&Rfc3339).unwrap();
        serde_json::to_vec(&serde_json::json!({
            "name": "demo",
            "dist-tags": {"latest": "3.0.0"},
            "versions": {
                "1.0.0": {},
                "2.0.0": {},
                "3.0.0": {},
            },
            "time": {
                "created": fmt(1000),
                "modified": fmt(3),
                "0.0.1": fmt(8),
                "1.0.0": fmt(7),
                "2.0.0-alpha": fmt(6),
                "2.0.0": fmt(4),
                "3.0.0": fmt(3),
            },
        }))
        .unwrap()
    }

    #[test]
    fn latest_recomputation_prefers_full_release() {
        let now = OffsetDateTime::now_utc();
        let body = sample_packument(now);
        let mut headers = headers_json();
        let policy = RewritePolicy {
            minimum_package_age_hours: 5,
            ..Default::default()
        };
        let rewritten = rewrite_packument(&body, &mut headers, now, &policy);
        assert!(rewritten.suppressed);
        let doc: Value = serde_json::from_slice(&rewritten.body).unwrap();

        let versions: HashSet<&str> = doc["versions"]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(versions, HashSet::from(["1.0.0"]));
        assert_eq!(doc["dist-tags"]["latest"], "1.0.0");
        assert!(doc["time"].as_object().unwrap().contains_key("0.0.1"));
        assert!(headers.get(rama_http::header::ETAG).is_none());
        assert!(headers.get(rama_http::header::LAST_MODIFIED).is_none());
        assert!(headers.get(rama_http::header::CACHE_CONTROL).is_none());
    }

    #[test]
    fn idempotent_on_second_pass() {
        let now = OffsetDateTime::now_utc();
        let body = sample_packument(now);
        let mut headers = headers_json();
        let policy = RewritePolicy {
            minimum_package_age_hours: 5,
            ..Default::default()
        };
        let once = rewrite_packument(&body, &mut headers, now, &policy);
        let twice = rewrite_packument(&once.body, &mut headers, now, &policy);
        assert_eq!(once.body, twice.body);
    }

    #[test]
    fn skip_flag_leaves_body_untouched() {
        let now = OffsetDateTime::now_utc();
        let body = sample_packument(now);
        let mut headers = headers_json();
        let policy = RewritePolicy {
            minimum_package_age_hours: 5,
            skip: true,
            ..Default::default()
        };
        let rewritten = rewrite_packument(&body, &mut headers, now, &policy);
        assert_eq!(rewritten.body, body);
        assert!(!rewritten.suppressed);
        assert!(headers.get(rama_http::header::ETAG).is_some());
    }

    #[test]
    fn exempt_scope_keeps_all_versions_and_headers() {
        let now = OffsetDateTime::now_utc();
        let fmt = |hours_ago: i64| (now - Duration::hours(hours_ago)).format(&Rfc3339).unwrap();
        let body = serde_json::to_vec(&serde_json::json!({
            "name": "@myorg/pkg",
            "dist-tags": {"latest": "1.0.0"},
            "versions": {"1.0.0": {}},
            "time": {"created": fmt(100), "modified": fmt(0), "1.0.0": fmt(0)},
        }))
        .unwrap();
        let mut headers = headers_json();
        let mut policy = RewritePolicy {
            minimum_package_age_hours: 24,
            ..Default::default()
        };
        policy.exempt_base_names.insert("@myorg".to_string());
        let rewritten = rewrite_packument(&body, &mut headers, now, &policy);
        assert_eq!(rewritten.body, body);
        assert!(headers.get(rama_http::header::ETAG).is_some());
    }

    #[test]
    fn unmodified_body_keeps_caching_headers() {
        let now = OffsetDateTime::now_utc();
        let fmt = |hours_ago: i64| (now - Duration::hours(hours_ago)).format(&Rfc3339).unwrap();
        let body = serde_json::to_vec(&serde_json::json!({
            "name": "demo",
            "dist-tags": {"latest": "1.0.0"},
            "versions": {"1.0.0": {}},
            "time": {"created": fmt(1000), "modified": fmt(100), "1.0.0": fmt(100)},
        }))
        .unwrap();
        let mut headers = headers_json();
        let policy = RewritePolicy {
            minimum_package_age_hours: 24,
            ..Default::default()
        };
        let rewritten = rewrite_packument(&body, &mut headers, now, &policy);
        assert_eq!(rewritten.body, body);
        assert!(headers.get(rama_http::header::ETAG).is_some());
    }

    #[test]
    fn non_json_content_type_passes_through() {
        let mut headers = HeaderMap::new();
        headers.insert(
            rama_http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        let body = b"not json".to_vec();
        let policy = RewritePolicy::default();
        let rewritten = rewrite_packument(&body, &mut headers, OffsetDateTime::now_utc(), &policy);
        assert_eq!(rewritten.body, body);
    }

    #[test]
    fn malformed_json_passes_through() {
        let mut headers = headers_json();
        let body = b"{not json".to_vec();
        let policy = RewritePolicy::default();
        let rewritten = rewrite_packument(&body, &mut headers, OffsetDateTime::now_utc(), &policy);
        assert_eq!(rewritten.body, body);
    }

    #[test]
    fn coerce_accept_header_rewrites_compact_media_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            rama_http::header::ACCEPT,
            HeaderValue::from_static(COMPACT_PACKUMENT_MEDIA_TYPE),
        );
        coerce_accept_header(&mut headers);
        assert_eq!(
            headers.get(rama_http::header::ACCEPT).unwrap(),
            FULL_PACKUMENT_MEDIA_TYPE
        );
    }

    #[test]
    fn base_name_uses_whole_scope() {
        assert_eq!(base_name("@babel/core"), "@babel");
        assert_eq!(base_name("lodash"), "lodash");
    }
}
