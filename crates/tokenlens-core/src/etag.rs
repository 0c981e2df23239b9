//! Weak ETag computation and Cache-Control header policy.

use sha1::{Digest, Sha1};

/// Default freshness window in seconds.
pub const DEFAULT_MAX_AGE_SECS: u64 = 86400;

/// Computes `W/"<byte-length>-<sha1-first-16-hex>"` over a response body.
pub fn weak_etag(body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body);
    let digest = hasher.finalize();
    let hex = hex::encode(digest);
    format!("W/\"{}-{}\"", body.len(), &hex[..16])
}

/// Builds the `Cache-Control` header value for a given freshness window:
/// `public, max-age=<s>, s-maxage=<s>, immutable, stale-while-revalidate=<s*7>`.
pub fn cache_control(max_age_secs: u64) -> String {
    format!(
        "public, max-age={max_age_secs}, s-maxage={max_age_secs}, immutable, stale-while-revalidate={}",
        max_age_secs * 7
    )
}

/// Returns true when `if_none_match` contains a validator matching `etag`,
/// honoring the comma-separated multi-validator and `*` wildcard forms.
pub fn if_none_match_satisfied(if_none_match: &str, etag: &str) -> bool {
    let if_none_match = if_none_match.trim();
    if if_none_match == "*" {
        return true;
    }
    if_none_match.split(',').any(|candidate| candidate.trim() == etag)
}
