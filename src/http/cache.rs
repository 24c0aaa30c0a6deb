//! HTTP cache control module
//!
//! Provides `ETag` generation and conditional request handling. Image
//! responses are marked uncacheable, but clients that revalidate anyway
//! (`must-revalidate`) still get cheap 304 answers through the same path.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Cache-Control directives attached to every image response
pub const IMAGE_NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Generate `ETag` using fast hashing
///
/// Returns a quoted hex string, e.g. `"abc123def"`.
pub fn generate_etag(content: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    let v = hasher.finish();
    format!("\"{v:x}\"")
}

/// Check if client's `If-None-Match` header matches the server's `ETag`
///
/// Supports a single `ETag`, a comma-separated list, and the `*` wildcard.
/// Returns true if matched (should answer 304).
pub fn check_etag_match(if_none_match: Option<&str>, etag: &str) -> bool {
    if_none_match.is_some_and(|client_etag| {
        client_etag
            .split(',')
            .any(|e| e.trim() == etag || e.trim() == "*")
    })
}
