//! URL canonicalization and cache-key hashing.
//!
//! Tier-1 keys identify a reel regardless of who asked; tier-2 keys identify
//! a full request tuple including the variation index. The tier-2 scheme is
//! versioned via a fixed prefix so future tuple extensions do not collide.

use sha2::{Digest, Sha256};

/// Version prefix for the tier-2 key tuple.
const REQUEST_KEY_VERSION: &str = "sfv2";

/// Canonical form of a video URL: strip query and fragment, strip the
/// trailing slash, and substitute the plural path segment (`/reels/` →
/// `/reel/`). Unparseable input is returned unchanged.
pub fn canonicalize_url(raw: &str) -> String {
    let mut parsed = match url::Url::parse(raw.trim()) {
        Ok(u) => u,
        Err(_) => return raw.to_string(),
    };

    parsed.set_query(None);
    parsed.set_fragment(None);

    let path: Vec<&str> = parsed.path().split('/').collect();
    let mapped: Vec<&str> = path
        .iter()
        .map(|seg| if *seg == "reels" { "reel" } else { *seg })
        .collect();
    let new_path = mapped.join("/");
    parsed.set_path(&new_path);

    parsed.to_string().trim_end_matches('/').to_string()
}

/// Normalized idea text used in variation-counter keys and the tier-2 tuple.
pub fn normalize_idea(idea: &str) -> String {
    idea.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tier-1 key: SHA-256 of the canonical URL.
pub fn reel_hash(canonical_url: &str) -> String {
    hex::encode(Sha256::digest(canonical_url.as_bytes()))
}

/// Tier-2 key: SHA-256 of the versioned request tuple.
pub fn request_hash(
    subscriber_id: &str,
    canonical_url: &str,
    idea: &str,
    variation_index: u32,
    mode: &str,
) -> String {
    let tuple = format!(
        "{REQUEST_KEY_VERSION}|{subscriber_id}|{canonical_url}|{}|{variation_index}|{mode}",
        normalize_idea(idea)
    );
    hex::encode(Sha256::digest(tuple.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_strips_query_params() {
        assert_eq!(
            canonicalize_url("https://www.instagram.com/reel/AbC/?utm=1&igsh=xyz"),
            "https://www.instagram.com/reel/AbC"
        );
    }

    #[test]
    fn canonical_substitutes_plural_segment() {
        assert_eq!(
            canonicalize_url("https://www.instagram.com/reels/AbC123/"),
            "https://www.instagram.com/reel/AbC123"
        );
    }

    #[test]
    fn canonical_strips_trailing_slash() {
        assert_eq!(
            canonicalize_url("https://www.instagram.com/reel/AbC/"),
            "https://www.instagram.com/reel/AbC"
        );
    }

    #[test]
    fn canonical_is_idempotent() {
        let once = canonicalize_url("https://www.instagram.com/reels/AbC/?utm_source=share");
        let twice = canonicalize_url(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn canonical_returns_unparseable_input_unchanged() {
        assert_eq!(canonicalize_url("not a url"), "not a url");
    }

    #[test]
    fn canonical_does_not_touch_reel_ids_containing_reels() {
        // Only whole path segments are substituted
        assert_eq!(
            canonicalize_url("https://www.instagram.com/reel/reelsXyz"),
            "https://www.instagram.com/reel/reelsXyz"
        );
    }

    #[test]
    fn request_hash_is_stable() {
        // Pinned vector: the tier-2 scheme is contractual across processes
        let a = request_hash("12345", "https://www.instagram.com/reel/AbC", "Make it about coding", 0, "full");
        let b = request_hash("12345", "https://www.instagram.com/reel/AbC", "  make it ABOUT   coding ", 0, "full");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn request_hash_varies_by_variation_index() {
        let v0 = request_hash("12345", "https://u", "idea text", 0, "full");
        let v1 = request_hash("12345", "https://u", "idea text", 1, "full");
        assert_ne!(v0, v1);
    }

    #[test]
    fn request_hash_varies_by_mode() {
        let full = request_hash("12345", "https://u", "idea text", 0, "full");
        let hook = request_hash("12345", "https://u", "idea text", 0, "hook_only");
        assert_ne!(full, hook);
    }

    #[test]
    fn reel_hash_ignores_tracking_params_after_canonicalization() {
        let a = reel_hash(&canonicalize_url("https://www.instagram.com/reel/AbC/?utm=1"));
        let b = reel_hash(&canonicalize_url("https://www.instagram.com/reel/AbC"));
        assert_eq!(a, b);
    }
}
