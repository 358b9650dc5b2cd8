//! Ingress payload validation.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ServiceError;

static SUBSCRIBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4,20}$").expect("valid subscriber regex"));

static PUBLIC_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{6,12}$").expect("valid public id regex"));

/// Characters that would let a payload escape into prompt or markup context.
const INJECTION_CHARS: &[char] = &['<', '>', '{', '}', '`'];

pub const IDEA_MIN_LEN: usize = 4;
pub const IDEA_MAX_LEN: usize = 500;
pub const LANGUAGE_HINT_MAX_LEN: usize = 50;

/// Vendor placeholder convention: field values of the form `{{…}}` arrive
/// when the messaging platform did not substitute a variable. Coerced to
/// absent prior to validation.
pub fn coerce_placeholder(value: Option<String>) -> Option<String> {
    value.filter(|v| {
        let t = v.trim();
        !(t.starts_with("{{") && t.ends_with("}}"))
    })
}

pub fn validate_subscriber_id(id: &str) -> Result<(), ServiceError> {
    if SUBSCRIBER_RE.is_match(id) {
        Ok(())
    } else {
        Err(ServiceError::Validation(
            "subscriber_id must be a numeric platform identifier".to_string(),
        ))
    }
}

/// The URL must be https, on a supported host, and point at a reel path.
pub fn validate_reel_url(raw: &str, supported_hosts: &[String]) -> Result<(), ServiceError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|_| ServiceError::Validation("reel_url is not a valid URL".to_string()))?;

    if parsed.scheme() != "https" {
        return Err(ServiceError::Validation("reel_url must use https".to_string()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ServiceError::Validation("reel_url has no host".to_string()))?;
    if !supported_hosts.iter().any(|h| h == host) {
        return Err(ServiceError::Validation(format!(
            "unsupported video host: {host}"
        )));
    }

    let is_reel_path = parsed
        .path_segments()
        .map(|mut segs| segs.any(|s| s == "reel" || s == "reels"))
        .unwrap_or(false);
    if !is_reel_path {
        return Err(ServiceError::Validation(
            "reel_url must point at a reel".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_idea(idea: &str) -> Result<(), ServiceError> {
    let len = idea.chars().count();
    if len < IDEA_MIN_LEN {
        return Err(ServiceError::Validation(format!(
            "user_idea must be at least {IDEA_MIN_LEN} characters"
        )));
    }
    if len > IDEA_MAX_LEN {
        return Err(ServiceError::Validation(format!(
            "user_idea must be at most {IDEA_MAX_LEN} characters"
        )));
    }
    if let Some(bad) = idea.chars().find(|c| INJECTION_CHARS.contains(c)) {
        return Err(ServiceError::Validation(format!(
            "user_idea contains a disallowed character: {bad:?}"
        )));
    }
    Ok(())
}

pub fn validate_language_hint(hint: &str) -> Result<(), ServiceError> {
    let len = hint.chars().count();
    if len > LANGUAGE_HINT_MAX_LEN || !hint.chars().all(|c| c.is_alphabetic() || c == ' ') {
        return Err(ServiceError::Validation(
            "language_hint must be letters only, at most 50 characters".to_string(),
        ));
    }
    Ok(())
}

pub fn is_valid_public_id(id: &str) -> bool {
    PUBLIC_ID_RE.is_match(id)
}
