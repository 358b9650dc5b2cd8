pub mod admin;
pub mod feedback;
pub mod generate;
pub mod health;
pub mod view;

use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use scriptflow_common::ServiceError;

/// Requests allowed per IP per hour, across all endpoints.
pub const IP_RATE_LIMIT_PER_HOUR: usize = 120;

/// Check rate limit for an IP. Returns true if the request is allowed.
/// Prunes expired entries and records the new request if allowed.
pub fn check_ip_rate_limit(entries: &mut Vec<Instant>, now: Instant, max_per_hour: usize) -> bool {
    let cutoff = now - std::time::Duration::from_secs(3600);
    entries.retain(|t| *t > cutoff);
    if entries.len() >= max_per_hour {
        return false;
    }
    entries.push(now);
    true
}

/// Map a `ServiceError` to its boundary response.
pub fn error_response(err: &ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut body = serde_json::json!({
        "status": "error",
        "error": err.class(),
        "message": err.to_string(),
    });

    if let ServiceError::QuotaExceeded { retry_after } = err {
        body["retryAfter"] = serde_json::json!(retry_after);
        return (
            status,
            [
                ("Retry-After", retry_after.to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
            ],
            Json(body),
        )
            .into_response();
    }

    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_rate_limit_allows_then_blocks() {
        let mut entries = Vec::new();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(check_ip_rate_limit(&mut entries, now, 5));
        }
        assert!(!check_ip_rate_limit(&mut entries, now, 5));
        assert_eq!(entries.len(), 5);
    }

    #[test]
    fn ip_rate_limit_expires_old_entries() {
        let mut entries = vec![Instant::now() - std::time::Duration::from_secs(3601); 5];
        assert!(check_ip_rate_limit(&mut entries, Instant::now(), 5));
        assert_eq!(entries.len(), 1);
    }
}
