//! Typed errors for the request/worker lifecycle.

use thiserror::Error;

/// Error taxonomy shared by the ingress, the queue, and the worker.
///
/// The ingress maps variants to HTTP statuses via [`ServiceError::status_code`];
/// the queue decides retry behavior via [`ServiceError::is_retryable`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed request payload. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Subscriber is blocked or not admitted.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Per-subscriber quota exhausted. Carries seconds until the window resets.
    #[error("quota exceeded, retry after {retry_after}s")]
    QuotaExceeded { retry_after: u64 },

    /// A gate's backing store is unreachable. Quota gates fail closed.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// A circuit breaker denied the call. Retryable by the queue.
    #[error("circuit open for {service}, next probe in {retry_after_ms}ms")]
    CircuitOpen { service: String, retry_after_ms: u64 },

    /// A stage exceeded its deadline. Retryable except at the request boundary.
    #[error("timeout in {stage}")]
    Timeout { stage: String },

    /// Transient upstream failure (downloader, generator, uploader, messaging).
    #[error("upstream failure in {service}: {message}")]
    Upstream { service: String, message: String },

    /// Non-retryable upstream failure: auth rejection, content unavailable,
    /// duration/size limits. Produces the final-attempt fallback script.
    #[error("permanent upstream failure in {service}: {reason}")]
    PermanentUpstream { service: String, reason: String },

    /// Unclassified.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// HTTP status for the request boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::AccessDenied(_) => 403,
            ServiceError::QuotaExceeded { .. } => 429,
            ServiceError::Unavailable(_) => 503,
            // Internal-only variants surface as 503 at the boundary
            ServiceError::CircuitOpen { .. } | ServiceError::Timeout { .. } => 503,
            ServiceError::Upstream { .. } | ServiceError::PermanentUpstream { .. } => 502,
            ServiceError::Internal(_) => 500,
        }
    }

    /// Whether the queue should re-attempt a job that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::CircuitOpen { .. }
                | ServiceError::Timeout { .. }
                | ServiceError::Upstream { .. }
                | ServiceError::Unavailable(_)
        )
    }

    /// Short class label used in error counters.
    pub fn class(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::AccessDenied(_) => "access_denied",
            ServiceError::QuotaExceeded { .. } => "quota",
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::CircuitOpen { .. } => "circuit_open",
            ServiceError::Timeout { .. } => "timeout",
            ServiceError::Upstream { .. } => "upstream",
            ServiceError::PermanentUpstream { .. } => "permanent_upstream",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(ServiceError::Timeout { stage: "download".into() }.is_retryable());
        assert!(ServiceError::CircuitOpen { service: "generation".into(), retry_after_ms: 500 }
            .is_retryable());
        assert!(!ServiceError::Validation("bad".into()).is_retryable());
        assert!(!ServiceError::PermanentUpstream {
            service: "download".into(),
            reason: "login required".into()
        }
        .is_retryable());
    }

    #[test]
    fn boundary_statuses() {
        assert_eq!(ServiceError::Validation("x".into()).status_code(), 400);
        assert_eq!(ServiceError::AccessDenied("x".into()).status_code(), 403);
        assert_eq!(ServiceError::QuotaExceeded { retry_after: 10 }.status_code(), 429);
        assert_eq!(ServiceError::Unavailable("x".into()).status_code(), 503);
        assert_eq!(ServiceError::Timeout { stage: "s".into() }.status_code(), 503);
    }
}
