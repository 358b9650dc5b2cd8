use thiserror::Error;

pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    /// The source requires authentication (expired cookies, login walls).
    #[error("login required: {0}")]
    LoginRequired(String),

    /// The source is throttling us.
    #[error("source rate limited: {0}")]
    RateLimited(String),

    /// The video was removed, made private, or never existed.
    #[error("content unavailable: {0}")]
    ContentUnavailable(String),

    /// Duration or size limits rejected the video.
    #[error("video rejected by limits: {0}")]
    LimitExceeded(String),

    /// The tool exited non-zero for a reason we could not classify.
    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("tool timed out after {0}s")]
    Timeout(u64),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Permanent failures skip the retry budget and go straight to the
    /// fallback path.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MediaError::LoginRequired(_)
                | MediaError::ContentUnavailable(_)
                | MediaError::LimitExceeded(_)
        )
    }
}

/// Map downloader stderr to a typed error. Patterns cover the strings the
/// downloader actually emits for each condition.
pub fn classify_downloader_stderr(stderr: &str) -> Option<MediaError> {
    let lower = stderr.to_lowercase();
    if lower.contains("login required") || lower.contains("use --cookies") {
        return Some(MediaError::LoginRequired(first_line(stderr)));
    }
    if lower.contains("rate-limit") || lower.contains("429") || lower.contains("too many requests")
    {
        return Some(MediaError::RateLimited(first_line(stderr)));
    }
    if lower.contains("not available")
        || lower.contains("unavailable")
        || lower.contains("private")
        || lower.contains("has been removed")
    {
        return Some(MediaError::ContentUnavailable(first_line(stderr)));
    }
    if lower.contains("larger than max-filesize") || lower.contains("does not pass filter") {
        return Some(MediaError::LimitExceeded(first_line(stderr)));
    }
    None
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").trim().to_string()
}
