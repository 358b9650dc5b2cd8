use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManyChatError>;

#[derive(Debug, Error)]
pub enum ManyChatError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for ManyChatError {
    fn from(err: reqwest::Error) -> Self {
        ManyChatError::Network(err.to_string())
    }
}
