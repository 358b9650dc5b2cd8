use thiserror::Error;

pub type Result<T> = std::result::Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv connection error: {0}")]
    Connection(String),

    #[error("kv operation error: {0}")]
    Operation(String),

    #[error("kv value error: {0}")]
    Value(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            KvError::Connection(err.to_string())
        } else {
            KvError::Operation(err.to_string())
        }
    }
}
