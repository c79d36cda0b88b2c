use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No healthy cache node available")]
    NoHealthyNode,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    pub fn config(msg: impl Into<String>) -> Self {
        CacheError::Config(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        CacheError::Connection(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        CacheError::Command(msg.into())
    }
}
