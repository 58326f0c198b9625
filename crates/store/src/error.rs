use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("results serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid cell key `{0}`, expected <document>:<column>")]
    InvalidKey(String),
    #[error("results backend unavailable: {0}")]
    Unavailable(String),
    #[error("results writer has shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, StoreError>;
