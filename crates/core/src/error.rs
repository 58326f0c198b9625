use std::path::PathBuf;

use thiserror::Error;

/// Failure to produce cached text for a document.
///
/// Terminal for every cell that depends on the document; callers never retry it.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("document not found: {0:?}")]
    Missing(PathBuf),
    #[error("unsupported document type: {0:?}")]
    Unsupported(PathBuf),
    #[error("failed to read {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("text cache error: {0}")]
    Cache(#[from] serde_json::Error),
}

impl ExtractionError {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Unreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
