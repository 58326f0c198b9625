use std::path::PathBuf;

use docmatrix_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("project {0} already has a run in progress")]
    AlreadyRunning(String),
    #[error("unknown document: {0}")]
    UnknownDocument(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("invalid project: {0}")]
    InvalidProject(String),
    #[error("failed to read project file {path}: {source}")]
    ProjectFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse project file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
