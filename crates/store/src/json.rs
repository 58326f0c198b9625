use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};
use crate::record::ProjectResults;

/// Somewhere project results live between runs.
pub trait ResultsBackend: Send + 'static {
    fn load(&self) -> Result<ProjectResults>;

    fn persist(&mut self, results: &ProjectResults) -> Result<()>;
}

/// `results.json` rewritten whole on every change via temp file and rename.
#[derive(Debug, Clone)]
pub struct JsonResultsStore {
    path: PathBuf,
}

impl JsonResultsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<root>/.doc_matrix/projects/<name>/results.json`
    pub fn for_project(root: &Path, project: &str) -> Self {
        Self::new(
            root.join(".doc_matrix")
                .join("projects")
                .join(project)
                .join("results.json"),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultsBackend for JsonResultsStore {
    fn load(&self) -> Result<ProjectResults> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(ProjectResults::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn persist(&mut self, results: &ProjectResults) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let payload = serde_json::to_vec_pretty(results)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&payload)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}
