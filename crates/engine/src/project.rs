//! Project definitions: the documents (rows) and questions (columns) of a matrix.
//!
//! A project file is YAML:
//!
//! ```yaml
//! name: contracts
//! model: openai/gpt-4o-mini
//! mode: row_wise
//! concurrency: 6
//! documents:
//!   folder: ./docs
//!   files: [extra/appendix.pdf]
//! columns:
//!   - id: q1
//!     question: Who are the parties?
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use docmatrix_core::{document_name, FileType};
use docmatrix_store::JsonResultsStore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub question: String,
}

impl Column {
    pub fn new(id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One completion per cell.
    #[default]
    Parallel,
    /// One completion per document covering all of its columns.
    RowWise,
}

impl std::str::FromStr for ExecutionMode {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "parallel" => Ok(ExecutionMode::Parallel),
            "row_wise" | "rowwise" => Ok(ExecutionMode::RowWise),
            other => Err(EngineError::InvalidProject(format!(
                "unknown execution mode {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSource {
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub folder: Option<PathBuf>,
}

/// The project file as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub documents: DocumentSource,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub results: Option<PathBuf>,
}

/// A validated project with every document path resolved.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub root: PathBuf,
    pub model: Option<String>,
    pub mode: ExecutionMode,
    pub concurrency: Option<usize>,
    pub documents: Vec<PathBuf>,
    pub columns: Vec<Column>,
    pub results_path: PathBuf,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        documents: Vec<PathBuf>,
        columns: Vec<Column>,
    ) -> Result<Self> {
        let name = name.into();
        let root = root.into();
        let results_path = JsonResultsStore::for_project(&root, &name).path().to_path_buf();
        let project = Self {
            name,
            root,
            model: None,
            mode: ExecutionMode::default(),
            concurrency: None,
            documents,
            columns,
            results_path,
        };
        project.validate()?;
        Ok(project)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| EngineError::ProjectFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ProjectFile = serde_yaml::from_str(&raw)?;
        let root = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        Self::from_file(file, &root)
    }

    pub fn from_file(file: ProjectFile, root: &Path) -> Result<Self> {
        let mut documents: Vec<PathBuf> = file
            .documents
            .files
            .iter()
            .map(|path| root.join(path))
            .collect();
        if let Some(folder) = &file.documents.folder {
            documents.extend(list_folder(&root.join(folder))?);
        }
        let mut project = Self::new(file.name, root, documents, file.columns)?;
        project.model = file.model;
        project.mode = file.mode;
        project.concurrency = file.concurrency;
        if let Some(results) = file.results {
            project.results_path = root.join(results);
        }
        Ok(project)
    }

    pub fn document_names(&self) -> Vec<String> {
        self.documents.iter().map(|path| document_name(path)).collect()
    }

    pub fn document(&self, name: &str) -> Option<&PathBuf> {
        self.documents.iter().find(|path| document_name(path) == name)
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == id)
    }

    pub fn results_store(&self) -> JsonResultsStore {
        JsonResultsStore::new(&self.results_path)
    }

    fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        let separator = |c: char| c == '/' || c == '\\';
        if name.is_empty() || name.contains(separator) || name == "." || name == ".." {
            return Err(EngineError::InvalidProject(format!(
                "project name {:?} is not usable as a directory name",
                self.name
            )));
        }
        if self.columns.is_empty() {
            return Err(EngineError::InvalidProject("no columns defined".into()));
        }
        let mut ids = HashSet::new();
        for column in &self.columns {
            if column.id.is_empty() || column.id.contains(':') {
                return Err(EngineError::InvalidProject(format!(
                    "column id {:?} must be non-empty and free of ':'",
                    column.id
                )));
            }
            if !ids.insert(column.id.as_str()) {
                return Err(EngineError::InvalidProject(format!(
                    "duplicate column id {}",
                    column.id
                )));
            }
        }
        let mut names = HashSet::new();
        for name in self.document_names() {
            if !names.insert(name.clone()) {
                return Err(EngineError::InvalidProject(format!(
                    "two documents share the name {name}"
                )));
            }
        }
        Ok(())
    }
}

/// Supported files directly inside `folder`, sorted by name.
fn list_folder(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in entries {
        let entry = entry.map_err(|err| EngineError::InvalidProject(err.to_string()))?;
        let path = entry.path();
        if entry.file_type().is_file() && FileType::from_path(path).is_some() {
            files.push(path.to_path_buf());
        } else {
            debug!(path = %path.display(), "skipping unsupported entry");
        }
    }
    Ok(files)
}
