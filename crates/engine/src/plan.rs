use std::path::PathBuf;

use docmatrix_core::document_name;
use docmatrix_store::{CellKey, SummaryScope};

use crate::error::{EngineError, Result};
use crate::project::{Column, ExecutionMode, Project};

/// Which part of the matrix a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunScope {
    #[default]
    All,
    Row(String),
    Column(String),
    Cell { document: String, column: String },
}

/// One dispatchable piece of work: a single cell in parallel mode, or every
/// planned column of one document in row-wise mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub document: PathBuf,
    pub document_name: String,
    pub columns: Vec<Column>,
}

impl WorkUnit {
    pub fn keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.columns
            .iter()
            .map(|column| CellKey::new(self.document_name.clone(), column.id.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub concurrency: usize,
    pub units: Vec<WorkUnit>,
    /// Summaries to generate once every unit is terminal; the overall summary,
    /// when present, comes last.
    pub summaries: Vec<SummaryScope>,
}

impl ExecutionPlan {
    pub fn build(
        project: &Project,
        scope: &RunScope,
        mode: ExecutionMode,
        concurrency: usize,
    ) -> Result<Self> {
        let documents: Vec<(PathBuf, String)> = match scope {
            RunScope::Row(name) | RunScope::Cell { document: name, .. } => {
                let path = project
                    .document(name)
                    .ok_or_else(|| EngineError::UnknownDocument(name.clone()))?;
                vec![(path.clone(), name.clone())]
            }
            RunScope::All | RunScope::Column(_) => project
                .documents
                .iter()
                .map(|path| (path.clone(), document_name(path)))
                .collect(),
        };
        let columns: Vec<Column> = match scope {
            RunScope::Column(id) | RunScope::Cell { column: id, .. } => {
                let column = project
                    .column(id)
                    .ok_or_else(|| EngineError::UnknownColumn(id.clone()))?;
                vec![column.clone()]
            }
            RunScope::All | RunScope::Row(_) => project.columns.clone(),
        };

        let mut units = Vec::new();
        for (document, document_name) in documents {
            match mode {
                ExecutionMode::Parallel => {
                    units.extend(columns.iter().map(|column| WorkUnit {
                        document: document.clone(),
                        document_name: document_name.clone(),
                        columns: vec![column.clone()],
                    }));
                }
                ExecutionMode::RowWise => units.push(WorkUnit {
                    document,
                    document_name,
                    columns: columns.clone(),
                }),
            }
        }

        let summaries = match scope {
            RunScope::All => project
                .document_names()
                .into_iter()
                .map(SummaryScope::Row)
                .chain(project.columns.iter().map(|c| SummaryScope::Column(c.id.clone())))
                .chain(std::iter::once(SummaryScope::Overall))
                .collect(),
            RunScope::Row(name) => vec![SummaryScope::Row(name.clone())],
            RunScope::Column(id) => vec![SummaryScope::Column(id.clone())],
            RunScope::Cell { .. } => Vec::new(),
        };

        Ok(Self {
            mode,
            concurrency: concurrency.max(1),
            units,
            summaries,
        })
    }

    pub fn cell_keys(&self) -> Vec<CellKey> {
        self.units.iter().flat_map(WorkUnit::keys).collect()
    }

    pub fn total_cells(&self) -> usize {
        self.units.iter().map(|unit| unit.columns.len()).sum()
    }
}
