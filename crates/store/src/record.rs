use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use docmatrix_core::Citation;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Persisted key of a matrix cell, rendered as `<document>:<column id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CellKey {
    pub document: String,
    pub column: String,
}

impl CellKey {
    pub fn new(document: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document, self.column)
    }
}

/// Splits on the last `:` since document names may contain colons.
impl FromStr for CellKey {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.rsplit_once(':') {
            Some((document, column)) if !document.is_empty() && !column.is_empty() => {
                Ok(Self::new(document, column))
            }
            _ => Err(StoreError::InvalidKey(value.to_string())),
        }
    }
}

impl From<CellKey> for String {
    fn from(key: CellKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for CellKey {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl CellStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CellStatus::Completed | CellStatus::Error)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub status: CellStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CellRecord {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn running(model: impl Into<String>) -> Self {
        Self {
            status: CellStatus::Running,
            model: Some(model.into()),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn completed(
        model: impl Into<String>,
        answer: impl Into<String>,
        citations: Vec<Citation>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        Self {
            status: CellStatus::Completed,
            answer: Some(answer.into()),
            citations,
            input_tokens,
            output_tokens,
            model: Some(model.into()),
            finished_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn failed(model: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: CellStatus::Error,
            error: Some(error.into()),
            model: Some(model.into()),
            finished_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Row, column or overall summary text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub status: CellStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SummaryRecord {
    pub fn completed(
        text: impl Into<String>,
        citations: Vec<Citation>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        Self {
            status: CellStatus::Completed,
            text: Some(text.into()),
            citations,
            input_tokens,
            output_tokens,
            finished_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: CellStatus::Error,
            error: Some(error.into()),
            finished_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SummaryScope {
    Row(String),
    Column(String),
    Overall,
}

impl fmt::Display for SummaryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryScope::Row(document) => write!(f, "row:{document}"),
            SummaryScope::Column(column) => write!(f, "column:{column}"),
            SummaryScope::Overall => f.write_str("overall"),
        }
    }
}

/// Everything persisted for one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectResults {
    #[serde(default)]
    pub cells: BTreeMap<CellKey, CellRecord>,
    #[serde(default)]
    pub row_summaries: BTreeMap<String, SummaryRecord>,
    #[serde(default)]
    pub column_summaries: BTreeMap<String, SummaryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_summary: Option<SummaryRecord>,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProjectResults {
    pub fn cell(&self, key: &CellKey) -> Option<&CellRecord> {
        self.cells.get(key)
    }

    pub fn summary(&self, scope: &SummaryScope) -> Option<&SummaryRecord> {
        match scope {
            SummaryScope::Row(document) => self.row_summaries.get(document),
            SummaryScope::Column(column) => self.column_summaries.get(column),
            SummaryScope::Overall => self.overall_summary.as_ref(),
        }
    }

    pub fn count(&self, status: CellStatus) -> usize {
        self.cells.values().filter(|cell| cell.status == status).count()
    }

    pub fn apply(&mut self, update: ResultUpdate) {
        match update {
            ResultUpdate::Reset(keys) => {
                for key in keys {
                    self.cells.insert(key, CellRecord::pending());
                }
            }
            ResultUpdate::Cell { key, record } => {
                self.total_input_tokens += record.input_tokens;
                self.total_output_tokens += record.output_tokens;
                self.cells.insert(key, record);
            }
            ResultUpdate::Summary { scope, record } => {
                self.total_input_tokens += record.input_tokens;
                self.total_output_tokens += record.output_tokens;
                match scope {
                    SummaryScope::Row(document) => {
                        self.row_summaries.insert(document, record);
                    }
                    SummaryScope::Column(column) => {
                        self.column_summaries.insert(column, record);
                    }
                    SummaryScope::Overall => self.overall_summary = Some(record),
                }
            }
        }
        self.updated_at = Some(Utc::now());
    }
}

/// One serialized change to a project's results.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultUpdate {
    /// Puts every listed cell back to `pending` at the start of a run.
    Reset(Vec<CellKey>),
    Cell { key: CellKey, record: CellRecord },
    Summary { scope: SummaryScope, record: SummaryRecord },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_keys_split_on_the_last_colon() {
        let key: CellKey = "minutes 10:30.pdf:q1".parse().unwrap();
        assert_eq!(key, CellKey::new("minutes 10:30.pdf", "q1"));
        assert_eq!(key.to_string(), "minutes 10:30.pdf:q1");
        assert!("no-column".parse::<CellKey>().is_err());
        assert!("doc.pdf:".parse::<CellKey>().is_err());
    }

    #[test]
    fn results_serialize_with_string_keys() {
        let mut results = ProjectResults::default();
        results.apply(ResultUpdate::Cell {
            key: CellKey::new("a.pdf", "q1"),
            record: CellRecord::completed("m", "yes", Vec::new(), 100, 20),
        });
        let json = serde_json::to_value(&results).unwrap();
        assert_eq!(json["cells"]["a.pdf:q1"]["status"], "completed");
        let back: ProjectResults = serde_json::from_value(json).unwrap();
        assert_eq!(back.cells.len(), 1);
    }

    #[test]
    fn updates_accumulate_tokens_and_reset_cells() {
        let key = CellKey::new("a.pdf", "q1");
        let mut results = ProjectResults::default();
        results.apply(ResultUpdate::Cell {
            key: key.clone(),
            record: CellRecord::completed("m", "yes", Vec::new(), 100, 20),
        });
        results.apply(ResultUpdate::Summary {
            scope: SummaryScope::Row("a.pdf".into()),
            record: SummaryRecord::completed("short", Vec::new(), 50, 10),
        });
        assert_eq!((results.total_input_tokens, results.total_output_tokens), (150, 30));

        results.apply(ResultUpdate::Reset(vec![key.clone()]));
        assert_eq!(results.cell(&key).map(|c| c.status), Some(CellStatus::Pending));
        assert_eq!(results.total_input_tokens, 150);
        assert!(results.summary(&SummaryScope::Row("a.pdf".into())).is_some());
    }
}
