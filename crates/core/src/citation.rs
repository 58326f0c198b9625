use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Exact,
    Approximate,
    Unresolved,
}

/// What a model pointed at: a quote, optionally qualified by a file name, or a raw char range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CitationRef {
    pub quote: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(usize, usize)>,
}

impl CitationRef {
    pub fn quote(quote: impl Into<String>) -> Self {
        Self {
            quote: quote.into(),
            source_file: None,
            position: None,
        }
    }

    pub fn in_file(source_file: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            quote: quote.into(),
            source_file: Some(source_file.into()),
            position: None,
        }
    }

    pub fn position(start: usize, end: usize) -> Self {
        Self {
            quote: String::new(),
            source_file: None,
            position: Some((start, end)),
        }
    }
}

/// A citation after resolution against a document's cached text.
///
/// Offsets and page are `None` exactly when `confidence` is `Unresolved`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub source_file: String,
    pub text: String,
    pub char_start: Option<usize>,
    pub char_end: Option<usize>,
    pub page: Option<u32>,
    pub confidence: Confidence,
    pub context: Option<String>,
    pub extraction_version: String,
    #[serde(default)]
    pub extraction_method: String,
}

impl Citation {
    pub fn is_resolved(&self) -> bool {
        self.confidence != Confidence::Unresolved
    }
}

/// Drops repeated citations, keyed by source file and the first 50 quote characters.
pub fn dedupe_citations(citations: impl IntoIterator<Item = Citation>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    citations
        .into_iter()
        .filter(|citation| {
            let prefix: String = citation.text.chars().take(50).collect();
            seen.insert((citation.source_file.clone(), prefix))
        })
        .collect()
}
