use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, Result};

/// Tag of the current extraction algorithm. Bumping it invalidates every cache entry.
pub const EXTRACTION_VERSION: &str = "2";

const CONTEXT_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    PlainText,
    Markdown,
    Csv,
    Json,
    Pdf,
    Docx,
    Xlsx,
}

impl FileType {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        Self::from_extension(&ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "txt" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::PlainText => "txt",
            FileType::Markdown => "md",
            FileType::Csv => "csv",
            FileType::Json => "json",
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Xlsx => "xlsx",
        }
    }

    /// Paginated types record page boundaries; sheets count as pages for workbooks.
    pub fn is_paginated(&self) -> bool {
        matches!(self, FileType::Pdf | FileType::Xlsx)
    }
}

/// Modification fingerprint of a file on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub modified_ms: u128,
    pub size: u64,
}

impl Fingerprint {
    pub fn of(path: &Path) -> Result<Self> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractionError::Missing(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        if !meta.is_file() {
            return Err(ExtractionError::Missing(path.to_path_buf()));
        }
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or(0);
        Ok(Self {
            modified_ms,
            size: meta.len(),
        })
    }
}

/// A source document together with its cached extracted text.
///
/// Offsets (`page_boundaries`, citation ranges) count Unicode scalar values, not bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub path: PathBuf,
    pub file_type: FileType,
    pub size: u64,
    pub fingerprint: Fingerprint,
    pub text: String,
    pub extraction_version: String,
    pub extraction_method: String,
    pub page_boundaries: Vec<usize>,
}

impl Document {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn page_count(&self) -> usize {
        self.page_boundaries.len()
    }

    pub fn is_paginated(&self) -> bool {
        !self.page_boundaries.is_empty()
    }

    /// 1-based page holding `char_start`, `None` for non-paginated documents.
    pub fn page_for(&self, char_start: usize) -> Option<u32> {
        page_for_offset(&self.page_boundaries, char_start)
    }

    /// Characters `[start, end)` of the cached text, clamped to its bounds.
    pub fn slice_chars(&self, start: usize, end: usize) -> String {
        if end <= start {
            return String::new();
        }
        self.text.chars().skip(start).take(end - start).collect()
    }

    pub fn context_around(&self, start: usize, end: usize, radius: usize) -> String {
        let total = self.char_len();
        let from = start.saturating_sub(radius).min(total);
        let to = end.saturating_add(radius).min(total);
        let mut out = String::new();
        if from > 0 {
            out.push_str(CONTEXT_ELLIPSIS);
        }
        out.push_str(&self.slice_chars(from, to));
        if to < total {
            out.push_str(CONTEXT_ELLIPSIS);
        }
        out
    }
}

pub fn page_for_offset(boundaries: &[usize], char_start: usize) -> Option<u32> {
    if boundaries.is_empty() {
        return None;
    }
    let page = boundaries.partition_point(|&start| start <= char_start);
    Some(page.max(1) as u32)
}

pub fn document_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
        .unwrap_or_else(|| path.display().to_string())
}
