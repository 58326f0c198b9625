mod cache;
mod citation;
mod document;
mod error;
mod extract;
mod normalization;
mod parser;
mod resolver;
mod response;

pub use cache::TextCache;
pub use citation::{dedupe_citations, Citation, CitationRef, Confidence};
pub use document::{
    document_name, page_for_offset, Document, FileType, Fingerprint, EXTRACTION_VERSION,
};
pub use error::{ExtractionError, Result};
pub use extract::{extract, Extracted};
pub use normalization::{normalize_quote, NormalizedText};
pub use parser::{parse, ParsedAnswer, Span};
pub use resolver::{resolve, resolve_in, CONTEXT_RADIUS, FUZZY_THRESHOLD};
pub use response::{parse_row_wise, parse_single, StructuredAnswer, NO_ANSWER};
