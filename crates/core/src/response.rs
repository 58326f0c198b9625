use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::citation::CitationRef;

/// Placeholder answer for a column a row-wise reply did not cover.
pub const NO_ANSWER: &str = "[No answer provided]";

/// An answer plus the citations the model listed next to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredAnswer {
    pub answer: String,
    pub citations: Vec<CitationRef>,
}

impl StructuredAnswer {
    pub fn plain(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            citations: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCitation {
    Quote(String),
    Object {
        text: String,
        #[serde(default)]
        source: Option<String>,
    },
}

impl From<RawCitation> for CitationRef {
    fn from(raw: RawCitation) -> Self {
        match raw {
            RawCitation::Quote(text) => CitationRef::quote(text),
            RawCitation::Object { text, source: Some(source) } => CitationRef::in_file(source, text),
            RawCitation::Object { text, source: None } => CitationRef::quote(text),
        }
    }
}

#[derive(Deserialize)]
struct RawAnswer {
    answer: String,
    #[serde(default)]
    citations: Vec<RawCitation>,
}

impl From<RawAnswer> for StructuredAnswer {
    fn from(raw: RawAnswer) -> Self {
        Self {
            answer: raw.answer,
            citations: raw.citations.into_iter().map(CitationRef::from).collect(),
        }
    }
}

/// The outermost `{...}` block of a reply, if any.
fn json_block(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Reads a single-answer reply; anything that is not the expected JSON is a plain answer.
pub fn parse_single(reply: &str) -> StructuredAnswer {
    json_block(reply)
        .and_then(|block| serde_json::from_str::<RawAnswer>(block).ok())
        .map(StructuredAnswer::from)
        .unwrap_or_else(|| StructuredAnswer::plain(reply.trim()))
}

/// Splits a row-wise reply into one answer per column id.
///
/// Columns missing from a well-formed reply get [`NO_ANSWER`]; an unparseable
/// reply is handed to every column whole.
pub fn parse_row_wise(reply: &str, column_ids: &[String]) -> BTreeMap<String, StructuredAnswer> {
    let answers = json_block(reply)
        .and_then(|block| serde_json::from_str::<Value>(block).ok())
        .and_then(|value| match value {
            Value::Object(mut map) => match map.remove("answers") {
                Some(Value::Object(answers)) => Some(answers),
                _ => None,
            },
            _ => None,
        });

    let Some(mut answers) = answers else {
        tracing::debug!(columns = column_ids.len(), "row-wise reply is not JSON, using it whole");
        return column_ids
            .iter()
            .map(|id| (id.clone(), StructuredAnswer::plain(reply.trim())))
            .collect();
    };

    column_ids
        .iter()
        .map(|id| {
            let answer = match answers.remove(id) {
                Some(Value::String(text)) => StructuredAnswer::plain(text),
                Some(value @ Value::Object(_)) => serde_json::from_value::<RawAnswer>(value.clone())
                    .map(StructuredAnswer::from)
                    .unwrap_or_else(|_| StructuredAnswer::plain(value.to_string())),
                Some(other) => StructuredAnswer::plain(other.to_string()),
                None => StructuredAnswer::plain(NO_ANSWER),
            };
            (id.clone(), answer)
        })
        .collect()
}
