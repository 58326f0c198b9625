//! Single-pass scanner for citation markers inside model answers.
//!
//! Recognised markers:
//! - `[n]`: 1-based index into a citations list supplied alongside the answer
//! - `[[cite:"quote"]]`
//! - `[[cite:file name:"quote"]]`
//! - `[[cite:START:END]]`
//!
//! Anything else, including malformed markers, stays literal text. Concatenating
//! the content of every span reproduces the input exactly.

use crate::citation::CitationRef;

const INLINE_OPEN: &str = "[[";
const INLINE_KEYWORD: &str = "cite:";
const INLINE_CLOSE: &str = "]]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Text(String),
    /// `index` points into [`ParsedAnswer::refs`]; `marker` is the raw marker text.
    Citation { index: usize, marker: String },
}

impl Span {
    pub fn content(&self) -> &str {
        match self {
            Span::Text(text) => text,
            Span::Citation { marker, .. } => marker,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub spans: Vec<Span>,
    /// Supplied references first, then inline markers in order of appearance.
    pub refs: Vec<CitationRef>,
}

impl ParsedAnswer {
    /// The original answer text.
    pub fn raw(&self) -> String {
        self.spans.iter().map(Span::content).collect()
    }

    /// Answer text with every marker replaced by its 1-based display number.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for span in &self.spans {
            match span {
                Span::Text(text) => out.push_str(text),
                Span::Citation { index, .. } => out.push_str(&format!("[{}]", index + 1)),
            }
        }
        out
    }

    pub fn citation_count(&self) -> usize {
        self.spans
            .iter()
            .filter(|span| matches!(span, Span::Citation { .. }))
            .count()
    }
}

pub fn parse(answer: &str, supplied: &[CitationRef]) -> ParsedAnswer {
    let mut parsed = ParsedAnswer {
        spans: Vec::new(),
        refs: supplied.to_vec(),
    };
    let mut literal = String::new();
    let mut pos = 0usize;

    while pos < answer.len() {
        let rest = &answer[pos..];
        let Some(open) = rest.find('[') else {
            literal.push_str(rest);
            break;
        };
        literal.push_str(&rest[..open]);
        pos += open;
        let rest = &answer[pos..];

        let marker = match scan_inline(rest) {
            Some((reference, len)) => {
                parsed.refs.push(reference);
                Some((parsed.refs.len() - 1, len))
            }
            None => scan_numbered(rest, supplied.len()),
        };
        match marker {
            Some((index, len)) => {
                if !literal.is_empty() {
                    parsed.spans.push(Span::Text(std::mem::take(&mut literal)));
                }
                parsed.spans.push(Span::Citation {
                    index,
                    marker: rest[..len].to_string(),
                });
                pos += len;
            }
            None => {
                literal.push('[');
                pos += 1;
            }
        }
    }
    if !literal.is_empty() {
        parsed.spans.push(Span::Text(literal));
    }
    parsed
}

/// `[n]` with `1 <= n <= supplied`. Returns the 0-based index and marker byte length.
fn scan_numbered(rest: &str, supplied: usize) -> Option<(usize, usize)> {
    let body = rest.strip_prefix('[')?;
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || !body[digits..].starts_with(']') {
        return None;
    }
    let n: usize = body[..digits].parse().ok()?;
    if n == 0 || n > supplied {
        return None;
    }
    Some((n - 1, digits + 2))
}

fn scan_inline(rest: &str) -> Option<(CitationRef, usize)> {
    let body = rest.strip_prefix(INLINE_OPEN)?;
    let keyword = body.get(..INLINE_KEYWORD.len())?;
    if !keyword.eq_ignore_ascii_case(INLINE_KEYWORD) {
        return None;
    }
    let body = &body[INLINE_KEYWORD.len()..];
    let (reference, used) = if body.starts_with('"') {
        scan_quote(body).map(|(quote, used)| (CitationRef::quote(quote), used))?
    } else if let Some(found) = scan_position(body) {
        found
    } else {
        scan_qualified(body)?
    };
    let consumed = INLINE_OPEN.len() + INLINE_KEYWORD.len() + used;
    Some((reference, consumed))
}

/// `"quote"]]`, quote non-empty and free of `"`.
fn scan_quote(body: &str) -> Option<(String, usize)> {
    let inner = body.strip_prefix('"')?;
    let close = inner.find('"')?;
    if close == 0 || !inner[close + 1..].starts_with(INLINE_CLOSE) {
        return None;
    }
    Some((inner[..close].to_string(), close + 2 + INLINE_CLOSE.len()))
}

/// `START:END]]` in character offsets.
fn scan_position(body: &str) -> Option<(CitationRef, usize)> {
    let start_len = body.bytes().take_while(u8::is_ascii_digit).count();
    if start_len == 0 || !body[start_len..].starts_with(':') {
        return None;
    }
    let tail = &body[start_len + 1..];
    let end_len = tail.bytes().take_while(u8::is_ascii_digit).count();
    if end_len == 0 || !tail[end_len..].starts_with(INLINE_CLOSE) {
        return None;
    }
    let start = body[..start_len].parse().ok()?;
    let end = tail[..end_len].parse().ok()?;
    Some((
        CitationRef::position(start, end),
        start_len + 1 + end_len + INLINE_CLOSE.len(),
    ))
}

/// `file name:"quote"]]`.
fn scan_qualified(body: &str) -> Option<(CitationRef, usize)> {
    let colon = body.find(':')?;
    let file = &body[..colon];
    if file.trim().is_empty() || file.contains(['"', '[', ']', '\n']) {
        return None;
    }
    let (quote, used) = scan_quote(&body[colon + 1..])?;
    Some((CitationRef::in_file(file.trim(), quote), colon + 1 + used))
}
