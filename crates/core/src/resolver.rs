use std::borrow::Borrow;
use std::collections::HashSet;

use crate::citation::{Citation, CitationRef, Confidence};
use crate::document::Document;
use crate::normalization::{normalize_quote, NormalizedText};

/// Characters of surrounding text kept on each side of a resolved quote.
pub const CONTEXT_RADIUS: usize = 150;
/// Minimum normalized Levenshtein similarity for a fuzzy match.
pub const FUZZY_THRESHOLD: f64 = 0.80;
const FUZZY_CANDIDATES: usize = 8;

/// Locates `reference` inside `doc`. Never fails: misses come back as `Unresolved`.
///
/// Identical inputs always give identical outputs; ties go to the earliest match.
pub fn resolve(reference: &CitationRef, doc: &Document) -> Citation {
    let located = match reference.position {
        Some((start, end)) => locate_position(doc, start, end),
        None => locate_quote(&doc.text, &reference.quote),
    };
    match located {
        Some((start, end, confidence)) => {
            let text = match reference.position {
                Some(_) => doc.slice_chars(start, end),
                None => reference.quote.clone(),
            };
            Citation {
                source_file: doc.name.clone(),
                text,
                char_start: Some(start),
                char_end: Some(end),
                page: doc.page_for(start),
                confidence,
                context: Some(doc.context_around(start, end, CONTEXT_RADIUS)),
                extraction_version: doc.extraction_version.clone(),
                extraction_method: doc.extraction_method.clone(),
            }
        }
        None => {
            tracing::debug!(document = %doc.name, quote = %reference.quote, "citation unresolved");
            unresolved(reference, &doc.name, Some(doc))
        }
    }
}

/// Resolves against whichever candidate the reference names, defaulting to the first.
pub fn resolve_in<D: Borrow<Document>>(reference: &CitationRef, sources: &[D]) -> Citation {
    match pick_source(reference, sources) {
        Some(doc) => resolve(reference, doc),
        None => {
            let name = reference.source_file.as_deref().unwrap_or("unknown");
            unresolved(reference, name, None)
        }
    }
}

fn pick_source<'a, D: Borrow<Document>>(
    reference: &CitationRef,
    sources: &'a [D],
) -> Option<&'a Document> {
    let first: &Document = Borrow::<Document>::borrow(sources.first()?);
    let Some(wanted) = reference.source_file.as_deref().map(str::to_lowercase) else {
        return Some(first);
    };
    sources
        .iter()
        .map(|source| Borrow::<Document>::borrow(source))
        .find(|doc| {
            let name = doc.name.to_lowercase();
            name.contains(&wanted) || wanted.contains(&name)
        })
        .or(Some(first))
}

fn unresolved(reference: &CitationRef, source_file: &str, doc: Option<&Document>) -> Citation {
    let text = match reference.position {
        Some((start, end)) if reference.quote.is_empty() => format!("[position {start}:{end}]"),
        _ => reference.quote.clone(),
    };
    Citation {
        source_file: source_file.to_string(),
        text,
        char_start: None,
        char_end: None,
        page: None,
        confidence: Confidence::Unresolved,
        context: None,
        extraction_version: doc.map(|d| d.extraction_version.clone()).unwrap_or_default(),
        extraction_method: doc.map(|d| d.extraction_method.clone()).unwrap_or_default(),
    }
}

fn locate_position(doc: &Document, start: usize, end: usize) -> Option<(usize, usize, Confidence)> {
    (start < end && end <= doc.char_len()).then_some((start, end, Confidence::Exact))
}

fn locate_quote(text: &str, quote: &str) -> Option<(usize, usize, Confidence)> {
    if quote.trim().is_empty() || text.is_empty() {
        return None;
    }
    locate_exact(text, quote).or_else(|| {
        let norm = NormalizedText::new(text);
        let needle = normalize_quote(quote);
        locate_normalized(&norm, &needle).or_else(|| locate_fuzzy(&norm, &needle))
    })
}

fn locate_exact(text: &str, quote: &str) -> Option<(usize, usize, Confidence)> {
    let mut hits = text.match_indices(quote).map(|(byte, _)| byte);
    let first = hits.next()?;
    let confidence = if hits.next().is_some() {
        Confidence::Approximate
    } else {
        Confidence::Exact
    };
    let start = text[..first].chars().count();
    Some((start, start + quote.chars().count(), confidence))
}

fn locate_normalized(norm: &NormalizedText, needle: &str) -> Option<(usize, usize, Confidence)> {
    let hit = *norm.find_all(needle).first()?;
    let (start, end) = norm.source_range(hit, hit + needle.chars().count())?;
    Some((start, end, Confidence::Approximate))
}

/// Best word window of the quote's length, pre-filtered by shared words.
fn locate_fuzzy(norm: &NormalizedText, needle: &str) -> Option<(usize, usize, Confidence)> {
    let chars: Vec<char> = norm.text.chars().collect();
    let words = word_spans(&chars);
    let quote_words: Vec<&str> = needle.split(' ').filter(|w| !w.is_empty()).collect();
    let width = quote_words.len();
    if width == 0 || words.len() < width {
        return None;
    }
    let vocabulary: HashSet<&str> = quote_words.iter().copied().collect();

    let mut shared_prefix = Vec::with_capacity(words.len() + 1);
    shared_prefix.push(0usize);
    for &(start, end) in &words {
        let word: String = chars[start..end].iter().collect();
        let shared = usize::from(vocabulary.contains(word.as_str()));
        shared_prefix.push(shared_prefix[shared_prefix.len() - 1] + shared);
    }

    let mut candidates: Vec<(usize, usize)> = (0..=words.len() - width)
        .map(|first| (shared_prefix[first + width] - shared_prefix[first], first))
        .filter(|&(shared, _)| shared > 0)
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    candidates.truncate(FUZZY_CANDIDATES);

    let mut best: Option<(f64, usize, usize)> = None;
    for (_, first) in candidates {
        let start = words[first].0;
        let end = words[first + width - 1].1;
        let window: String = chars[start..end].iter().collect();
        let score = strsim::normalized_levenshtein(&window, needle);
        let better = match best {
            Some((top, top_start, _)) => score > top || (score == top && start < top_start),
            None => true,
        };
        if score >= FUZZY_THRESHOLD && better {
            best = Some((score, start, end));
        }
    }
    let (_, start, end) = best?;
    let (start, end) = norm.source_range(start, end)?;
    Some((start, end, Confidence::Approximate))
}

fn word_spans(chars: &[char]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in chars.iter().enumerate() {
        match (ch.is_whitespace(), start) {
            (true, Some(begin)) => {
                spans.push((begin, idx));
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(begin) = start {
        spans.push((begin, chars.len()));
    }
    spans
}
