use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Text with whitespace collapsed, case folded, compatibility forms unified and
/// typographic quotes and dashes reduced to ASCII, remembering which source character every normalized character came from.
#[derive(Debug, Clone, Default)]
pub struct NormalizedText {
    pub text: String,
    origin: Vec<usize>,
}

impl NormalizedText {
    pub fn new(source: &str) -> Self {
        let mut text = String::with_capacity(source.len());
        let mut origin = Vec::with_capacity(source.len());
        let mut prev_space = true;
        for (idx, ch) in source.chars().enumerate() {
            if ch.is_whitespace() {
                if !prev_space {
                    text.push(' ');
                    origin.push(idx);
                    prev_space = true;
                }
                continue;
            }
            if ch.is_control() {
                continue;
            }
            for folded in ch.nfkc().flat_map(char::to_lowercase) {
                text.push(fold_punctuation(folded));
                origin.push(idx);
            }
            prev_space = false;
        }
        if text.ends_with(' ') {
            text.pop();
            origin.pop();
        }
        Self { text, origin }
    }

    pub fn char_len(&self) -> usize {
        self.origin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origin.is_empty()
    }

    /// Maps a normalized char range back to a `[start, end)` range of the source.
    pub fn source_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if start >= end || end > self.origin.len() {
            return None;
        }
        let first = self.origin[start];
        let last = self.origin[end - 1];
        Some((first, last + 1))
    }

    /// Char offsets of every non-overlapping occurrence of `needle`.
    pub fn find_all(&self, needle: &str) -> Vec<usize> {
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits = Vec::new();
        let mut search_from = 0usize;
        let mut chars_before = 0usize;
        let mut counted_to = 0usize;
        while let Some(rel) = self.text[search_from..].find(needle) {
            let byte = search_from + rel;
            chars_before += self.text[counted_to..byte].chars().count();
            counted_to = byte;
            hits.push(chars_before);
            search_from = byte + needle.len();
        }
        hits
    }
}

fn fold_punctuation(ch: char) -> char {
    match ch {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}'
        | '\u{00BB}' => '"',
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
        | '\u{2212}' => '-',
        other => other,
    }
}

pub fn normalize_quote(quote: &str) -> String {
    NormalizedText::new(quote).text
}

/// Cleans raw page text the way every paginated reader stores it.
pub fn clean_extracted(text: &str) -> String {
    static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r" +").unwrap());
    static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());
    let collapsed = SPACE_RUN.replace_all(text, " ");
    let paragraphs = BLANK_LINES.replace_all(&collapsed, "\n\n");
    paragraphs.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace_and_case() {
        let norm = NormalizedText::new("  Revenue\n\n  GREW   15%\t");
        assert_eq!(norm.text, "revenue grew 15%");
        assert_eq!(norm.source_range(8, 12), Some((13, 17)));
    }

    #[test]
    fn folds_compatibility_forms() {
        let norm = NormalizedText::new("ﬁnal Ｒｅｐｏｒｔ");
        assert_eq!(norm.text, "final report");
        // the ligature expands to two chars that both point at source char 0
        assert_eq!(norm.source_range(0, 2), Some((0, 1)));
    }

    #[test]
    fn folds_typographic_quotes_and_dashes() {
        let norm = NormalizedText::new("\u{201C}Net\u{201D} rose \u{2014} it\u{2019}s 2019\u{2013}2020");
        assert_eq!(norm.text, "\"net\" rose - it's 2019-2020");
        assert_eq!(norm.char_len(), norm.text.chars().count());
        assert_eq!(normalize_quote("it's 2019-2020"), "it's 2019-2020");
        assert_eq!(norm.find_all(&normalize_quote("It's 2019-2020")), vec![13]);
    }

    #[test]
    fn finds_all_occurrences_in_chars() {
        let norm = NormalizedText::new("é a é a");
        assert_eq!(norm.find_all("a"), vec![2, 6]);
        assert!(norm.find_all("").is_empty());
    }

    #[test]
    fn cleans_page_text() {
        assert_eq!(
            clean_extracted("  Title   line\n \n\n body  text  "),
            "Title line\n\n body text"
        );
    }
}
