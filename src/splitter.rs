//! Preprocessing stage: cleans raw document text and splits it into
//! retrieval-sized fragments.
//!
//! Fragments are cut by word count while respecting sentence boundaries, with
//! no overlap between adjacent fragments. Header/footer boilerplate repeated
//! across form-feed-separated pages is stripped before splitting.

use crate::document::{Document, Fragment};

/// Default fragment length in words.
pub const DEFAULT_SPLIT_LENGTH: usize = 100;

/// Configuration for the cleaning and splitting stage.
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    pub clean_empty_lines: bool,
    pub clean_whitespace: bool,
    pub clean_header_footer: bool,
    /// Maximum fragment length in words.
    pub split_length: usize,
    pub respect_sentence_boundary: bool,
}

impl Default for Splitter {
    fn default() -> Self {
        Self {
            clean_empty_lines: true,
            clean_whitespace: true,
            clean_header_footer: true,
            split_length: DEFAULT_SPLIT_LENGTH,
            respect_sentence_boundary: true,
        }
    }
}

impl Splitter {
    /// Clean and split one document into ordered fragments.
    ///
    /// Documents whose cleaned text is empty produce no fragments.
    pub fn split(&self, document: &Document) -> Vec<Fragment> {
        let cleaned = self.clean(&document.content);
        if cleaned.trim().is_empty() {
            return Vec::new();
        }

        let pieces = if self.respect_sentence_boundary {
            split_by_sentences(&cleaned, self.split_length)
        } else {
            split_by_words(&cleaned, self.split_length)
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| Fragment::new(document, i, text))
            .collect()
    }

    fn clean(&self, text: &str) -> String {
        let mut text = text.to_string();

        if self.clean_header_footer {
            text = strip_header_footer(&text);
        }

        let mut lines: Vec<String> = text
            .lines()
            .map(|l| {
                if self.clean_whitespace {
                    l.trim().to_string()
                } else {
                    l.to_string()
                }
            })
            .collect();

        if self.clean_empty_lines {
            let mut collapsed = Vec::with_capacity(lines.len());
            let mut prev_blank = false;
            for line in lines.drain(..) {
                let blank = line.is_empty();
                if !(blank && prev_blank) {
                    collapsed.push(line);
                }
                prev_blank = blank;
            }
            lines = collapsed;
        }

        lines.join("\n").trim().to_string()
    }
}

/// Strip first/last lines repeated verbatim on every form-feed-separated page.
fn strip_header_footer(text: &str) -> String {
    let pages: Vec<&str> = text.split('\u{c}').collect();
    if pages.len() < 2 {
        return text.to_string();
    }

    let first_lines: Vec<Option<&str>> = pages
        .iter()
        .map(|p| p.lines().find(|l| !l.trim().is_empty()))
        .collect();
    let last_lines: Vec<Option<&str>> = pages
        .iter()
        .map(|p| p.lines().rev().find(|l| !l.trim().is_empty()))
        .collect();

    let header = common_line(&first_lines);
    let footer = common_line(&last_lines);

    let stripped: Vec<String> = pages
        .iter()
        .map(|page| {
            page.lines()
                .filter(|l| {
                    let t = l.trim();
                    t.is_empty()
                        || (Some(t) != header.as_deref()
                            && Some(t) != footer.as_deref())
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect();

    stripped.join("\n")
}

fn common_line(candidates: &[Option<&str>]) -> Option<String> {
    let first = candidates.first()?.map(str::trim)?;
    if candidates
        .iter()
        .all(|c| c.map(str::trim) == Some(first))
    {
        Some(first.to_string())
    } else {
        None
    }
}

/// Split text into sentence-bounded windows of at most `max_words` words.
///
/// A single sentence longer than `max_words` is hard-split by words so no
/// fragment ever exceeds the limit.
fn split_by_sentences(text: &str, max_words: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let sentences = sentence_spans(text);

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_words = 0;

    for sentence in sentences {
        let words = sentence.split_whitespace().count();
        if words == 0 {
            continue;
        }

        if words > max_words {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_words = 0;
            }
            pieces.extend(split_by_words(sentence, max_words));
            continue;
        }

        if current_words + words > max_words && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_words = 0;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence.trim());
        current_words += words;
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

fn split_by_words(text: &str, max_words: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words)
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Cut text into sentences at `.`, `!`, or `?` followed by whitespace.
fn sentence_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if (c == b'.' || c == b'!' || c == b'?')
            && bytes
                .get(i + 1)
                .is_none_or(|&next| next.is_ascii_whitespace())
        {
            let span = text[start..=i].trim();
            if !span.is_empty() {
                spans.push(span);
            }
            start = i + 1;
        }
        i += 1;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        spans.push(tail);
    }

    spans
}
