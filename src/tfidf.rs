//! TF-IDF lexical scoring for the Keyword variant when the in-memory store
//! backend is bound.
//!
//! Corpus statistics are computed from the store contents at query time, so
//! the scorer needs no rebuild when documents are added between searches.
//! BM25 (via the disk backend) and this scorer are not score-compatible; the
//! keyword retriever picks whichever matches the bound backend.

use std::collections::HashMap;

use crate::document::Fragment;

/// TF-IDF statistics over one snapshot of store fragments.
pub struct TfIdfScorer<'a> {
    fragments: &'a [Fragment],
    /// Term -> number of fragments containing it.
    document_frequency: HashMap<String, usize>,
}

impl<'a> TfIdfScorer<'a> {
    /// Build statistics over the given corpus snapshot.
    pub fn new(fragments: &'a [Fragment]) -> Self {
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for fragment in fragments {
            let mut seen: Vec<String> = tokenize(&fragment.content);
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }
        Self {
            fragments,
            document_frequency,
        }
    }

    /// Score every fragment against the query and return the top `limit`
    /// matches, best first. Fragments with zero term overlap are omitted.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(Fragment, f32)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let n = self.fragments.len() as f32;
        let mut scored: Vec<(Fragment, f32)> = self
            .fragments
            .iter()
            .filter_map(|fragment| {
                let score = self.score(fragment, &query_terms, n);
                (score > 0.0).then(|| (fragment.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        scored
    }

    fn score(&self, fragment: &Fragment, query_terms: &[String], n: f32) -> f32 {
        let tokens = tokenize(&fragment.content);
        if tokens.is_empty() {
            return 0.0;
        }

        let mut term_frequency: HashMap<&str, usize> = HashMap::new();
        for token in &tokens {
            *term_frequency.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0;
        for term in query_terms {
            let tf = *term_frequency.get(term.as_str()).unwrap_or(&0) as f32
                / tokens.len() as f32;
            if tf == 0.0 {
                continue;
            }
            let df = *self.document_frequency.get(term).unwrap_or(&0) as f32;
            let idf = (1.0 + n / (1.0 + df)).ln();
            score += tf * idf;
        }
        score
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}
