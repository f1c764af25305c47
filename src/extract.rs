//! Input extraction collaborators: turn uploaded files and URLs into plain
//! text ready for indexing.
//!
//! Plain text and CSV are handled natively. PDF, image, and audio inputs go
//! through pluggable transcriber hooks; without a registered hook they fail
//! as [`Error::UnsupportedInputType`], which callers recover from by
//! dropping the record at the boundary.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Converts one binary payload (scan, recording, PDF) into text.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, bytes: &[u8]) -> Result<String>;
}

/// Media-type dispatching text extractor.
#[derive(Default)]
pub struct TextExtractor {
    pdf: Option<Box<dyn Transcriber>>,
    image: Option<Box<dyn Transcriber>>,
    audio: Option<Box<dyn Transcriber>>,
}

impl TextExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pdf_transcriber(mut self, t: Box<dyn Transcriber>) -> Self {
        self.pdf = Some(t);
        self
    }

    pub fn with_image_transcriber(mut self, t: Box<dyn Transcriber>) -> Self {
        self.image = Some(t);
        self
    }

    pub fn with_audio_transcriber(mut self, t: Box<dyn Transcriber>) -> Self {
        self.audio = Some(t);
        self
    }

    /// Extract plain text from a file's bytes, dispatching on media type.
    pub fn extract_text_from_file(
        &self,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<String> {
        match media_type {
            "text/plain" => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    Error::Config(format!("text file is not valid UTF-8: {e}"))
                })?;
                Ok(text.to_string())
            }
            "text/csv" => extract_csv_text(bytes),
            "application/pdf" => self.run_hook(&self.pdf, bytes, media_type),
            t if t.starts_with("image/") => {
                self.run_hook(&self.image, bytes, media_type)
            }
            t if t.starts_with("audio/") => {
                self.run_hook(&self.audio, bytes, media_type)
            }
            other => Err(Error::UnsupportedInputType {
                media_type: other.to_string(),
            }),
        }
    }

    /// Boundary variant: unsupported inputs are dropped with a warning
    /// instead of failing the whole batch. Other errors still propagate.
    pub fn extract_or_skip(
        &self,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<Option<String>> {
        match self.extract_text_from_file(bytes, media_type) {
            Ok(text) => Ok(Some(text)),
            Err(Error::UnsupportedInputType { media_type }) => {
                tracing::warn!(%media_type, "dropping unsupported input");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn run_hook(
        &self,
        hook: &Option<Box<dyn Transcriber>>,
        bytes: &[u8],
        media_type: &str,
    ) -> Result<String> {
        match hook {
            Some(t) => t.transcribe(bytes),
            None => Err(Error::UnsupportedInputType {
                media_type: media_type.to_string(),
            }),
        }
    }
}

/// Extract the text content of a CSV payload.
///
/// Only string-typed columns contribute: a column where every non-empty data
/// cell parses as a number is considered numeric and dropped entirely, as
/// are the header names. A fully numeric sheet yields empty text.
fn extract_csv_text(bytes: &[u8]) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut rows: Vec<csv::StringRecord> = Vec::new();
    for record in reader.records() {
        rows.push(record?);
    }
    if rows.is_empty() {
        return Ok(String::new());
    }

    let columns = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let keep: Vec<bool> = (0..columns)
        .map(|col| !column_is_numeric(&rows, col))
        .collect();

    let mut lines = Vec::new();
    for row in &rows {
        let cells: Vec<&str> = row
            .iter()
            .enumerate()
            .filter(|(col, cell)| keep[*col] && !cell.trim().is_empty())
            .map(|(_, cell)| cell)
            .collect();
        if !cells.is_empty() {
            lines.push(cells.join(" "));
        }
    }

    Ok(lines.join("\n"))
}

fn column_is_numeric(rows: &[csv::StringRecord], col: usize) -> bool {
    let mut saw_value = false;
    for row in rows {
        let Some(cell) = row.get(col) else { continue };
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        if cell.parse::<f64>().is_err() {
            return false;
        }
        saw_value = true;
    }
    saw_value
}

/// Fetches the readable article text behind a URL.
pub trait ArticleFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// URL extractor with per-instance memoization: each URL is fetched at most
/// once for the extractor's lifetime.
pub struct UrlExtractor {
    fetcher: Box<dyn ArticleFetcher>,
    cache: HashMap<String, String>,
}

impl UrlExtractor {
    pub fn new(fetcher: Box<dyn ArticleFetcher>) -> Self {
        Self {
            fetcher,
            cache: HashMap::new(),
        }
    }

    pub fn extract(&mut self, url: &str) -> Result<String> {
        if let Some(text) = self.cache.get(url) {
            return Ok(text.clone());
        }
        let text = self.fetcher.fetch(url)?;
        self.cache.insert(url.to_string(), text.clone());
        Ok(text)
    }
}
