//! Document parsers for the supported upload kinds.
//!
//! Each parser reads a file from disk and returns its logical documents:
//! one for plain text, one per page for PDF, and one per row for CSV.
//! Parsers never panic on malformed input; they return an [`ExtractError`].

use std::path::Path;

use docqa_core::models::FileKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("text file is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("CSV parsing failed: {0}")]
    Csv(String),
}

/// Parses a file of one kind into ordered logical documents.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<String>, ExtractError>;
}

pub struct TextParser;
pub struct PdfParser;
pub struct CsvParser;

/// Parser for a file kind.
pub fn parser_for(kind: FileKind) -> Box<dyn DocumentParser> {
    match kind {
        FileKind::Text => Box::new(TextParser),
        FileKind::Pdf => Box::new(PdfParser),
        FileKind::Csv => Box::new(CsvParser),
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|e| ExtractError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

impl DocumentParser for TextParser {
    fn parse(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let bytes = read_bytes(path)?;
        let text = String::from_utf8(bytes).map_err(|e| ExtractError::Encoding(e.to_string()))?;
        Ok(vec![text])
    }
}

impl DocumentParser for PdfParser {
    fn parse(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let bytes = read_bytes(path)?;
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(split_pages(&text))
    }
}

/// Pages are separated by form feeds; blank pages are dropped.
fn split_pages(text: &str) -> Vec<String> {
    text.split('\u{c}')
        .filter(|page| !page.trim().is_empty())
        .map(|page| page.to_string())
        .collect()
}

impl DocumentParser for CsvParser {
    fn parse(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let bytes = read_bytes(path)?;
        csv_rows(&bytes)
    }
}

/// Render each CSV row as `header: value` lines.
fn csv_rows(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ExtractError::Csv(e.to_string()))?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        let lines: Vec<String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| format!("{}: {}", h.trim(), v.trim()))
            .collect();
        rows.push(lines.join("\n"));
    }
    Ok(rows)
}
