//! Tabular document parsing.
//!
//! Spreadsheet exports often carry title rows, notes or blank lines above the
//! real table, so the header row is found by scanning for a marker column
//! instead of assuming it is the first line.

use std::collections::BTreeMap;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Why a document could not be turned into rows.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no header row containing column '{marker}' was found")]
    HeaderNotFound { marker: String },

    #[error("malformed document at line {line}: {message}")]
    Malformed { line: u64, message: String },
}

/// One data row, keyed by header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based line number in the source document.
    pub line: u64,
    pub values: BTreeMap<String, String>,
}

impl Row {
    /// Trimmed value of `column`, matched case-insensitively. Empty reads as absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// A parsed document: its header and every non-blank row below it.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub header_line: u64,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

/// Parse CSV `data`, locating the header row by `header_marker`.
pub fn parse_document(data: &[u8], header_marker: &str) -> Result<ParsedDocument, ParseError> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let marker = header_marker.trim();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut header: Option<(u64, Vec<String>)> = None;
    let mut rows = Vec::new();

    for result in reader.records() {
        let record = result.map_err(|e| ParseError::Malformed {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            message: e.to_string(),
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        match &header {
            None => {
                if record
                    .iter()
                    .any(|field| field.trim().eq_ignore_ascii_case(marker))
                {
                    let names = record.iter().map(|f| f.trim().to_string()).collect();
                    header = Some((line, names));
                }
            }
            Some((_, names)) => {
                let values = names
                    .iter()
                    .zip(record.iter())
                    .filter(|(name, _)| !name.is_empty())
                    .map(|(name, value)| (name.clone(), value.trim().to_string()))
                    .collect();
                rows.push(Row { line, values });
            }
        }
    }

    let (header_line, headers) = header.ok_or_else(|| ParseError::HeaderNotFound {
        marker: marker.to_string(),
    })?;

    Ok(ParsedDocument {
        header_line,
        headers,
        rows,
    })
}
