//! CSV parsing for stash.
//!
//! The whole source is read and checked before anything is staged, so a
//! malformed file never leaves a partial import behind.

use crate::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;

/// One source row: column name → raw cell, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRow(Vec<(String, String)>);

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, replacing an earlier cell of the same name.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    /// Only the listed columns, order kept.
    pub fn retain_columns(&self, keep: &BTreeSet<String>) -> SourceRow {
        SourceRow(
            self.0
                .iter()
                .filter(|(c, _)| keep.contains(c))
                .cloned()
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SourceRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = SourceRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// A data row with its 1-based position in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRow {
    pub row_number: u64,
    pub fields: SourceRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<ParsedRow>,
}

/// Parses a CSV source with a header row.
///
/// Headers are trimmed; cells are kept verbatim. Fails when the source has
/// no header, a header is empty or repeated, or a row's length differs
/// from the header's.
pub fn parse_csv<R: Read>(reader: R, delimiter: u8) -> ImportResult<ParsedTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .flexible(false)
        .from_reader(reader);

    let raw_headers = rdr.headers().map_err(parse_error)?.clone();
    if raw_headers.is_empty() {
        return Err(ImportError::Parse("missing header row".to_string()));
    }

    let mut headers = Vec::with_capacity(raw_headers.len());
    let mut seen = BTreeSet::new();
    for (index, header) in raw_headers.iter().enumerate() {
        let header = header.trim().trim_start_matches('\u{feff}').trim();
        if header.is_empty() {
            return Err(ImportError::Parse(format!(
                "header in column {} is empty",
                index + 1
            )));
        }
        if !seen.insert(header.to_string()) {
            return Err(ImportError::Parse(format!("duplicate header {header:?}")));
        }
        headers.push(header.to_string());
    }

    let mut rows = Vec::new();
    for (index, record) in rdr.records().enumerate() {
        let record = record.map_err(parse_error)?;
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(ParsedRow {
            row_number: index as u64 + 1,
            fields,
        });
    }

    Ok(ParsedTable { headers, rows })
}

fn parse_error(e: csv::Error) -> ImportError {
    match e.kind() {
        csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } => {
            let line = pos.as_ref().map(|p| p.line()).unwrap_or_default();
            ImportError::Parse(format!(
                "line {line} has {len} fields, header has {expected_len}"
            ))
        }
        _ => ImportError::Parse(e.to_string()),
    }
}
