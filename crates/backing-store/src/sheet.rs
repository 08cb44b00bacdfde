//! The spreadsheet seam.
//!
//! Orders and the reward catalog live in spreadsheet tabs addressed with A1
//! ranges such as `backers!A:J`. [`SheetStore`] is the only capability the rest
//! of the checkout needs from a spreadsheet backend: read a range and append
//! rows to it.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;

/// One spreadsheet row, cells as JSON scalars.
pub type Row = Vec<Value>;

#[derive(Debug, thiserror::Error)]
pub enum SheetStoreError {
    #[error("URL error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("service account authentication failed: {0}")]
    Auth(String),
    #[error("invalid range {0:?}")]
    InvalidRange(String),
    #[error("sheet store unavailable: {0}")]
    Unavailable(String),
}

/// Read and append access to the tabs of one spreadsheet.
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Returns the rows of `range`, possibly ragged, in sheet order.
    async fn read_range(&self, range: &str) -> Result<Vec<Row>, SheetStoreError>;

    /// Appends rows after the last non-empty row of `range`.
    async fn append_rows(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetStoreError>;
}

#[async_trait]
impl<T: SheetStore + ?Sized> SheetStore for Arc<T> {
    async fn read_range(&self, range: &str) -> Result<Vec<Row>, SheetStoreError> {
        (**self).read_range(range).await
    }

    async fn append_rows(&self, range: &str, rows: Vec<Row>) -> Result<(), SheetStoreError> {
        (**self).append_rows(range, rows).await
    }
}

/// A parsed `tab!A:J` range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRange {
    pub tab: String,
    /// Zero-based first column.
    pub first_column: usize,
    /// Zero-based last column, inclusive.
    pub last_column: usize,
}

impl SheetRange {
    pub fn parse(range: &str) -> Result<Self, SheetStoreError> {
        let invalid = || SheetStoreError::InvalidRange(range.to_string());
        let (tab, columns) = range.split_once('!').ok_or_else(invalid)?;
        let (first, last) = columns.split_once(':').unwrap_or((columns, columns));
        let first_column = column_index(first).ok_or_else(invalid)?;
        let last_column = column_index(last).ok_or_else(invalid)?;
        if tab.is_empty() || last_column < first_column {
            return Err(invalid());
        }
        Ok(Self {
            tab: tab.to_string(),
            first_column,
            last_column,
        })
    }

    pub fn width(&self) -> usize {
        self.last_column - self.first_column + 1
    }
}

/// `A` is 0, `Z` is 25, `AA` is 26.
fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let n = letters
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + usize::from(b - b'A' + 1));
    Some(n - 1)
}

/// Renders a cell the way the spreadsheet displays it.
pub fn cell_text(cell: Option<&Value>) -> String {
    match cell {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(true)) => "TRUE".to_string(),
        Some(Value::Bool(false)) => "FALSE".to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_column_ranges() {
        let range = SheetRange::parse("backers!A:J").unwrap();
        assert_eq!(range.tab, "backers");
        assert_eq!((range.first_column, range.last_column), (0, 9));
        assert_eq!(range.width(), 10);
        let single = SheetRange::parse("backing_items!A:A").unwrap();
        assert_eq!(single.width(), 1);
        assert_eq!(SheetRange::parse("t!AA:AB").unwrap().first_column, 26);
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!(SheetRange::parse("backers").is_err());
        assert!(SheetRange::parse("!A:B").is_err());
        assert!(SheetRange::parse("x!B:A").is_err());
        assert!(SheetRange::parse("x!a:b").is_err());
    }

    #[test]
    fn cell_text_matches_sheet_display() {
        assert_eq!(cell_text(Some(&json!("B001"))), "B001");
        assert_eq!(cell_text(Some(&json!(3000))), "3000");
        assert_eq!(cell_text(Some(&json!(true))), "TRUE");
        assert_eq!(cell_text(None), "");
    }
}
