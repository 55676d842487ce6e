//! Manifest row types.

use std::fmt;

use serde::Serialize;

/// One validated manifest row.
///
/// Built once by the reader and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestRecord {
    /// Identifier, unique within the manifest.
    pub identifier: String,
    /// Absolute URL of the remote file.
    pub remote_url: String,
    /// Target path relative to the output directory.
    pub relative_path: String,
    /// Expected size of the complete file in bytes.
    pub expected_size: u64,
    /// 1-based data row this record was read from.
    pub row: usize,
}

impl ManifestRecord {
    /// Create a record. The reader is responsible for validating the fields.
    pub fn new(
        identifier: impl Into<String>,
        remote_url: impl Into<String>,
        relative_path: impl Into<String>,
        expected_size: u64,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            remote_url: remote_url.into(),
            relative_path: relative_path.into(),
            expected_size,
            row: 0,
        }
    }

    /// Set the data row number.
    pub fn at_row(mut self, row: usize) -> Self {
        self.row = row;
        self
    }
}

/// Why a single manifest row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowErrorKind {
    #[error("missing field '{column}'")]
    MissingField { column: String },

    #[error("empty field '{column}'")]
    EmptyField { column: String },

    #[error("invalid size '{value}': expected a non-negative integer")]
    InvalidSize { value: String },

    #[error("invalid URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("unsafe target path '{value}'")]
    UnsafePath { value: String },

    #[error("duplicate target path '{value}' (first seen on row {first_row})")]
    DuplicatePath { value: String, first_row: usize },

    #[error("duplicate identifier '{value}' (first seen on row {first_row})")]
    DuplicateIdentifier { value: String, first_row: usize },

    #[error("malformed row: {reason}")]
    Malformed { reason: String },
}

/// A rejected manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// 1-based data row (the first row after the header is row 1).
    pub row: usize,
    /// 1-based line in the input, when known.
    pub line: Option<u64>,
    #[serde(flatten)]
    pub kind: RowErrorKind,
}

impl RowError {
    pub fn new(row: usize, line: Option<u64>, kind: RowErrorKind) -> Self {
        Self { row, line, kind }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "row {} (line {}): {}", self.row, line, self.kind),
            None => write!(f, "row {}: {}", self.row, self.kind),
        }
    }
}

impl std::error::Error for RowError {}

/// Result of reading a manifest: records and rejected rows, each in input order.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub records: Vec<ManifestRecord>,
    pub row_errors: Vec<RowError>,
}

impl Manifest {
    /// Total number of data rows seen.
    pub fn rows(&self) -> usize {
        self.records.len() + self.row_errors.len()
    }

    pub fn has_row_errors(&self) -> bool {
        !self.row_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_error_display_with_line() {
        let err = RowError::new(
            3,
            Some(5),
            RowErrorKind::MissingField {
                column: "File size".to_string(),
            },
        );
        assert_eq!(err.to_string(), "row 3 (line 5): missing field 'File size'");
    }

    #[test]
    fn test_row_error_display_without_line() {
        let err = RowError::new(
            1,
            None,
            RowErrorKind::InvalidSize {
                value: "-4".to_string(),
            },
        );
        assert!(err.to_string().starts_with("row 1: invalid size '-4'"));
    }

    #[test]
    fn test_manifest_counts_rows() {
        let manifest = Manifest {
            records: vec![ManifestRecord::new("a", "http://x/a", "a", 1).at_row(1)],
            row_errors: vec![RowError::new(
                2,
                None,
                RowErrorKind::EmptyField {
                    column: "ID".to_string(),
                },
            )],
        };
        assert_eq!(manifest.rows(), 2);
        assert!(manifest.has_row_errors());
    }
}
