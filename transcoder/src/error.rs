//! Error types for the Avails transcoder.
//!
//! One enum per layer:
//!
//! - [`SheetError`] - spreadsheet reading and writing
//! - [`PathError`] - path template compilation and materialization
//! - [`MappingError`] - mapping specification loading (configuration errors)
//! - [`XmlError`] - XML parsing and serialization
//! - [`RowError`] - per-row ingestion failures
//! - [`TranscodeError`] - top-level orchestration errors
//!
//! Conversion is automatic via `From` implementations, so `?` works
//! across layer boundaries.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// Spreadsheet Errors
// =============================================================================

/// Errors while reading or writing spreadsheets.
#[derive(Debug, Error)]
pub enum SheetError {
    /// Failed to read or write a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content could not be decoded.
    #[error("Failed to decode content: {0}")]
    Encoding(String),

    /// Malformed CSV record.
    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook could not be opened or a sheet read.
    #[error("Invalid workbook: {0}")]
    Excel(String),

    /// File extension not handled by any reader.
    #[error("Unsupported spreadsheet format: {0}")]
    UnsupportedFormat(String),

    /// The workbook or file holds no rows.
    #[error("Spreadsheet is empty")]
    Empty,
}

// =============================================================================
// Path Errors
// =============================================================================

/// Errors from compiling or materializing a path template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path template")]
    Empty,

    #[error("namespace placeholder '{{{0}}}' is not bound")]
    UnboundNamespace(String),

    #[error("unclosed namespace placeholder in '{0}'")]
    UnclosedPlaceholder(String),

    #[error("empty step in '{0}'")]
    EmptyStep(String),

    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("attribute step '@{0}' must be the last step")]
    AttributeNotLast(String),

    #[error("malformed predicate '[{0}]'")]
    MalformedPredicate(String),

    #[error("path '{template}' selects {found}, expected {expected}")]
    TargetMismatch {
        template: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("'..' has no parent to step to")]
    NoParent,

    #[error("predicate '[{0}]' cannot be materialized")]
    Unmaterializable(String),
}

// =============================================================================
// Mapping Errors (configuration)
// =============================================================================

/// Configuration errors: an invalid mapping specification.
///
/// These are fatal at load time, since every row would fail identically.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Mapping JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mapping does not match the mapping schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Invalid column key '{0}'")]
    InvalidKey(String),

    #[error("Unknown column category in '{0}'")]
    UnknownCategory(String),

    #[error("Column '{key}' references unknown transform function '{name}'")]
    UnknownFunction { key: String, name: String },

    #[error("Column '{key}': {source}")]
    Path {
        key: String,
        #[source]
        source: PathError,
    },

    #[error("Mapping must bind the '{0}' namespace")]
    MissingNamespace(String),

    #[error("Column '{0}' lists no alternative paths")]
    EmptyAlternatives(String),

    #[error("Boundary column '{0}' must list a date path and a condition path")]
    InvalidBoundary(String),

    #[error("Mapping lacks required linking column '{0}'")]
    MissingColumn(String),

    #[error("Unknown mapping version '{0}'")]
    UnknownVersion(String),

    #[error("Failed to read mapping {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// XML Errors
// =============================================================================

/// Errors while reading or writing XML documents.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(#[from] roxmltree::Error),

    #[error("XML write error: {0}")]
    Write(#[from] quick_xml::Error),

    #[error("Serialized XML is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Document has no root element")]
    NoRoot,
}

// =============================================================================
// Row Errors
// =============================================================================

/// A data row that cannot be ingested. The row is skipped, the document
/// build continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("row {row}: required column '{column}' is empty")]
    MissingField { row: usize, column: String },

    #[error("row {row}: unrecognized PriceType '{value}'")]
    UnknownPriceType { row: usize, value: String },

    #[error("row {row}, column '{column}': {source}")]
    Path {
        row: usize,
        column: String,
        #[source]
        source: PathError,
    },
}

impl RowError {
    /// 1-based spreadsheet row the error belongs to.
    pub fn row(&self) -> usize {
        match self {
            RowError::MissingField { row, .. }
            | RowError::UnknownPriceType { row, .. }
            | RowError::Path { row, .. } => *row,
        }
    }
}

// =============================================================================
// Transcode Errors (top-level)
// =============================================================================

/// Top-level errors returned by the pipeline functions.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Spreadsheet error: {0}")]
    Sheet(#[from] SheetError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("XML error: {0}")]
    Xml(#[from] XmlError),

    #[error("No mapping matches document namespace '{0}'")]
    UndetectedVersion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for spreadsheet operations.
pub type SheetResult<T> = Result<T, SheetError>;

/// Result type for mapping loading.
pub type MappingResult<T> = Result<T, MappingError>;

/// Result type for XML operations.
pub type XmlResult<T> = Result<T, XmlError>;

/// Result type for pipeline operations.
pub type TranscodeResult<T> = Result<T, TranscodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let sheet_err = SheetError::Empty;
        let err: TranscodeError = sheet_err.into();
        assert!(err.to_string().contains("empty"));

        let mapping_err = MappingError::MissingColumn("Avail:ALID".into());
        let err: TranscodeError = mapping_err.into();
        assert!(err.to_string().contains("Avail:ALID"));
    }

    #[test]
    fn test_row_error_carries_row_number() {
        let err = RowError::UnknownPriceType {
            row: 7,
            value: "Bogus".into(),
        };
        assert_eq!(err.row(), 7);
        assert!(err.to_string().contains("row 7"));
        assert!(err.to_string().contains("Bogus"));
    }

    #[test]
    fn test_placeholder_error_format() {
        let err = PathError::UnboundNamespace("mdmec".into());
        assert_eq!(err.to_string(), "namespace placeholder '{mdmec}' is not bound");
    }
}
