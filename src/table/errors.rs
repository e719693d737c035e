//! table::errors — error type for the tabular collaborator.
//!
//! Purpose
//! -------
//! Provide the error enum and result alias for loading, saving and indexing
//! [`GeoTable`](crate::table::GeoTable) values, together with a conversion to
//! Python exceptions for the PyO3 layer.
//!
//! Conventions
//! -----------
//! - I/O and CSV failures are carried as their rendered message so the enum
//!   stays `Clone + PartialEq` and cheap to move between workers.
//! - PyO3 conversion uses `PyOSError`, treating table failures as I/O-style
//!   failures from the Python side.
#[cfg(feature = "python-bindings")]
use pyo3::{PyErr, exceptions::PyOSError};

pub type TableResult<T> = Result<T, TableError>;

/// TableError — failures of the tabular layer.
///
/// Variants
/// --------
/// - `Io`: the underlying reader/writer failed.
/// - `Csv`: the CSV stream was malformed.
/// - `EmptyHeader`: no header row, or a header with only the key column.
/// - `MissingColumn`: a requested column does not exist.
/// - `DuplicateColumn`: a header names the same column twice.
/// - `DuplicateKey`: two rows share a geographic key.
/// - `UnknownKey`: a requested key does not exist.
/// - `InvalidNumber`: a field is neither empty/NA nor a number.
/// - `RowLength`: a row has the wrong number of fields.
#[derive(Debug, Clone, PartialEq)]
pub enum TableError {
    Io(String),
    Csv(String),
    EmptyHeader,
    MissingColumn { column: String },
    DuplicateColumn { column: String },
    DuplicateKey { key: String },
    UnknownKey { key: String },
    InvalidNumber { row: usize, column: String, field: String },
    RowLength { row: usize, expected: usize, actual: usize },
}

impl std::error::Error for TableError {}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Io(msg) => write!(f, "I/O failure: {msg}"),
            TableError::Csv(msg) => write!(f, "Malformed CSV: {msg}"),
            TableError::EmptyHeader => {
                write!(f, "Table header must contain a key column and at least one value column.")
            }
            TableError::MissingColumn { column } => write!(f, "Column '{column}' not found."),
            TableError::DuplicateColumn { column } => {
                write!(f, "Column '{column}' appears more than once.")
            }
            TableError::DuplicateKey { key } => write!(f, "Key '{key}' appears more than once."),
            TableError::UnknownKey { key } => write!(f, "Key '{key}' not found."),
            TableError::InvalidNumber { row, column, field } => {
                write!(f, "Row {row}, column '{column}': '{field}' is not a number.")
            }
            TableError::RowLength { row, expected, actual } => {
                write!(f, "Row {row} has {actual} fields; expected {expected}.")
            }
        }
    }
}

impl From<std::io::Error> for TableError {
    fn from(err: std::io::Error) -> TableError {
        TableError::Io(err.to_string())
    }
}

impl From<csv::Error> for TableError {
    fn from(err: csv::Error) -> TableError {
        TableError::Csv(err.to_string())
    }
}

#[cfg(feature = "python-bindings")]
impl From<TableError> for PyErr {
    fn from(err: TableError) -> PyErr {
        PyOSError::new_err(err.to_string())
    }
}
