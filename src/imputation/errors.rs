//! Errors for the imputation stack (schema/options validation, input
//! extraction, and per-group failures).
//!
//! This module defines the imputation error type, [`ImputeError`], and the
//! [`ImputeResult`] alias used across the Rust core and the Python-facing API.
//! Both implement `Display`/`Error` and convert to `PyErr` for PyO3.
//!
//! ## Conventions
//! - **Indices are 0-based** (unit rows, cell columns, margins).
//! - Errors describe *structurally unusable* input: a schema that does not
//!   form a margin hierarchy, a count that is not a non-negative integer, a
//!   population row that cannot be found. Numerically *inconsistent* margins
//!   are not errors; they are surfaced as
//!   [`UnitFlag`](crate::imputation::core::report::UnitFlag)s so the run can
//!   continue.
//! - Table-layer failures are wrapped via [`ImputeError::Table`].
#[cfg(feature = "python-bindings")]
use pyo3::{PyErr, exceptions::PyValueError};

use crate::table::errors::TableError;

/// Crate-wide result alias for imputation operations that may produce
/// [`ImputeError`].
pub type ImputeResult<T> = Result<T, ImputeError>;

/// Unified error type for the imputation engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ImputeError {
    // ---- Schema validation ----
    /// A group schema has no cells.
    EmptySchema { group: String },

    /// A group schema must carry exactly one grand-total margin.
    GrandMarginCount { group: String, found: usize },

    /// The grand-total margin must bound every cell of the group.
    GrandMarginIncomplete { group: String, missing: usize },

    /// A margin refers to a cell index outside the schema.
    MarginMemberOutOfRange { margin: String, index: usize, cells: usize },

    /// A margin bounds no cells.
    EmptyMargin { margin: String },

    // ---- Options validation ----
    /// At least one replicate must be simulated.
    InvalidReplicates { value: usize },

    /// Worker pool size must be > 0 when given explicitly.
    InvalidWorkers { value: usize },

    /// Step cap must be > 0 when given explicitly.
    InvalidStepCap { value: usize },

    /// Selection rule name not recognized.
    UnknownSelectionRule { name: String },

    // ---- Input extraction ----
    /// A count is NaN/±inf, negative, or not integral.
    NonIntegerCount { key: String, column: String, value: f64 },

    /// A population weight is NaN/±inf or negative.
    InvalidWeight { key: String, column: String, value: f64 },

    /// An incidence rate is NaN/±inf or negative.
    InvalidIncidence { column: String, value: f64 },

    /// The population table has no row for a target unit.
    MissingPopulationRow { key: String },

    /// The parent-level table has no row for a parent key.
    MissingParentRow { key: String },

    /// Matrix shapes disagree between the state and the schema.
    ShapeMismatch { expected: (usize, usize), actual: (usize, usize) },

    // ---- Execution ----
    /// The worker pool could not be constructed.
    WorkerPool { reason: String },

    /// Wrapper for table-layer failures.
    Table(TableError),
}

impl std::error::Error for ImputeError {}

impl std::fmt::Display for ImputeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Schema validation ----
            ImputeError::EmptySchema { group } => {
                write!(f, "Group schema '{group}' has no cells.")
            }
            ImputeError::GrandMarginCount { group, found } => {
                write!(f, "Group schema '{group}' must have exactly one grand-total margin; found {found}.")
            }
            ImputeError::GrandMarginIncomplete { group, missing } => {
                write!(
                    f,
                    "Grand-total margin of group '{group}' must bound every cell; {missing} cell(s) uncovered."
                )
            }
            ImputeError::MarginMemberOutOfRange { margin, index, cells } => {
                write!(f, "Margin '{margin}' refers to cell {index}, but the schema has {cells} cells.")
            }
            ImputeError::EmptyMargin { margin } => {
                write!(f, "Margin '{margin}' bounds no cells.")
            }
            // ---- Options validation ----
            ImputeError::InvalidReplicates { value } => {
                write!(f, "Number of replicates must be > 0; got: {value}")
            }
            ImputeError::InvalidWorkers { value } => {
                write!(f, "Worker count must be > 0 when given; got: {value}")
            }
            ImputeError::InvalidStepCap { value } => {
                write!(f, "Allocator step cap must be > 0 when given; got: {value}")
            }
            ImputeError::UnknownSelectionRule { name } => {
                write!(
                    f,
                    "Unknown selection rule '{name}'; expected one of: min_squared_deviation, min_deviation_variance, min_cell_variance"
                )
            }
            // ---- Input extraction ----
            ImputeError::NonIntegerCount { key, column, value } => {
                write!(
                    f,
                    "Count at unit '{key}', column '{column}' must be a finite non-negative integer; got: {value}"
                )
            }
            ImputeError::InvalidWeight { key, column, value } => {
                write!(
                    f,
                    "Population weight at unit '{key}', column '{column}' must be finite and >= 0; got: {value}"
                )
            }
            ImputeError::InvalidIncidence { column, value } => {
                write!(f, "Incidence rate for column '{column}' must be finite and >= 0; got: {value}")
            }
            ImputeError::MissingPopulationRow { key } => {
                write!(f, "Population table has no row for unit '{key}'.")
            }
            ImputeError::MissingParentRow { key } => {
                write!(f, "Parent table has no row for parent '{key}'.")
            }
            ImputeError::ShapeMismatch { expected, actual } => {
                write!(f, "Shape mismatch: expected {expected:?}, got {actual:?}")
            }
            // ---- Execution ----
            ImputeError::WorkerPool { reason } => {
                write!(f, "Failed to build worker pool: {reason}")
            }
            ImputeError::Table(err) => write!(f, "Table error: {err}"),
        }
    }
}

impl From<TableError> for ImputeError {
    fn from(err: TableError) -> ImputeError {
        ImputeError::Table(err)
    }
}

impl From<rayon::ThreadPoolBuildError> for ImputeError {
    fn from(err: rayon::ThreadPoolBuildError) -> ImputeError {
        ImputeError::WorkerPool { reason: err.to_string() }
    }
}

/// Convert an [`ImputeError`] into a Python `ValueError` with the error message.
#[cfg(feature = "python-bindings")]
impl From<ImputeError> for PyErr {
    fn from(err: ImputeError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}
