//! GeoTable — keyed numeric table used as the imputation input/output contract.
//!
//! Purpose
//! -------
//! Represent one tabular dataset (target counts, population counts, or a
//! single-row incidence table) as a dense `f64` matrix whose rows are keyed by
//! a geographic identifier and whose columns are named demographic categories.
//!
//! Key behaviors
//! -------------
//! - O(1) lookup of rows by key and columns by name.
//! - `NaN` marks a missing (suppressed) value; [`GeoTable::get`] surfaces it as
//!   `None` so callers never compare against `NaN` directly.
//! - Columns can be appended (filled with missing values) so that aggregate
//!   columns absent from the input can be materialized on output.
//!
//! Invariants & assumptions
//! ------------------------
//! - `values.nrows() == keys.len()` and `values.ncols() == columns.len()`.
//! - Keys are unique; column names are unique.
//! - The table performs no validation of *what* a value means (counts vs
//!   weights); integrality and sign checks happen where values are consumed.
use std::collections::HashMap;

use ndarray::{Array2, ArrayView2, s};

use crate::table::errors::{TableError, TableResult};

/// Dense, key-indexed numeric table with `NaN` as the missing marker.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTable {
    key_column: String,
    keys: Vec<String>,
    columns: Vec<String>,
    key_index: HashMap<String, usize>,
    column_index: HashMap<String, usize>,
    values: Array2<f64>,
}

impl GeoTable {
    /// Build a table from keys, column names and a `keys × columns` matrix.
    ///
    /// # Errors
    /// - [`TableError::RowLength`] if the matrix shape disagrees with the
    ///   number of keys or columns.
    /// - [`TableError::DuplicateKey`] / [`TableError::DuplicateColumn`] when
    ///   keys or column names repeat.
    pub fn new(
        key_column: impl Into<String>, keys: Vec<String>, columns: Vec<String>,
        values: Array2<f64>,
    ) -> TableResult<Self> {
        if values.nrows() != keys.len() {
            return Err(TableError::RowLength {
                row: 0,
                expected: keys.len(),
                actual: values.nrows(),
            });
        }
        if values.ncols() != columns.len() {
            return Err(TableError::RowLength {
                row: 0,
                expected: columns.len(),
                actual: values.ncols(),
            });
        }

        let mut key_index = HashMap::with_capacity(keys.len());
        for (row, key) in keys.iter().enumerate() {
            if key_index.insert(key.clone(), row).is_some() {
                return Err(TableError::DuplicateKey { key: key.clone() });
            }
        }
        let mut column_index = HashMap::with_capacity(columns.len());
        for (col, name) in columns.iter().enumerate() {
            if column_index.insert(name.clone(), col).is_some() {
                return Err(TableError::DuplicateColumn { column: name.clone() });
            }
        }

        Ok(GeoTable { key_column: key_column.into(), keys, columns, key_index, column_index, values })
    }

    /// Name of the key column (e.g. `"FIPS"`).
    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.keys.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Read-only view of the whole matrix (missing values are `NaN`).
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Row index of `key`, if present.
    pub fn row_of(&self, key: &str) -> Option<usize> {
        self.key_index.get(key).copied()
    }

    /// Column index of `column`.
    ///
    /// # Errors
    /// [`TableError::MissingColumn`] when no such column exists.
    pub fn column_of(&self, column: &str) -> TableResult<usize> {
        self.column_index
            .get(column)
            .copied()
            .ok_or_else(|| TableError::MissingColumn { column: column.to_string() })
    }

    /// Value at `(row, col)`, or `None` when missing.
    ///
    /// Panics if either index is out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        let value = self.values[[row, col]];
        if value.is_nan() { None } else { Some(value) }
    }

    /// Overwrite the value at `(row, col)`.
    ///
    /// Panics if either index is out of bounds.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[[row, col]] = value;
    }

    /// Return the index of `column`, appending it (all missing) if absent.
    pub fn ensure_column(&mut self, column: &str) -> usize {
        if let Some(&col) = self.column_index.get(column) {
            return col;
        }
        let col = self.columns.len();
        let mut widened = Array2::from_elem((self.n_rows(), col + 1), f64::NAN);
        widened.slice_mut(s![.., ..col]).assign(&self.values);
        self.values = widened;
        self.columns.push(column.to_string());
        self.column_index.insert(column.to_string(), col);
        col
    }

    /// Number of missing values in the columns named by `columns`.
    ///
    /// Columns not present in the table are ignored.
    pub fn count_missing<S: AsRef<str>>(&self, columns: &[S]) -> usize {
        columns
            .iter()
            .filter_map(|name| self.column_index.get(name.as_ref()))
            .map(|&col| self.values.column(col).iter().filter(|v| v.is_nan()).count())
            .sum()
    }
}
