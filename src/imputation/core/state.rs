//! Constraint state — cell values, known mask, and margin targets for a group.
//!
//! Purpose
//! -------
//! Hold the per-unit view of one demographic group as plain value types: a
//! `units × cells` integer matrix with a `known` mask, and a
//! `units × margins` matrix of optional targets. Every pipeline stage takes a
//! state by reference and returns a new one, so replicates can start from
//! independent copies without aliasing.
//!
//! Key behaviors
//! -------------
//! - Extract a state from a [`GeoTable`] for a subset of rows, validating
//!   counts via `core::validation`; malformed counts become unit issues.
//! - Derive [`Residuals`]: each active margin's remaining capacity
//!   (`target − Σ known members`), clamped at zero, with an
//!   `InconsistentMargin` issue whenever the raw value is negative.
//!
//! Invariants & assumptions
//! ------------------------
//! - `values[[u, c]]` is meaningful only where `known[[u, c]]`; unknown cells
//!   hold 0.
//! - A margin whose target is `None` is *inactive*: it constrains nothing and
//!   has remaining 0.
//! - Known values and targets are non-negative integers.
use ndarray::Array2;

use crate::{
    imputation::{
        core::{
            report::{FlagKind, UnitIssue},
            schema::GroupSchema,
            validation::validate_count,
        },
        errors::{ImputeError, ImputeResult},
    },
    table::GeoTable,
};

/// ConstraintState — cell values and margin targets of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintState {
    /// `units × cells`; 0 where unknown.
    pub values: Array2<i64>,
    /// `units × cells`; `true` where the value is determined.
    pub known: Array2<bool>,
    /// `units × margins`; `None` where the target is missing.
    pub targets: Array2<Option<i64>>,
}

impl ConstraintState {
    /// Build a state from its matrices.
    ///
    /// # Errors
    /// [`ImputeError::ShapeMismatch`] when the matrices disagree with each other
    /// or with `schema`.
    pub fn new(
        schema: &GroupSchema, values: Array2<i64>, known: Array2<bool>,
        targets: Array2<Option<i64>>,
    ) -> ImputeResult<ConstraintState> {
        let n_units = values.nrows();
        let expected_cells = (n_units, schema.n_cells());
        if values.dim() != expected_cells {
            return Err(ImputeError::ShapeMismatch { expected: expected_cells, actual: values.dim() });
        }
        if known.dim() != expected_cells {
            return Err(ImputeError::ShapeMismatch { expected: expected_cells, actual: known.dim() });
        }
        let expected_margins = (n_units, schema.n_margins());
        if targets.dim() != expected_margins {
            return Err(ImputeError::ShapeMismatch {
                expected: expected_margins,
                actual: targets.dim(),
            });
        }
        Ok(ConstraintState { values, known, targets })
    }

    /// Build a state from optional cell values (`None` = unknown).
    ///
    /// Convenience for tests and bindings working with plain nested data.
    pub fn from_options(
        schema: &GroupSchema, cells: &Array2<Option<i64>>, targets: Array2<Option<i64>>,
    ) -> ImputeResult<ConstraintState> {
        let values = cells.mapv(|v| v.unwrap_or(0));
        let known = cells.mapv(|v| v.is_some());
        ConstraintState::new(schema, values, known, targets)
    }

    /// Extract the rows `rows` of `table` for `schema`.
    ///
    /// Cell columns must exist; margin columns that are absent from the table
    /// are treated as inactive for every unit. A malformed count (negative,
    /// fractional or non-finite) is read as missing and reported as an
    /// `InvalidInput` issue on its unit.
    ///
    /// # Errors
    /// [`ImputeError::Table`] when a cell column is missing.
    pub fn from_table(
        schema: &GroupSchema, table: &GeoTable, rows: &[usize],
    ) -> ImputeResult<(ConstraintState, Vec<UnitIssue>)> {
        let cell_cols: Vec<usize> =
            schema.cells().iter().map(|c| table.column_of(c)).collect::<Result<_, _>>()?;
        let margin_cols: Vec<Option<usize>> =
            schema.margins().iter().map(|m| table.column_of(&m.column).ok()).collect();

        let n_units = rows.len();
        let mut values = Array2::zeros((n_units, schema.n_cells()));
        let mut known = Array2::from_elem((n_units, schema.n_cells()), false);
        let mut targets = Array2::from_elem((n_units, schema.n_margins()), None);
        let mut issues = Vec::new();
        let mut invalid = |u: usize, err: ImputeError| {
            issues.push(UnitIssue::new(u, FlagKind::InvalidInput { reason: err.to_string() }));
        };

        for (u, &row) in rows.iter().enumerate() {
            let key = &table.keys()[row];
            for (c, &col) in cell_cols.iter().enumerate() {
                let Some(v) = table.get(row, col) else { continue };
                match validate_count(v, key, &schema.cells()[c]) {
                    Ok(count) => {
                        values[[u, c]] = count;
                        known[[u, c]] = true;
                    }
                    Err(err) => invalid(u, err),
                }
            }
            for (m, col) in margin_cols.iter().enumerate() {
                let Some(v) = col.and_then(|col| table.get(row, col)) else { continue };
                match validate_count(v, key, &schema.margins()[m].column) {
                    Ok(count) => targets[[u, m]] = Some(count),
                    Err(err) => invalid(u, err),
                }
            }
        }
        Ok((ConstraintState { values, known, targets }, issues))
    }

    pub fn n_units(&self) -> usize {
        self.values.nrows()
    }

    /// Number of unknown cells in `unit`.
    pub fn unknown_in(&self, unit: usize) -> usize {
        self.known.row(unit).iter().filter(|k| !**k).count()
    }

    /// Total number of unknown cells.
    pub fn unknown_count(&self) -> usize {
        self.known.iter().filter(|k| !**k).count()
    }

    /// `true` when every cell of `unit` is known.
    pub fn is_resolved(&self, unit: usize) -> bool {
        self.unknown_in(unit) == 0
    }

    /// Sum of the known cells of `unit` among `members`.
    pub fn known_sum(&self, unit: usize, members: &[usize]) -> i64 {
        members.iter().filter(|&&c| self.known[[unit, c]]).map(|&c| self.values[[unit, c]]).sum()
    }

    /// Remaining capacity of every margin.
    pub fn residuals(&self, schema: &GroupSchema) -> Residuals {
        let n_units = self.n_units();
        let mut remaining = Array2::zeros((n_units, schema.n_margins()));
        let mut active = Array2::from_elem((n_units, schema.n_margins()), false);
        let mut issues = Vec::new();

        for u in 0..n_units {
            for (m, margin) in schema.margins().iter().enumerate() {
                let Some(target) = self.targets[[u, m]] else { continue };
                active[[u, m]] = true;
                let raw = target - self.known_sum(u, &margin.members);
                if raw < 0 {
                    issues.push(UnitIssue::new(
                        u,
                        FlagKind::InconsistentMargin { margin: margin.column.clone(), excess: -raw },
                    ));
                }
                remaining[[u, m]] = raw.max(0);
            }
        }
        Residuals { remaining, active, issues }
    }
}

/// Residuals — remaining margin capacity after known cells are subtracted.
#[derive(Debug, Clone, PartialEq)]
pub struct Residuals {
    /// `units × margins`; clamped at 0, 0 for inactive margins.
    pub remaining: Array2<i64>,
    /// `units × margins`; `true` where the margin has a target.
    pub active: Array2<bool>,
    /// Margins whose known cells already exceed the target.
    pub issues: Vec<UnitIssue>,
}
