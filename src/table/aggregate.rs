//! Aggregate maintenance — keep margin columns equal to the sum of their cells.
//!
//! Purpose
//! -------
//! Materialize the output contract that aggregate columns (`{g}_Total`,
//! `{g}_Male`, `{g}_50-`, …) are the sums of their subordinate cells, and
//! derive a parent group's cells (e.g. `AllRace_*`) from its part groups.
//!
//! Key behaviors
//! -------------
//! - [`recompute_margins`] overwrites each margin where every member cell is
//!   present; rows with a missing member keep their stored value.
//! - [`backfill_margins`] only fills margins that are missing.
//! - [`sum_groups`] fills missing cells of a parent schema with the sum of the
//!   matching cells of part schemas, when every part cell is present.
//!
//! Conventions
//! -----------
//! - Margin columns absent from the table are appended (recompute) so the
//!   output always carries the full hierarchy.
use crate::{
    imputation::{
        core::schema::GroupSchema,
        errors::{ImputeError, ImputeResult},
    },
    table::geo_table::GeoTable,
};

/// Set every margin of `schema` to the sum of its member cells.
///
/// Returns the number of margin values written.
///
/// # Errors
/// [`ImputeError::Table`] when a cell column of `schema` is missing.
pub fn recompute_margins(table: &mut GeoTable, schema: &GroupSchema) -> ImputeResult<usize> {
    write_margins(table, schema, true)
}

/// Fill missing margins of `schema` from fully-present member cells.
///
/// Returns the number of margin values written.
pub fn backfill_margins(table: &mut GeoTable, schema: &GroupSchema) -> ImputeResult<usize> {
    write_margins(table, schema, false)
}

/// Fill missing cells of `parent` with the sum of the same-position cells of
/// `parts`.
///
/// Returns the number of cells written.
///
/// # Errors
/// [`ImputeError::ShapeMismatch`] when a part schema has a different number
/// of cells than `parent`.
pub fn sum_groups(
    table: &mut GeoTable, parent: &GroupSchema, parts: &[GroupSchema],
) -> ImputeResult<usize> {
    for part in parts {
        if part.n_cells() != parent.n_cells() {
            return Err(ImputeError::ShapeMismatch {
                expected: (1, parent.n_cells()),
                actual: (1, part.n_cells()),
            });
        }
    }

    let part_cols: Vec<Vec<usize>> = parts
        .iter()
        .map(|p| p.cells().iter().map(|c| table.column_of(c)).collect::<Result<_, _>>())
        .collect::<Result<_, _>>()?;
    let parent_cols: Vec<usize> =
        parent.cells().iter().map(|c| table.ensure_column(c)).collect();

    let mut written = 0;
    for row in 0..table.n_rows() {
        for (c, &col) in parent_cols.iter().enumerate() {
            if table.get(row, col).is_some() {
                continue;
            }
            let values: Option<Vec<f64>> = part_cols.iter().map(|cols| table.get(row, cols[c])).collect();
            if let Some(values) = values {
                table.set(row, col, values.iter().sum());
                written += 1;
            }
        }
    }
    Ok(written)
}

// ---- Helper methods ----

fn write_margins(table: &mut GeoTable, schema: &GroupSchema, overwrite: bool) -> ImputeResult<usize> {
    let cell_cols: Vec<usize> =
        schema.cells().iter().map(|c| table.column_of(c)).collect::<Result<_, _>>()?;
    let margin_cols: Vec<usize> =
        schema.margins().iter().map(|m| table.ensure_column(&m.column)).collect();

    let mut written = 0;
    for row in 0..table.n_rows() {
        for (margin, &col) in schema.margins().iter().zip(&margin_cols) {
            if !overwrite && table.get(row, col).is_some() {
                continue;
            }
            let sum: Option<f64> =
                margin.members.iter().map(|&c| table.get(row, cell_cols[c])).sum();
            if let Some(sum) = sum {
                table.set(row, col, sum);
                written += 1;
            }
        }
    }
    Ok(written)
}
