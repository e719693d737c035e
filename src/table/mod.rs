//! table — the tabular collaborator: keyed numeric tables, CSV I/O, and
//! aggregate maintenance.
//!
//! Purpose
//! -------
//! Provide the data-exchange boundary of the engine. Inputs (target counts,
//! population counts, an optional single-row incidence table) and the output
//! are all [`GeoTable`]s: rows keyed by a geographic identifier, named
//! numeric columns, `NaN` for missing values.
//!
//! Key behaviors
//! -------------
//! - [`GeoTable`] lookup, mutation and column materialization.
//! - [`read_csv`] / [`write_csv`] (plus reader/writer variants) via the `csv`
//!   crate.
//! - [`recompute_margins`], [`backfill_margins`] and [`sum_groups`] keep
//!   aggregate columns consistent with their cells.
//!
//! Conventions
//! -----------
//! - Errors are [`TableError`]; the imputation layer wraps them in
//!   `ImputeError::Table`.
pub mod aggregate;
pub mod csv_io;
pub mod errors;
pub mod geo_table;

pub use self::aggregate::{backfill_margins, recompute_margins, sum_groups};
pub use self::csv_io::{read_csv, read_csv_from, read_csv_keyed, write_csv, write_csv_to};
pub use self::errors::{TableError, TableResult};
pub use self::geo_table::GeoTable;
