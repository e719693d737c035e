//! models — group pipeline, orchestration and single-level disaggregation.
//!
//! Purpose
//! -------
//! Wire the building blocks of `imputation::core` into runnable entry points
//! over [`GeoTable`](crate::table::GeoTable)s: the per-group pipeline, the
//! multi-group [`Imputer`], and the unconstrained [`Disaggregator`].
//!
//! Key behaviors
//! -------------
//! - [`GroupImputer`] runs closure → pre-fill → ensemble for one group and
//!   returns a [`GroupOutcome`] without touching shared tables.
//! - [`Imputer`] fans groups out on a bounded rayon pool, writes resolved
//!   cells back single-threaded and recomputes margin columns.
//! - [`Disaggregator`] splits parent totals across sub-unit rows by
//!   population share.
//!
//! Invariants & assumptions
//! ------------------------
//! - Input tables are never mutated; outputs are fresh tables.
//! - A fixed seed reproduces the output for any worker count.
//!
//! Downstream usage
//! ----------------
//! - Build [`ImputeOptions`](crate::imputation::core::ImputeOptions), call
//!   `Imputer::new(options)?.impute(&target, &population, incidence, &schemas)`
//!   and inspect the returned [`ImputationOutcome`].
//!
//! Testing notes
//! -------------
//! - Each submodule carries unit tests; `tests/` holds the end-to-end run
//!   from CSV to imputed CSV.
pub mod disaggregate;
pub mod group;
pub mod orchestrator;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::disaggregate::{DisaggregationOutcome, Disaggregator};
pub use self::group::{GroupImputer, GroupInputs, GroupOutcome, extract_inputs};
pub use self::orchestrator::{ImputationOutcome, Imputer};

// ---- Optional convenience prelude for downstream crates -------------------

pub mod prelude {
    pub use super::{DisaggregationOutcome, Disaggregator, ImputationOutcome, Imputer};
}
