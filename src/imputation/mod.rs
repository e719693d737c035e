//! imputation — multi-constraint Monte Carlo geo-imputation.
//!
//! Purpose
//! -------
//! Fill suppressed cells of small-area count tables (e.g. county cancer
//! counts by race × sex × age) so that every known value is kept, every
//! known margin is honoured where the data allow it, and unknown mass is
//! spread in proportion to population × incidence.
//!
//! Key behaviors
//! -------------
//! - [`core`]: constraint graph ([`GroupSchema`]), constraint state, exact
//!   closure, pre-fill, sequential allocator, replicate ensemble, options and
//!   diagnostics.
//! - [`models`]: the per-group pipeline, the [`Imputer`] orchestrator and the
//!   single-level [`Disaggregator`].
//! - [`errors`]: [`ImputeError`] / [`ImputeResult`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Counts are non-negative integers; missing values are `NaN` in tables
//!   and `known == false` in the state.
//! - Data inconsistencies are reported as [`UnitFlag`]s, never as errors;
//!   errors are reserved for structurally unusable input.
//!
//! Conventions
//! -----------
//! - `imputation::core` performs no I/O and no logging; the models layer
//!   logs through a caller-supplied `slog::Logger`.
//!
//! Downstream usage
//! ----------------
//! - `use geo_imputation::imputation::prelude::*;` imports the everyday
//!   surface (schemas, options, imputer, reports, errors).

pub mod core;
pub mod errors;
pub mod models;

// ---- Re-exports (primary public surface) ----------------------------------
//
// Lower-level pieces (closure, pre-fill, allocator, weight tree) remain under
// `core`.

pub use self::core::{
    DisaggregateOptions, FlagKind, GroupReport, GroupSchema, ImputationReport, ImputeOptions,
    MarginKind, MarginSpec, SelectionRule, UnitFlag, ZeroWeightPolicy, default_schemas,
};

pub use self::errors::{ImputeError, ImputeResult};

pub use self::models::{DisaggregationOutcome, Disaggregator, ImputationOutcome, Imputer};

// ---- Optional convenience prelude for downstream crates -------------------
//
// Downstream crates can write
//
//     use geo_imputation::imputation::prelude::*;
//
// to import the main imputation surface in a single line.

pub mod prelude {
    pub use super::{
        DisaggregateOptions, DisaggregationOutcome, Disaggregator, FlagKind, GroupReport,
        GroupSchema, ImputationOutcome, ImputationReport, ImputeError, ImputeOptions,
        ImputeResult, Imputer, MarginKind, MarginSpec, SelectionRule, UnitFlag, ZeroWeightPolicy,
        default_schemas,
    };
}
