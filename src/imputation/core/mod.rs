//! core — constraint model, closure, pre-fill, allocator and ensemble.
//!
//! Purpose
//! -------
//! Collect the building blocks of the multi-constraint Monte Carlo engine for
//! one demographic group: the cell/margin constraint graph, the per-unit
//! constraint state, the exact closure solver, the deterministic pre-fill,
//! the stochastic sequential allocator and the replicate ensemble. The
//! per-group pipeline and orchestration in `imputation::models` are thin
//! glue over these pieces.
//!
//! Key behaviors
//! -------------
//! - Describe each group as a [`GroupSchema`] (cells, margins, the inverse
//!   `cell → margins` index, and same-kind partitions).
//! - Hold inputs as a [`ConstraintState`] value and derive [`Residuals`].
//! - Resolve forced cells exactly with [`close`].
//! - Build an [`AllocationProblem`], shrink it with [`prefill`], and draw
//!   replicates with [`SequentialAllocator`] via [`run_ensemble`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Counts are non-negative `i64`; weights are finite non-negative `f64`.
//! - Every stage is a function from a value to a new value; replicates never
//!   share mutable state.
//! - Margin remaining values never go negative; inconsistency is reported as
//!   a [`FlagKind::InconsistentMargin`] issue, not an error.
//!
//! Conventions
//! -----------
//! - Matrices are `units × cells` or `units × margins` in schema order;
//!   indices are 0-based.
//! - This module performs no I/O and no logging.
//!
//! Testing notes
//! -------------
//! - Each submodule carries unit tests for its own behavior; the full
//!   pipeline is exercised in `imputation::models` and the integration test.
pub mod allocator;
pub mod closure;
pub mod ensemble;
pub mod options;
pub mod prefill;
pub mod problem;
pub mod report;
pub mod schema;
pub mod state;
pub mod validation;
pub mod weight_tree;

pub use self::{
    allocator::{SequentialAllocator, SimulationReplicate, Termination},
    closure::{ClosureOutcome, close},
    ensemble::{
        EnsembleResult, SelectionRule, group_seed, replicate_rng, run_ensemble,
        select_representative, selection_scores,
    },
    options::{DisaggregateOptions, ImputeOptions, ZeroWeightPolicy},
    prefill::{PrefillOutcome, prefill},
    problem::AllocationProblem,
    report::{FlagKind, GroupReport, ImputationReport, UnitFlag, UnitIssue},
    schema::{
        DEFAULT_AGE_BANDS, DEFAULT_GROUPS, DEFAULT_SEXES, GroupSchema, MarginKind, MarginSpec,
        default_schemas,
    },
    state::{ConstraintState, Residuals},
    weight_tree::WeightTree,
};
