//! Imputation options — configuration for the group pipeline and disaggregation.
//!
//! Purpose
//! -------
//! Collect every tunable of the engine in one place: replicate counts, the
//! pre-fill budget that bounds stochastic work, worker-pool size, seeding,
//! the replicate-selection rule, the allocator's defensive step cap, and the
//! policy for rows whose allocation weights are all zero.
//!
//! Key behaviors
//! -------------
//! - [`ImputeOptions`] configures the multi-constraint pipeline run by
//!   `Imputer`; [`DisaggregateOptions`] configures the single-level
//!   `Disaggregator`.
//! - Constructors validate sizes via `core::validation` and return
//!   [`ImputeResult`]; `Default` gives the documented defaults.
//!
//! Invariants & assumptions
//! ------------------------
//! - `replicates ≥ 1`; `workers` and `max_steps` are `None` or `≥ 1`.
//! - `seed = None` draws a fresh base seed per run; `Some(s)` makes the run
//!   reproducible for a fixed input and worker-independent.
//!
//! Conventions
//! -----------
//! - Options are plain data carriers with public fields; low-level code
//!   receives them by reference.
//!
//! Testing notes
//! -------------
//! - Tests check defaults and that invalid sizes are rejected by `new`.
use crate::imputation::{
    core::{
        ensemble::SelectionRule,
        validation::{validate_replicates, validate_step_cap, validate_workers},
    },
    errors::ImputeResult,
};

/// Default number of replicates per group.
pub const DEFAULT_REPLICATES: usize = 100;

/// Default cap on the total handed to the stochastic allocator per group.
pub const DEFAULT_PREFILL_BUDGET: i64 = 20_000;

/// Default number of multinomial draws per `(parent, column)` when
/// disaggregating.
pub const DEFAULT_DISAGGREGATE_REPLICATES: usize = 1000;

/// What to do with a row whose open cells all carry zero weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroWeightPolicy {
    /// Treat every open cell as equally likely; the row is flagged.
    #[default]
    Uniform,
    /// Leave the row's cells missing; the row is flagged.
    LeaveUnresolved,
}

/// ImputeOptions — configuration of the multi-constraint pipeline.
///
/// Fields
/// ------
/// - `replicates`: independent allocator runs per group (default 100).
/// - `prefill_budget`: when a group's residual total exceeds this, the excess
///   is pre-assigned deterministically (default 20 000).
/// - `workers`: rayon pool size; `None` uses every available core.
/// - `seed`: base seed; `None` draws one from the OS.
/// - `selection`: replicate-selection rule (default
///   [`SelectionRule::MinSquaredDeviation`]).
/// - `max_steps`: allocator step cap; `None` uses the residual total, which
///   is the natural bound since every step consumes one unit.
/// - `zero_weights`: policy for rows with all-zero weights.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputeOptions {
    pub replicates: usize,
    pub prefill_budget: i64,
    pub workers: Option<usize>,
    pub seed: Option<u64>,
    pub selection: SelectionRule,
    pub max_steps: Option<usize>,
    pub zero_weights: ZeroWeightPolicy,
}

impl ImputeOptions {
    /// Construct validated options.
    ///
    /// Errors
    /// ------
    /// - `InvalidReplicates` when `replicates == 0`.
    /// - `InvalidWorkers` when `workers == Some(0)`.
    /// - `InvalidStepCap` when `max_steps == Some(0)`.
    ///
    /// A negative `prefill_budget` is treated as 0 (pre-fill everything it can).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        replicates: usize, prefill_budget: i64, workers: Option<usize>, seed: Option<u64>,
        selection: SelectionRule, max_steps: Option<usize>, zero_weights: ZeroWeightPolicy,
    ) -> ImputeResult<ImputeOptions> {
        Ok(ImputeOptions {
            replicates: validate_replicates(replicates)?,
            prefill_budget: prefill_budget.max(0),
            workers: validate_workers(workers)?,
            seed,
            selection,
            max_steps: validate_step_cap(max_steps)?,
            zero_weights,
        })
    }

    /// Re-check the size fields; used by entry points that accept options
    /// built as struct literals.
    pub fn validate(&self) -> ImputeResult<()> {
        validate_replicates(self.replicates)?;
        validate_workers(self.workers)?;
        validate_step_cap(self.max_steps)?;
        Ok(())
    }
}

impl Default for ImputeOptions {
    fn default() -> ImputeOptions {
        ImputeOptions {
            replicates: DEFAULT_REPLICATES,
            prefill_budget: DEFAULT_PREFILL_BUDGET,
            workers: None,
            seed: None,
            selection: SelectionRule::default(),
            max_steps: None,
            zero_weights: ZeroWeightPolicy::default(),
        }
    }
}

/// DisaggregateOptions — configuration of the single-level variant.
///
/// Fields
/// ------
/// - `replicates`: multinomial draws per `(parent, column)` (default 1000).
/// - `seed`: base seed; `None` draws one from the OS.
/// - `selection`: rule choosing among the draws.
/// - `workers`: rayon pool size; `None` uses every available core.
#[derive(Debug, Clone, PartialEq)]
pub struct DisaggregateOptions {
    pub replicates: usize,
    pub seed: Option<u64>,
    pub selection: SelectionRule,
    pub workers: Option<usize>,
}

impl DisaggregateOptions {
    pub fn new(
        replicates: usize, seed: Option<u64>, selection: SelectionRule, workers: Option<usize>,
    ) -> ImputeResult<DisaggregateOptions> {
        Ok(DisaggregateOptions {
            replicates: validate_replicates(replicates)?,
            seed,
            selection,
            workers: validate_workers(workers)?,
        })
    }

    pub fn validate(&self) -> ImputeResult<()> {
        validate_replicates(self.replicates)?;
        validate_workers(self.workers)?;
        Ok(())
    }
}

impl Default for DisaggregateOptions {
    fn default() -> DisaggregateOptions {
        DisaggregateOptions {
            replicates: DEFAULT_DISAGGREGATE_REPLICATES,
            seed: None,
            selection: SelectionRule::MinSquaredDeviation,
            workers: None,
        }
    }
}
