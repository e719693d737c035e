//! Probabilistic pre-fill — deterministic bulk assignment before simulation.
//!
//! Purpose
//! -------
//! Bound the stochastic workload of a group. When the residual grand total
//! across all rows exceeds the configured budget, the excess is assigned up
//! front in proportion to each row's fillable cell weights, so that at most
//! roughly `budget` units remain for the sequential allocator.
//!
//! Key behaviors
//! -------------
//! - `N = Σ outstanding`; if `N ≤ budget` the problem is returned unchanged.
//! - Otherwise `ratio = (N − budget) / N` and each row assigns
//!   `floor(R_i · ratio)` units split as `floor(p_j · share)` over its
//!   fillable cells, where `p_j` is the cell's share of the row's fillable
//!   weight.
//! - Every cell amount is capped by the current remaining capacity of each
//!   active margin bounding it, so no margin is overdrawn.
//!
//! Invariants & assumptions
//! ------------------------
//! - Pure: takes the problem by reference and returns a new one.
//! - No randomness; every replicate starts from the same pre-filled problem.
use crate::imputation::core::{problem::AllocationProblem, schema::GroupSchema};

/// Result of [`prefill`].
#[derive(Debug, Clone, PartialEq)]
pub struct PrefillOutcome {
    pub problem: AllocationProblem,
    /// Units assigned deterministically across all rows.
    pub assigned: i64,
    /// Fraction of each row's residual targeted for pre-fill (0 when skipped).
    pub ratio: f64,
}

/// Pre-assign the part of `problem` that exceeds `budget`.
pub fn prefill(schema: &GroupSchema, problem: &AllocationProblem, budget: i64) -> PrefillOutcome {
    let mut next = problem.clone();
    let total = problem.total_outstanding();
    let budget = budget.max(0);
    if total <= budget {
        return PrefillOutcome { problem: next, assigned: 0, ratio: 0.0 };
    }

    let ratio = (total - budget) as f64 / total as f64;
    let mut assigned = 0;
    for r in 0..next.n_rows() {
        let share = (next.outstanding(r) as f64 * ratio).floor();
        let mass = next.fillable_weight(r);
        if share <= 0.0 || mass <= 0.0 {
            continue;
        }

        let cells: Vec<usize> = (0..schema.n_cells()).filter(|&c| next.fillable[[r, c]]).collect();
        for c in cells {
            let proportion = next.weights[[r, c]] / mass;
            let wanted = (proportion * share).floor() as i64;
            let amount = wanted.min(next.capacity(schema, r, c));
            if amount > 0 {
                next.apply(schema, r, c, amount);
                assigned += amount;
            }
        }
    }

    PrefillOutcome { problem: next, assigned, ratio }
}
