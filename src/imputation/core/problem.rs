//! Allocation problem — the shared starting point of every replicate.
//!
//! Purpose
//! -------
//! Gather the units that still have unknown cells after closure into a dense
//! `rows × cells` / `rows × margins` layout: per-row remaining margin
//! capacity, the active-margin mask, the fillable mask and the cell weights
//! (`population × incidence`). Replicates clone this value and mutate only
//! their copy.
//!
//! Key behaviors
//! -------------
//! - [`AllocationProblem::build`] selects rows and applies the zero-weight
//!   policy to every active margin whose fillable cells carry no weight;
//!   units without a grand total are excluded and flagged.
//! - [`AllocationProblem::reweight_stranded`] reapplies the uniform fallback
//!   to margins that become stranded during allocation.
//! - [`AllocationProblem::apply`] is the single mutation primitive shared by
//!   pre-fill and the allocator: it adds to one cell, decrements every active
//!   margin bounding it (clamped at zero) and clears the fillable flag of
//!   every cell bounded by a margin that reached zero.
//!
//! Invariants & assumptions
//! ------------------------
//! - `remaining ≥ 0` everywhere; inactive margins never constrain.
//! - A cell is fillable iff it was unknown and every active margin bounding
//!   it has positive remaining capacity.
//! - `weights` is zero for cells that were known on entry.
use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::imputation::core::{
    options::ZeroWeightPolicy,
    report::{FlagKind, UnitIssue},
    schema::GroupSchema,
    state::{ConstraintState, Residuals},
};

/// AllocationProblem — rows still to be resolved stochastically.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationProblem {
    /// Unit index (into the originating state) of each row.
    pub rows: Vec<usize>,
    /// `rows × cells`; counts assigned so far to open cells.
    pub assigned: Array2<i64>,
    /// `rows × cells`; cells that were unknown on entry.
    pub open: Array2<bool>,
    /// `rows × margins`; remaining capacity.
    pub remaining: Array2<i64>,
    /// `rows × margins`; margins with a target.
    pub active: Array2<bool>,
    /// `rows × cells`; cells that may still receive a unit.
    pub fillable: Array2<bool>,
    /// `rows × cells`; allocation weights.
    pub weights: Array2<f64>,
    grand: usize,
    policy: ZeroWeightPolicy,
}

impl AllocationProblem {
    /// Collect the unresolved units of `state`.
    ///
    /// Parameters
    /// ----------
    /// - `weights`: `units × cells` population-times-incidence weights,
    ///   already validated as finite and non-negative.
    /// - `policy`: handling of margins whose fillable weights sum to zero.
    ///
    /// Returns
    /// -------
    /// The problem plus issues for units excluded (`MissingGrandTotal`,
    /// `DegenerateWeights` under `LeaveUnresolved`) or reweighted
    /// (`DegenerateWeights` under `Uniform`).
    pub fn build(
        schema: &GroupSchema, state: &ConstraintState, residuals: &Residuals,
        weights: ArrayView2<f64>, policy: ZeroWeightPolicy,
    ) -> (AllocationProblem, Vec<UnitIssue>) {
        AllocationProblem::build_excluding(schema, state, residuals, weights, policy, &[])
    }

    /// [`AllocationProblem::build`] leaving out every unit `u` with
    /// `excluded[u]`; missing entries count as `false`.
    pub fn build_excluding(
        schema: &GroupSchema, state: &ConstraintState, residuals: &Residuals,
        weights: ArrayView2<f64>, policy: ZeroWeightPolicy, excluded: &[bool],
    ) -> (AllocationProblem, Vec<UnitIssue>) {
        let grand = schema.grand();
        let n_cells = schema.n_cells();
        let mut issues = Vec::new();
        let mut rows = Vec::new();
        let mut row_weights: Vec<Vec<f64>> = Vec::new();

        for u in 0..state.n_units() {
            if state.is_resolved(u) || excluded.get(u).copied().unwrap_or(false) {
                continue;
            }
            if state.targets[[u, grand]].is_none() {
                issues.push(UnitIssue::new(u, FlagKind::MissingGrandTotal));
                continue;
            }

            let fillable: Vec<bool> = (0..n_cells)
                .map(|c| !state.known[[u, c]] && cell_has_capacity(schema, residuals, u, c))
                .collect();
            let mut w: Vec<f64> = (0..n_cells)
                .map(|c| if state.known[[u, c]] { 0.0 } else { weights[[u, c]] })
                .collect();
            let stranded = stranded_margins(
                schema,
                residuals.active.row(u),
                residuals.remaining.row(u),
                ArrayView1::from(&fillable[..]),
                ArrayView1::from(&w[..]),
            );

            if !stranded.is_empty() {
                issues.push(UnitIssue::new(u, FlagKind::DegenerateWeights));
                match policy {
                    ZeroWeightPolicy::LeaveUnresolved => continue,
                    ZeroWeightPolicy::Uniform => {
                        for m in stranded {
                            for &c in &schema.margins()[m].members {
                                if fillable[c] {
                                    w[c] = 1.0;
                                }
                            }
                        }
                    }
                }
            }
            rows.push(u);
            row_weights.push(w);
        }

        let n_rows = rows.len();
        let n_margins = schema.n_margins();
        let mut problem = AllocationProblem {
            assigned: Array2::zeros((n_rows, n_cells)),
            open: Array2::from_shape_fn((n_rows, n_cells), |(r, c)| !state.known[[rows[r], c]]),
            remaining: Array2::from_shape_fn((n_rows, n_margins), |(r, m)| {
                residuals.remaining[[rows[r], m]]
            }),
            active: Array2::from_shape_fn((n_rows, n_margins), |(r, m)| {
                residuals.active[[rows[r], m]]
            }),
            fillable: Array2::from_elem((n_rows, n_cells), false),
            weights: Array2::from_shape_fn((n_rows, n_cells), |(r, c)| row_weights[r][c]),
            rows,
            grand,
            policy,
        };
        for r in 0..n_rows {
            problem.refresh_row(schema, r);
        }
        (problem, issues)
    }

    pub fn policy(&self) -> ZeroWeightPolicy {
        self.policy
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Grand-total remaining of row `r`.
    pub fn outstanding(&self, r: usize) -> i64 {
        self.remaining[[r, self.grand]]
    }

    /// Σ grand-total remaining over all rows.
    pub fn total_outstanding(&self) -> i64 {
        (0..self.n_rows()).map(|r| self.outstanding(r)).sum()
    }

    /// Σ weights of the currently fillable cells of row `r`.
    pub fn fillable_weight(&self, r: usize) -> f64 {
        self.weights
            .row(r)
            .iter()
            .zip(self.fillable.row(r))
            .filter(|(_, f)| **f)
            .map(|(w, _)| *w)
            .sum()
    }

    /// Largest amount cell `c` of row `r` can receive without driving any
    /// active bounding margin negative.
    pub fn capacity(&self, schema: &GroupSchema, r: usize, c: usize) -> i64 {
        schema
            .margins_of(c)
            .iter()
            .filter(|&&m| self.active[[r, m]])
            .map(|&m| self.remaining[[r, m]])
            .min()
            .unwrap_or(0)
    }

    /// Add `amount` to cell `c` of row `r` and propagate to its margins.
    pub fn apply(&mut self, schema: &GroupSchema, r: usize, c: usize, amount: i64) {
        if amount <= 0 {
            return;
        }
        self.assigned[[r, c]] += amount;
        for &m in schema.margins_of(c) {
            if !self.active[[r, m]] {
                continue;
            }
            let left = (self.remaining[[r, m]] - amount).max(0);
            self.remaining[[r, m]] = left;
            if left == 0 {
                for &member in &schema.margins()[m].members {
                    self.fillable[[r, member]] = false;
                }
            }
        }
    }

    /// Under [`ZeroWeightPolicy::Uniform`], give unit weight to the fillable
    /// cells of every margin of row `r` that still has capacity but no
    /// fillable mass. Returns `true` when a weight changed.
    pub fn reweight_stranded(&mut self, schema: &GroupSchema, r: usize) -> bool {
        if self.policy != ZeroWeightPolicy::Uniform || self.outstanding(r) <= 0 {
            return false;
        }
        let stranded = stranded_margins(
            schema,
            self.active.row(r),
            self.remaining.row(r),
            self.fillable.row(r),
            self.weights.row(r),
        );
        for &m in &stranded {
            for &c in &schema.margins()[m].members {
                if self.fillable[[r, c]] {
                    self.weights[[r, c]] = 1.0;
                }
            }
        }
        !stranded.is_empty()
    }

    /// Write the assignment `assigned` (shaped like `self.assigned`) into a
    /// copy of `state`: open cells of every row become known.
    pub fn resolve(&self, state: &ConstraintState, assigned: &Array2<i64>) -> ConstraintState {
        let mut next = state.clone();
        for (r, &u) in self.rows.iter().enumerate() {
            for c in 0..self.open.ncols() {
                if self.open[[r, c]] {
                    next.values[[u, c]] = assigned[[r, c]];
                    next.known[[u, c]] = true;
                }
            }
        }
        next
    }

    // ---- Helper methods ----

    fn refresh_row(&mut self, schema: &GroupSchema, r: usize) {
        for c in 0..schema.n_cells() {
            let bounded_open = schema
                .margins_of(c)
                .iter()
                .all(|&m| !self.active[[r, m]] || self.remaining[[r, m]] > 0);
            self.fillable[[r, c]] = self.open[[r, c]] && bounded_open;
        }
    }
}

/// Active margins with capacity whose fillable members exist but all carry
/// zero weight.
fn stranded_margins(
    schema: &GroupSchema, active: ArrayView1<bool>, remaining: ArrayView1<i64>,
    fillable: ArrayView1<bool>, weights: ArrayView1<f64>,
) -> Vec<usize> {
    schema
        .margins()
        .iter()
        .enumerate()
        .filter(|&(m, _)| active[m] && remaining[m] > 0)
        .filter(|(_, margin)| {
            let mut members = margin.members.iter().filter(|&&c| fillable[c]).peekable();
            members.peek().is_some() && members.all(|&c| weights[c] <= 0.0)
        })
        .map(|(m, _)| m)
        .collect()
}

fn cell_has_capacity(schema: &GroupSchema, residuals: &Residuals, u: usize, c: usize) -> bool {
    schema
        .margins_of(c)
        .iter()
        .all(|&m| !residuals.active[[u, m]] || residuals.remaining[[u, m]] > 0)
}
