//! Closure solver — exact resolution of cells forced by their margins.
//!
//! Purpose
//! -------
//! Resolve every cell whose value is determined by arithmetic alone before any
//! randomness is introduced. A cell is forced when it is the only unknown
//! member of a margin with a target, or when that margin has no capacity left
//! (target zero, or already met by the known members).
//!
//! Key behaviors
//! -------------
//! - Iterate to a fixed point per unit: resolving a sex subtotal's last cell
//!   can unblock an age-band margin and vice versa.
//! - Complete missing margin *targets* first:
//!   - an inactive margin whose members are all known gets their sum;
//!   - a missing grand total is derived from any fully-targeted partition
//!     (all sex subtotals, or all age-band subtotals);
//!   - a single missing subtotal in a partition is derived as
//!     `grand − Σ other subtotals`.
//! - A forced value that would be negative is clamped to zero; the resulting
//!   excess is reported later by [`ConstraintState::residuals`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Values written by the solver are exact integers; no randomness.
//! - The solver is pure: it takes a state by reference and returns a new one.
//! - Running [`close`] on its own output changes nothing (idempotence).
//! - A unit with at most one unknown cell per active margin is fully resolved.
use crate::imputation::core::{
    report::{FlagKind, UnitIssue},
    schema::GroupSchema,
    state::ConstraintState,
};

/// Result of one closure pass over a group.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosureOutcome {
    /// State after closure.
    pub state: ConstraintState,
    /// Cells resolved by the solver.
    pub solved_cells: usize,
    /// Margin targets derived by the solver.
    pub derived_margins: usize,
    /// Partition derivations that needed clamping.
    pub issues: Vec<UnitIssue>,
}

/// Resolve every forced cell of every unit in `state`.
///
/// Parameters
/// ----------
/// - `schema`: constraint graph of the group.
/// - `state`: current cell values and margin targets.
///
/// Returns
/// -------
/// ClosureOutcome
///   New state plus counts of solved cells and derived margins. Units are
///   processed independently; the pass ends for a unit once an iteration
///   changes nothing.
pub fn close(schema: &GroupSchema, state: &ConstraintState) -> ClosureOutcome {
    let mut next = state.clone();
    let mut solved_cells = 0;
    let mut derived_margins = 0;
    let mut issues = Vec::new();

    for unit in 0..next.n_units() {
        loop {
            let derived = complete_targets(schema, &mut next, unit, &mut issues);
            let solved = solve_cells(schema, &mut next, unit);
            derived_margins += derived;
            solved_cells += solved;
            if derived == 0 && solved == 0 {
                break;
            }
        }
    }

    ClosureOutcome { state: next, solved_cells, derived_margins, issues }
}

// ---- Helper methods ----

/// One sweep of forced-cell resolution for `unit`; returns cells solved.
fn solve_cells(schema: &GroupSchema, state: &mut ConstraintState, unit: usize) -> usize {
    let mut solved = 0;
    for (m, margin) in schema.margins().iter().enumerate() {
        let Some(target) = state.targets[[unit, m]] else { continue };
        let unknown: Vec<usize> =
            margin.members.iter().copied().filter(|&c| !state.known[[unit, c]]).collect();
        if unknown.is_empty() {
            continue;
        }

        // A margin with no capacity left forces every open member to zero.
        let rest = target - state.known_sum(unit, &margin.members);
        if rest <= 0 {
            for c in unknown {
                state.values[[unit, c]] = 0;
                state.known[[unit, c]] = true;
                solved += 1;
            }
        } else if let [c] = unknown[..] {
            state.values[[unit, c]] = rest;
            state.known[[unit, c]] = true;
            solved += 1;
        }
    }
    solved
}

/// Fill in margin targets implied by known cells or sibling targets.
fn complete_targets(
    schema: &GroupSchema, state: &mut ConstraintState, unit: usize, issues: &mut Vec<UnitIssue>,
) -> usize {
    let mut derived = 0;

    for (m, margin) in schema.margins().iter().enumerate() {
        if state.targets[[unit, m]].is_none()
            && margin.members.iter().all(|&c| state.known[[unit, c]])
        {
            state.targets[[unit, m]] = Some(state.known_sum(unit, &margin.members));
            derived += 1;
        }
    }

    let grand = schema.grand();
    for partition in schema.partitions() {
        let missing: Vec<usize> =
            partition.iter().copied().filter(|&m| state.targets[[unit, m]].is_none()).collect();
        let known_total: i64 = partition.iter().filter_map(|&m| state.targets[[unit, m]]).sum();

        match (state.targets[[unit, grand]], missing.as_slice()) {
            (None, []) => {
                state.targets[[unit, grand]] = Some(known_total);
                derived += 1;
            }
            (Some(total), [m]) => {
                let value = total - known_total;
                if value < 0 {
                    issues.push(UnitIssue::new(
                        unit,
                        FlagKind::InconsistentMargin {
                            margin: schema.margins()[grand].column.clone(),
                            excess: -value,
                        },
                    ));
                }
                state.targets[[unit, *m]] = Some(value.max(0));
                derived += 1;
            }
            _ => {}
        }
    }
    derived
}
