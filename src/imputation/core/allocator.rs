//! Stochastic sequential allocator — one replicate of the constrained
//! multinomial fill.
//!
//! Purpose
//! -------
//! Distribute every row's residual grand total one indivisible unit at a
//! time over the cells that may still receive counts, such that every margin
//! bounding a touched cell shrinks in lockstep and none goes negative.
//!
//! Key behaviors
//! -------------
//! - Joint draw: the probability of choosing cell `j` of row `i` is
//!   proportional to `R_i · w_ij` over fillable cells, where `R_i` is the
//!   row's outstanding grand total. A [`WeightTree`] holds the per-row mass
//!   `R_i · S_i` (`S_i` = Σ fillable weights of the row); one uniform draw
//!   `u ∈ (0, total]` selects the first row whose cumulative mass is `≥ u`,
//!   and `(u − prefix) / R_i` selects the first cell of that row whose
//!   cumulative weight is `≥` it. This is the flattened inverse-CDF search
//!   with the same tie convention, without materializing the flattened CDF.
//! - After each step only the chosen row's mass is recomputed. Under the
//!   uniform zero-weight policy a margin left with capacity but no fillable
//!   mass has its fillable cells reweighted to 1 first; such rows are listed
//!   in [`SimulationReplicate::reweighted`].
//! - Termination reasons are reported via [`Termination`]; rows left with a
//!   positive outstanding total are reported in
//!   [`SimulationReplicate::undistributed`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Each step consumes exactly one unit of some row's grand total, so the
//!   default step cap `Σ R_i` is never the binding stop condition on
//!   consistent input.
//! - The allocator never mutates the shared problem; each run clones it.
//! - Randomness comes solely from the caller's RNG, so a seeded RNG yields a
//!   reproducible replicate.
use ndarray::Array2;
use rand::Rng;

use crate::imputation::core::{
    problem::AllocationProblem, schema::GroupSchema, weight_tree::WeightTree,
};

/// Why a replicate stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every row's grand total was distributed.
    Satisfied,
    /// Outstanding totals remain but no cell may receive a unit.
    NoFillableCells,
    /// Fillable cells remain but their combined weight is zero.
    ZeroWeight,
    /// The step cap was reached first.
    StepCap,
}

/// One complete candidate assignment of the problem's open cells.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReplicate {
    /// `rows × cells`; final counts of open cells.
    pub assigned: Array2<i64>,
    /// Per row, grand total left undistributed.
    pub undistributed: Vec<i64>,
    /// Rows whose stranded margins fell back to uniform weights mid-run.
    pub reweighted: Vec<usize>,
    pub steps: usize,
    pub termination: Termination,
}

/// SequentialAllocator — runs replicates over a shared problem.
///
/// Parameters
/// ----------
/// - `schema`: constraint graph of the group.
/// - `problem`: starting point (normally the pre-filled problem).
/// - `max_steps`: explicit cap, or `None` for `Σ outstanding`.
#[derive(Debug, Clone)]
pub struct SequentialAllocator<'a> {
    schema: &'a GroupSchema,
    problem: &'a AllocationProblem,
    max_steps: usize,
}

impl<'a> SequentialAllocator<'a> {
    pub fn new(
        schema: &'a GroupSchema, problem: &'a AllocationProblem, max_steps: Option<usize>,
    ) -> SequentialAllocator<'a> {
        let natural = usize::try_from(problem.total_outstanding()).unwrap_or(0);
        SequentialAllocator { schema, problem, max_steps: max_steps.unwrap_or(natural) }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run one replicate with `rng`.
    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> SimulationReplicate {
        let schema = self.schema;
        let mut work = self.problem.clone();
        let mut reweighted: Vec<usize> =
            (0..work.n_rows()).filter(|&r| work.reweight_stranded(schema, r)).collect();
        let masses: Vec<f64> = (0..work.n_rows()).map(|r| row_mass(&work, r)).collect();
        let mut tree = WeightTree::with_values(&masses);
        let mut outstanding = work.total_outstanding();
        let mut steps = 0usize;

        let termination = loop {
            if outstanding <= 0 {
                break Termination::Satisfied;
            }
            let total = tree.total();
            if total <= 0.0 {
                break if work.fillable.iter().any(|&f| f) {
                    Termination::ZeroWeight
                } else {
                    Termination::NoFillableCells
                };
            }
            if steps >= self.max_steps {
                break Termination::StepCap;
            }

            // gen() is in [0, 1); flip it so u is in (0, total].
            let u = (1.0 - rng.r#gen::<f64>()) * total;
            let Some((row, before)) = tree.find(u) else {
                break Termination::ZeroWeight;
            };
            let Some(cell) = pick_cell(&work, row, (u - before) / work.outstanding(row) as f64)
            else {
                tree.set(row, 0.0);
                continue;
            };

            work.apply(schema, row, cell, 1);
            outstanding -= 1;
            steps += 1;
            if work.reweight_stranded(schema, row) && !reweighted.contains(&row) {
                reweighted.push(row);
            }
            tree.set(row, row_mass(&work, row));
        };

        let undistributed = (0..work.n_rows()).map(|r| work.outstanding(r)).collect();
        SimulationReplicate { assigned: work.assigned, undistributed, reweighted, steps, termination }
    }
}

// ---- Helper methods ----

/// `R_i · S_i`, zero when the row is exhausted.
fn row_mass(problem: &AllocationProblem, r: usize) -> f64 {
    let outstanding = problem.outstanding(r);
    if outstanding <= 0 {
        return 0.0;
    }
    outstanding as f64 * problem.fillable_weight(r)
}

/// First fillable cell of row `r` whose cumulative weight is `≥ v`, falling
/// back to the last positive-weight fillable cell under rounding drift.
fn pick_cell(problem: &AllocationProblem, r: usize, v: f64) -> Option<usize> {
    let mut acc = 0.0;
    let mut last = None;
    for (c, (&w, &fillable)) in
        problem.weights.row(r).iter().zip(problem.fillable.row(r)).enumerate()
    {
        if !fillable || w <= 0.0 {
            continue;
        }
        acc += w;
        last = Some(c);
        if acc >= v {
            return Some(c);
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imputation::core::{
        options::ZeroWeightPolicy, state::ConstraintState,
    };
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Exact distribution of a grand total over all-unknown cells.
    // - Stochastic (non-degenerate) outcomes across seeds.
    // - Margin respect and masking of exhausted sub-margins.
    // - Termination when no cell can receive counts, on zero weight, and at
    //   the step cap.
    // - The uniform fallback for margins stranded mid-run.
    // -------------------------------------------------------------------------

    fn all_unknown(
        schema: &GroupSchema, targets: Array2<Option<i64>>, weights: Array2<f64>,
    ) -> AllocationProblem {
        all_unknown_with(schema, targets, weights, ZeroWeightPolicy::Uniform)
    }

    fn all_unknown_with(
        schema: &GroupSchema, targets: Array2<Option<i64>>, weights: Array2<f64>,
        policy: ZeroWeightPolicy,
    ) -> AllocationProblem {
        let cells = Array2::from_elem((targets.nrows(), schema.n_cells()), None);
        let state = ConstraintState::from_options(schema, &cells, targets).expect("valid shapes");
        let residuals = state.residuals(schema);
        AllocationProblem::build(schema, &state, &residuals, weights.view(), policy).0
    }

    #[test]
    // Purpose
    // -------
    // Verify a grand total of 5 over six unknown cells is distributed exactly.
    //
    // Given
    // -----
    // - Sex-by-age row, Total 5, no sub-margins, uniform weights.
    //
    // Expect
    // ------
    // - Cells sum to 5, all non-negative; `Satisfied` after 5 steps.
    fn allocator_distributes_grand_total_exactly() {
        // Arrange
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let problem = all_unknown(
            &schema,
            array![[Some(5), None, None, None, None, None]],
            Array2::from_elem((1, 6), 1.0),
        );
        let allocator = SequentialAllocator::new(&schema, &problem, None);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        // Act
        let replicate = allocator.run(&mut rng);

        // Assert
        assert_eq!(replicate.assigned.sum(), 5);
        assert!(replicate.assigned.iter().all(|&v| v >= 0));
        assert_eq!(replicate.termination, Termination::Satisfied);
        assert_eq!(replicate.steps, 5);
        assert_eq!(replicate.undistributed, vec![0]);
    }

    #[test]
    // Purpose
    // -------
    // Ensure the allocator is genuinely stochastic.
    //
    // Given
    // -----
    // - The Total-5 problem run 50 times with seeds 0..50.
    //
    // Expect
    // ------
    // - Every outcome sums to 5; more than one distinct assignment observed.
    fn allocator_outcomes_vary_across_seeds() {
        // Arrange
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let problem = all_unknown(
            &schema,
            array![[Some(5), None, None, None, None, None]],
            Array2::from_elem((1, 6), 1.0),
        );
        let allocator = SequentialAllocator::new(&schema, &problem, None);

        // Act
        let outcomes: Vec<Vec<i64>> = (0..50)
            .map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                allocator.run(&mut rng).assigned.iter().copied().collect()
            })
            .collect();

        // Assert
        assert!(outcomes.iter().all(|o| o.iter().sum::<i64>() == 5));
        let distinct: HashSet<&Vec<i64>> = outcomes.iter().collect();
        assert!(distinct.len() > 1, "expected varied outcomes, got {distinct:?}");
    }

    #[test]
    // Purpose
    // -------
    // Verify every active margin is met exactly on consistent input.
    //
    // Given
    // -----
    // - Total 12, Male 5, Female 7, ages 3/4/5, skewed weights.
    //
    // Expect
    // ------
    // - Sex sums 5/7, age sums 3/4/5 for each of several seeds.
    fn allocator_meets_every_margin() {
        // Arrange
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let problem = all_unknown(
            &schema,
            array![[Some(12), Some(5), Some(7), Some(3), Some(4), Some(5)]],
            array![[5.0, 1.0, 1.0, 1.0, 1.0, 5.0]],
        );
        let allocator = SequentialAllocator::new(&schema, &problem, None);

        for seed in 0..20 {
            // Act
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let replicate = allocator.run(&mut rng);
            let x = &replicate.assigned;

            // Assert
            assert_eq!(replicate.termination, Termination::Satisfied, "seed {seed}");
            assert_eq!(replicate.undistributed, vec![0]);
            assert_eq!(x[[0, 0]] + x[[0, 1]] + x[[0, 2]], 5);
            assert_eq!(x[[0, 3]] + x[[0, 4]] + x[[0, 5]], 7);
            assert_eq!(x[[0, 0]] + x[[0, 3]], 3);
            assert_eq!(x[[0, 1]] + x[[0, 4]], 4);
            assert_eq!(x[[0, 2]] + x[[0, 5]], 5);
        }
    }

    #[test]
    // Purpose
    // -------
    // Ensure the allocator stops when exhausted sub-margins mask every cell.
    //
    // Given
    // -----
    // - Sex-by-age row with Total 4 but Male 0 and Female 0 (inconsistent
    //   input).
    //
    // Expect
    // ------
    // - `NoFillableCells`, nothing assigned, 4 undistributed.
    fn allocator_stops_without_fillable_cells() {
        // Arrange
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let problem = all_unknown(
            &schema,
            array![[Some(4), Some(0), Some(0), None, None, None]],
            Array2::from_elem((1, 6), 1.0),
        );
        let allocator = SequentialAllocator::new(&schema, &problem, None);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        // Act
        let replicate = allocator.run(&mut rng);

        // Assert
        assert_eq!(replicate.termination, Termination::NoFillableCells);
        assert_eq!(replicate.assigned.sum(), 0);
        assert_eq!(replicate.undistributed, vec![4]);
        assert_eq!(replicate.steps, 0);
    }

    #[test]
    // Purpose
    // -------
    // Verify the explicit step cap bounds the run.
    //
    // Given
    // -----
    // - Two category rows with totals 10 and 20; cap 7.
    //
    // Expect
    // ------
    // - `StepCap` after exactly 7 steps; 23 undistributed in total.
    fn allocator_honours_step_cap() {
        // Arrange
        let schema = GroupSchema::category_totals("P", &["a", "b", "c"]).expect("valid");
        let problem = all_unknown(
            &schema,
            array![[Some(10)], [Some(20)]],
            array![[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]],
        );
        let allocator = SequentialAllocator::new(&schema, &problem, Some(7));
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        // Act
        let replicate = allocator.run(&mut rng);

        // Assert
        assert_eq!(replicate.termination, Termination::StepCap);
        assert_eq!(replicate.steps, 7);
        assert_eq!(replicate.undistributed.iter().sum::<i64>(), 23);
        assert_eq!(allocator.max_steps(), 7);
    }

    #[test]
    // Purpose
    // -------
    // Verify a margin stranded mid-run stops the replicate with `ZeroWeight`
    // when the fallback is disabled.
    //
    // Given
    // -----
    // - Total 3, Male 2, Female 1, 50- 1; weights [1,0,0,1,1,1];
    //   `LeaveUnresolved`.
    // - Once 50- closes, the open Male cells carry no weight.
    //
    // Expect
    // ------
    // - `ZeroWeight` for every seed, with part of the total undistributed,
    //   nothing reweighted and the zero-weight Male cells left empty.
    fn allocator_stops_on_zero_weight() {
        // Arrange
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let problem = all_unknown_with(
            &schema,
            array![[Some(3), Some(2), Some(1), Some(1), None, None]],
            array![[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]],
            ZeroWeightPolicy::LeaveUnresolved,
        );
        let allocator = SequentialAllocator::new(&schema, &problem, None);

        for seed in 0..10 {
            // Act
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let replicate = allocator.run(&mut rng);

            // Assert
            assert_eq!(replicate.termination, Termination::ZeroWeight, "seed {seed}");
            assert!(replicate.undistributed[0] > 0);
            assert!(replicate.reweighted.is_empty());
            assert_eq!(replicate.assigned[[0, 1]] + replicate.assigned[[0, 2]], 0);
        }
    }

    #[test]
    // Purpose
    // -------
    // Verify the uniform fallback completes a margin stranded mid-run.
    //
    // Given
    // -----
    // - The `ZeroWeight` problem above under `Uniform`.
    //
    // Expect
    // ------
    // - `Satisfied` for every seed; Male sums to 2, Female to 1, 50- to 1;
    //   row 0 reported as reweighted.
    fn allocator_reweights_stranded_margin() {
        // Arrange
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let problem = all_unknown(
            &schema,
            array![[Some(3), Some(2), Some(1), Some(1), None, None]],
            array![[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]],
        );
        let allocator = SequentialAllocator::new(&schema, &problem, None);

        for seed in 0..10 {
            // Act
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let replicate = allocator.run(&mut rng);
            let x = &replicate.assigned;

            // Assert
            assert_eq!(replicate.termination, Termination::Satisfied, "seed {seed}");
            assert_eq!(x[[0, 0]] + x[[0, 1]] + x[[0, 2]], 2);
            assert_eq!(x[[0, 3]] + x[[0, 4]] + x[[0, 5]], 1);
            assert_eq!(x[[0, 0]] + x[[0, 3]], 1);
            assert_eq!(replicate.reweighted, vec![0]);
        }
    }
}
