//! Group pipeline — closure, pre-fill, ensemble and reporting for one group.
//!
//! Purpose
//! -------
//! Run the full engine for one demographic group over the units of a target
//! table that have missing cells: extract the constraint state and weights,
//! resolve forced cells, pre-fill, run the replicate ensemble and assemble a
//! [`GroupOutcome`] holding the final state and a [`GroupReport`].
//!
//! Key behaviors
//! -------------
//! - [`extract_inputs`] selects units with at least one missing cell (sorted
//!   by key), aligns population rows by key, and multiplies by the incidence
//!   rate per cell (rate 1 when no incidence table or column is given).
//! - A unit whose own values or population row are unusable is flagged and
//!   kept out of the allocation; closure still runs on it.
//! - [`GroupImputer::run`] is side-effect free apart from logging; writing
//!   results back into the shared table is left to the orchestrator.
//! - Data-quality findings become [`UnitFlag`]s; only structurally unusable
//!   input is an error.
//!
//! Invariants & assumptions
//! ------------------------
//! - Cells known on input are never changed.
//! - Units left out of the allocation problem keep the cells closure could
//!   not determine unknown.
use ndarray::{Array1, Array2};
use slog::{Logger, debug, info, warn};

use crate::{
    imputation::{
        core::{
            allocator::Termination,
            close,
            options::ImputeOptions,
            prefill,
            problem::AllocationProblem,
            report::{FlagKind, GroupReport, UnitFlag, UnitIssue},
            run_ensemble,
            schema::GroupSchema,
            state::ConstraintState,
            validation::{validate_incidence, validate_weight},
        },
        errors::{ImputeError, ImputeResult},
    },
    table::GeoTable,
};

/// Inputs of one group, aligned by unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupInputs {
    /// Row indices into the target table.
    pub rows: Vec<usize>,
    /// Geographic keys of `rows`.
    pub keys: Vec<String>,
    pub state: ConstraintState,
    /// `units × cells`; population × incidence.
    pub weights: Array2<f64>,
    /// Units with unusable values or population; closed but never allocated.
    pub excluded: Vec<bool>,
    /// `InvalidInput` findings raised during extraction.
    pub issues: Vec<UnitIssue>,
}

/// Result of one group run.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOutcome {
    pub rows: Vec<usize>,
    /// State on input.
    pub initial: ConstraintState,
    /// State after imputation.
    pub state: ConstraintState,
    pub report: GroupReport,
}

/// Extract the units of `target` with missing cells for `schema`.
///
/// A unit with a malformed count, no population row or an invalid
/// population weight is flagged `InvalidInput` and marked excluded; its
/// weights are zero and the other units are unaffected.
///
/// Errors
/// ------
/// - `Table(MissingColumn)` when a cell column is absent from `target` or
///   `population`.
/// - `InvalidIncidence` for a malformed incidence rate.
pub fn extract_inputs(
    schema: &GroupSchema, target: &GeoTable, population: &GeoTable, incidence: Option<&GeoTable>,
) -> ImputeResult<GroupInputs> {
    let cell_cols: Vec<usize> =
        schema.cells().iter().map(|c| target.column_of(c)).collect::<Result<_, _>>()?;
    let mut rows: Vec<usize> = (0..target.n_rows())
        .filter(|&r| cell_cols.iter().any(|&col| target.get(r, col).is_none()))
        .collect();
    rows.sort_by(|&a, &b| target.keys()[a].cmp(&target.keys()[b]));
    let keys: Vec<String> = rows.iter().map(|&r| target.keys()[r].clone()).collect();

    let (state, mut issues) = ConstraintState::from_table(schema, target, &rows)?;
    let rates = incidence_rates(schema, incidence)?;

    let pop_cols: Vec<usize> =
        schema.cells().iter().map(|c| population.column_of(c)).collect::<Result<_, _>>()?;
    let mut excluded = vec![false; rows.len()];
    for issue in &issues {
        excluded[issue.unit] = true;
    }
    let mut weights = Array2::zeros((rows.len(), schema.n_cells()));
    for (u, key) in keys.iter().enumerate() {
        match unit_weights(schema, population, &pop_cols, &rates, key) {
            Ok(row) if !excluded[u] => weights.row_mut(u).assign(&row),
            Ok(_) => {}
            Err(err) => {
                excluded[u] = true;
                issues.push(UnitIssue::new(u, FlagKind::InvalidInput { reason: err.to_string() }));
            }
        }
    }

    Ok(GroupInputs { rows, keys, state, weights, excluded, issues })
}

/// GroupImputer — runs the engine for one group.
///
/// Fields
/// ------
/// - `schema`: the group's constraint graph.
/// - `options`: run configuration.
/// - `seed`: this group's seed (already mixed with the group index).
/// - `logger`: child logger tagged with the group name.
#[derive(Debug, Clone)]
pub struct GroupImputer<'a> {
    schema: &'a GroupSchema,
    options: &'a ImputeOptions,
    seed: u64,
    logger: Logger,
}

impl<'a> GroupImputer<'a> {
    pub fn new(
        schema: &'a GroupSchema, options: &'a ImputeOptions, seed: u64, logger: &Logger,
    ) -> GroupImputer<'a> {
        let logger = logger.new(slog::o!("group" => schema.name().to_string()));
        GroupImputer { schema, options, seed, logger }
    }

    /// Run closure → pre-fill → ensemble on `inputs`.
    ///
    /// Errors
    /// ------
    /// - `InvalidReplicates` when the options carry zero replicates.
    pub fn run(&self, inputs: &GroupInputs) -> ImputeResult<GroupOutcome> {
        let schema = self.schema;
        let mut report = GroupReport::new(schema.name());
        report.units = inputs.rows.len();
        let mut issues: Vec<UnitIssue> = inputs.issues.clone();

        let closure = close(schema, &inputs.state);
        report.closed_cells = closure.solved_cells;
        report.derived_margins = closure.derived_margins;
        extend_unique(&mut issues, closure.issues);
        debug!(self.logger, "closure finished";
            "units" => inputs.rows.len(),
            "solved_cells" => closure.solved_cells,
            "derived_margins" => closure.derived_margins,
            "unknown_left" => closure.state.unknown_count());

        let residuals = closure.state.residuals(schema);
        extend_unique(&mut issues, residuals.issues.clone());
        let (problem, build_issues) = AllocationProblem::build_excluding(
            schema,
            &closure.state,
            &residuals,
            inputs.weights.view(),
            self.options.zero_weights,
            &inputs.excluded,
        );
        extend_unique(&mut issues, build_issues);

        let state = if problem.n_rows() == 0 {
            closure.state
        } else {
            let filled = prefill(schema, &problem, self.options.prefill_budget);
            report.stochastic_units = problem.n_rows();
            report.prefilled = filled.assigned;
            report.stochastic_total = filled.problem.total_outstanding();
            debug!(self.logger, "pre-fill finished";
                "rows" => problem.n_rows(),
                "prefilled" => filled.assigned,
                "ratio" => filled.ratio,
                "stochastic_total" => report.stochastic_total);

            let ensemble = run_ensemble(
                schema,
                &filled.problem,
                self.options.replicates,
                self.seed,
                self.options.selection,
                self.options.max_steps,
            )?;
            report.replicates = self.options.replicates;
            report.selected_replicate = Some(ensemble.selected);
            debug!(self.logger, "replicate selected";
                "selected" => ensemble.selected,
                "score" => ensemble.scores[ensemble.selected],
                "steps" => ensemble.replicate.steps,
                "termination" => format!("{:?}", ensemble.replicate.termination));

            for &r in &ensemble.replicate.reweighted {
                extend_unique(
                    &mut issues,
                    vec![UnitIssue::new(problem.rows[r], FlagKind::DegenerateWeights)],
                );
            }
            let capped = ensemble.replicate.termination == Termination::StepCap;
            for (r, &left) in ensemble.replicate.undistributed.iter().enumerate() {
                if left <= 0 {
                    continue;
                }
                let unit = problem.rows[r];
                issues.push(UnitIssue::new(unit, FlagKind::Undistributed { remaining: left }));
                if capped {
                    issues.push(UnitIssue::new(
                        unit,
                        FlagKind::StepCapReached { steps: ensemble.replicate.steps },
                    ));
                }
            }
            problem.resolve(&closure.state, &ensemble.replicate.assigned)
        };

        report.flags = issues
            .into_iter()
            .map(|issue| UnitFlag {
                group: schema.name().to_string(),
                key: inputs.keys[issue.unit].clone(),
                kind: issue.kind,
            })
            .collect();
        for flag in &report.flags {
            warn!(self.logger, "unit flagged"; "key" => &flag.key, "flag" => flag.kind.to_string());
        }
        info!(self.logger, "group finished";
            "units" => report.units,
            "closed_cells" => report.closed_cells,
            "stochastic_units" => report.stochastic_units,
            "flags" => report.flags.len());

        Ok(GroupOutcome { rows: inputs.rows.clone(), initial: inputs.state.clone(), state, report })
    }
}

// ---- Helper methods ----

/// Population × incidence weights of the unit keyed `key`.
fn unit_weights(
    schema: &GroupSchema, population: &GeoTable, pop_cols: &[usize], rates: &[f64], key: &str,
) -> ImputeResult<Array1<f64>> {
    let pop_row = population
        .row_of(key)
        .ok_or_else(|| ImputeError::MissingPopulationRow { key: key.to_string() })?;
    pop_cols
        .iter()
        .enumerate()
        .map(|(c, &col)| {
            let value = population.get(pop_row, col).unwrap_or(f64::NAN);
            Ok(validate_weight(value, key, &schema.cells()[c])? * rates[c])
        })
        .collect()
}

fn incidence_rates(schema: &GroupSchema, incidence: Option<&GeoTable>) -> ImputeResult<Vec<f64>> {
    let Some(table) = incidence.filter(|t| t.n_rows() > 0) else {
        return Ok(vec![1.0; schema.n_cells()]);
    };
    schema
        .cells()
        .iter()
        .map(|cell| match table.column_of(cell) {
            Ok(col) => validate_incidence(table.get(0, col).unwrap_or(f64::NAN), cell),
            Err(_) => Ok(1.0),
        })
        .collect()
}

fn extend_unique(issues: &mut Vec<UnitIssue>, more: Vec<UnitIssue>) {
    for issue in more {
        if !issues.contains(&issue) {
            issues.push(issue);
        }
    }
}
