//! Orchestration — fan the group pipeline out over demographic groups and
//! merge the results into the output table.
//!
//! Purpose
//! -------
//! Run [`GroupImputer`] for every [`GroupSchema`] on a bounded rayon pool and
//! write the imputed cells back into a copy of the target table. Groups share
//! no mutable state; the merge happens single-threaded after every group has
//! finished.
//!
//! Key behaviors
//! -------------
//! - The pool size is `options.workers`, or every available core when `None`.
//! - Each group gets its own seed derived from the run's base seed and the
//!   group's position, so results do not depend on scheduling.
//! - A group that fails (missing cell columns, malformed incidence) is
//!   recorded in the [`ImputationReport`] and skipped; sibling groups are
//!   unaffected. Malformed counts or a missing population row only flag the
//!   affected unit.
//! - After write-back, margin columns are recomputed from their cells for
//!   every successfully processed group.
//!
//! Invariants & assumptions
//! ------------------------
//! - Only cells that were missing (or malformed) on input and resolved by
//!   the engine are written; known cells are never touched.
//! - The input tables are never mutated.
use rayon::prelude::*;
use slog::{Logger, info, warn};

use crate::{
    imputation::{
        core::{
            ensemble::group_seed,
            options::ImputeOptions,
            report::{GroupReport, ImputationReport},
            schema::GroupSchema,
        },
        errors::ImputeResult,
        models::group::{GroupImputer, GroupOutcome, extract_inputs},
    },
    logging::discard_logger,
    table::{GeoTable, recompute_margins},
};

/// Imputed table plus the run report.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputationOutcome {
    pub table: GeoTable,
    pub report: ImputationReport,
}

/// Imputer — entry point of the multi-constraint engine.
///
/// Construct with [`Imputer::new`] (validated options), optionally attach a
/// logger with [`Imputer::with_logger`], then call [`Imputer::impute`].
#[derive(Debug, Clone)]
pub struct Imputer {
    options: ImputeOptions,
    logger: Logger,
}

impl Imputer {
    /// Errors
    /// ------
    /// - Option validation errors (`InvalidReplicates`, `InvalidWorkers`,
    ///   `InvalidStepCap`).
    pub fn new(options: ImputeOptions) -> ImputeResult<Imputer> {
        options.validate()?;
        Ok(Imputer { options, logger: discard_logger() })
    }

    pub fn with_logger(mut self, logger: Logger) -> Imputer {
        self.logger = logger;
        self
    }

    pub fn options(&self) -> &ImputeOptions {
        &self.options
    }

    /// Impute the missing cells of `target` for every schema in `schemas`.
    ///
    /// Parameters
    /// ----------
    /// - `target`: counts with missing cells and (possibly partial) margins.
    /// - `population`: fully populated cell columns keyed like `target`.
    /// - `incidence`: optional single-row table of per-cell rates.
    /// - `schemas`: one schema per demographic group.
    ///
    /// Errors
    /// ------
    /// - `WorkerPool` when the rayon pool cannot be built. Per-group failures
    ///   are reported, not returned.
    pub fn impute(
        &self, target: &GeoTable, population: &GeoTable, incidence: Option<&GeoTable>,
        schemas: &[GroupSchema],
    ) -> ImputeResult<ImputationOutcome> {
        let base_seed = self.options.seed.unwrap_or_else(rand::random);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.unwrap_or(0))
            .build()?;
        info!(self.logger, "imputation started";
            "groups" => schemas.len(),
            "units" => target.n_rows(),
            "replicates" => self.options.replicates,
            "workers" => pool.current_num_threads());

        let results: Vec<ImputeResult<GroupOutcome>> = pool.install(|| {
            schemas
                .par_iter()
                .enumerate()
                .map(|(g, schema)| -> ImputeResult<GroupOutcome> {
                    let inputs = extract_inputs(schema, target, population, incidence)?;
                    GroupImputer::new(schema, &self.options, group_seed(base_seed, g), &self.logger)
                        .run(&inputs)
                })
                .collect()
        });

        let mut table = target.clone();
        let mut report = ImputationReport::default();
        for (schema, result) in schemas.iter().zip(results) {
            let merged = result.and_then(|outcome| {
                write_back(&mut table, schema, &outcome)?;
                recompute_margins(&mut table, schema)?;
                Ok(outcome.report)
            });
            match merged {
                Ok(group_report) => report.groups.push(group_report),
                Err(err) => {
                    warn!(self.logger, "group failed"; "group" => schema.name(), "error" => err.to_string());
                    report.groups.push(GroupReport::failed(schema.name(), err));
                }
            }
        }

        info!(self.logger, "imputation finished";
            "flags" => report.flags().count(),
            "failures" => report.failures().count());
        Ok(ImputationOutcome { table, report })
    }
}

// ---- Helper methods ----

/// Copy newly resolved cells of `outcome` into `table`.
fn write_back(table: &mut GeoTable, schema: &GroupSchema, outcome: &GroupOutcome) -> ImputeResult<()> {
    let cols: Vec<usize> =
        schema.cells().iter().map(|c| table.column_of(c)).collect::<Result<_, _>>()?;
    for (u, &row) in outcome.rows.iter().enumerate() {
        for (c, &col) in cols.iter().enumerate() {
            if !outcome.initial.known[[u, c]] && outcome.state.known[[u, c]] {
                table.set(row, col, outcome.state.values[[u, c]] as f64);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imputation::{core::report::FlagKind, errors::ImputeError};
    use ndarray::{Array2, array};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover write-back of imputed cells, margin recomputation,
    // failure isolation between groups and between units, and seed
    // reproducibility.
    // -------------------------------------------------------------------------

    fn tables() -> (GeoTable, GeoTable) {
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let mut columns: Vec<String> = schema.cells().to_vec();
        columns.extend(schema.margins().iter().map(|m| m.column.clone()));
        let nan = f64::NAN;
        let target = GeoTable::new(
            "FIPS",
            vec!["01001".into(), "01003".into()],
            columns,
            array![
                [nan, 2., 1., 1., nan, 2., 10., 6., 4., nan, nan, nan],
                [nan, nan, nan, nan, nan, nan, 9., 4., 5., nan, nan, nan]
            ],
        )
        .expect("valid");
        let population = GeoTable::new(
            "FIPS",
            vec!["01001".into(), "01003".into()],
            schema.cells().to_vec(),
            Array2::from_elem((2, 6), 100.0),
        )
        .expect("valid");
        (target, population)
    }

    #[test]
    // Purpose
    // -------
    // Verify imputed cells are written back and margins recomputed.
    //
    // Given
    // -----
    // - Unit 01001 (closure-only) and unit 01003 (all cells unknown, Total 9,
    //   Male 4, Female 5); seed 7.
    //
    // Expect
    // ------
    // - No missing cells; 01001 matches the exact solution; every margin of
    //   both units equals the sum of its cells; original totals preserved.
    fn impute_writes_back_and_recomputes_margins() {
        // Arrange
        let (target, population) = tables();
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let options = ImputeOptions { replicates: 10, seed: Some(7), workers: Some(2), ..Default::default() };
        let imputer = Imputer::new(options).expect("valid options");

        // Act
        let outcome = imputer.impute(&target, &population, None, &[schema.clone()]).expect("runs");

        // Assert
        let table = &outcome.table;
        assert_eq!(table.count_missing(schema.cells()), 0);
        let cell = |row: usize, name: &str| table.get(row, table.column_of(name).expect("col"));
        assert_eq!(cell(0, "W_Male_50-"), Some(3.0));
        assert_eq!(cell(0, "W_Female_50-65"), Some(1.0));
        assert_eq!(cell(1, "W_Total"), Some(9.0));
        assert_eq!(cell(1, "W_Male"), Some(4.0));
        assert_eq!(cell(1, "W_Female"), Some(5.0));
        let age_sum: f64 =
            ["W_50-", "W_50-65", "W_65+"].iter().filter_map(|c| cell(1, c)).sum();
        assert_eq!(age_sum, 9.0);
        assert!(outcome.report.is_clean());
    }

    #[test]
    // Purpose
    // -------
    // Ensure a failing group is reported without aborting its siblings.
    //
    // Given
    // -----
    // - Schemas for W (columns present) and B (columns absent).
    //
    // Expect
    // ------
    // - Two group reports; B carries a `Table` failure; W is imputed.
    fn impute_isolates_group_failures() {
        // Arrange
        let (target, population) = tables();
        let schemas = vec![
            GroupSchema::default_sex_by_age("W").expect("valid"),
            GroupSchema::default_sex_by_age("B").expect("valid"),
        ];
        let options = ImputeOptions { replicates: 4, seed: Some(1), ..Default::default() };

        // Act
        let outcome = Imputer::new(options)
            .expect("valid")
            .impute(&target, &population, None, &schemas)
            .expect("runs");

        // Assert
        let failures: Vec<(&str, &ImputeError)> = outcome.report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "B");
        assert!(matches!(failures[0].1, ImputeError::Table(_)));
        assert_eq!(outcome.table.count_missing(schemas[0].cells()), 0);
    }

    #[test]
    // Purpose
    // -------
    // Ensure a unit without a population row is flagged while the rest of
    // its group, and the unit's own closure, proceed.
    //
    // Given
    // -----
    // - Two identical closure-solvable units 01001 and 01003; population
    //   holds 01001 only.
    //
    // Expect
    // ------
    // - No group failure; W_Male_50- = 3 for both units; one `InvalidInput`
    //   flag keyed 01003.
    fn impute_flags_missing_population_row_per_unit() {
        // Arrange
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let mut columns: Vec<String> = schema.cells().to_vec();
        columns.extend(schema.margins().iter().map(|m| m.column.clone()));
        let nan = f64::NAN;
        let target = GeoTable::new(
            "FIPS",
            vec!["01001".into(), "01003".into()],
            columns,
            array![
                [nan, 2., 1., 1., nan, 2., 10., 6., 4., nan, nan, nan],
                [nan, 2., 1., 1., nan, 2., 10., 6., 4., nan, nan, nan]
            ],
        )
        .expect("valid");
        let population = GeoTable::new(
            "FIPS",
            vec!["01001".into()],
            schema.cells().to_vec(),
            Array2::from_elem((1, 6), 100.0),
        )
        .expect("valid");
        let options = ImputeOptions { replicates: 2, seed: Some(3), ..Default::default() };

        // Act
        let outcome = Imputer::new(options)
            .expect("valid")
            .impute(&target, &population, None, std::slice::from_ref(&schema))
            .expect("runs");

        // Assert
        let table = &outcome.table;
        let col = table.column_of("W_Male_50-").expect("col");
        assert_eq!(outcome.report.failures().count(), 0);
        assert_eq!(table.get(0, col), Some(3.0));
        assert_eq!(table.get(1, col), Some(3.0));
        assert_eq!(table.count_missing(schema.cells()), 0);
        let flags: Vec<_> = outcome.report.flags().collect();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].key, "01003");
        assert!(matches!(flags[0].kind, FlagKind::InvalidInput { .. }));
    }

    #[test]
    // Purpose
    // -------
    // Verify a fixed seed reproduces the output regardless of worker count.
    //
    // Given
    // -----
    // - The same inputs run with seed 11 on 1 and 3 workers.
    //
    // Expect
    // ------
    // - Identical output tables.
    fn impute_is_reproducible_across_worker_counts() {
        let (target, population) = tables();
        let schema = GroupSchema::default_sex_by_age("W").expect("valid");
        let run = |workers| {
            let options =
                ImputeOptions { replicates: 6, seed: Some(11), workers: Some(workers), ..Default::default() };
            Imputer::new(options)
                .expect("valid")
                .impute(&target, &population, None, std::slice::from_ref(&schema))
                .expect("runs")
                .table
        };

        assert_eq!(run(1), run(3));
    }

    #[test]
    // Purpose
    // -------
    // Ensure invalid options are rejected at construction.
    fn new_rejects_invalid_options() {
        let options = ImputeOptions { replicates: 0, ..Default::default() };
        assert_eq!(Imputer::new(options).unwrap_err(), ImputeError::InvalidReplicates { value: 0 });
    }
}
