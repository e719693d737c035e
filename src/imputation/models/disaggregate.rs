//! Single-level disaggregation — split parent totals across sub-units.
//!
//! Purpose
//! -------
//! Distribute each parent-level count (e.g. a county's `W_Male_50-`) across
//! the parent's sub-unit rows (e.g. ZCTAs) in proportion to sub-unit
//! population. This is the unconstrained sibling of the multi-constraint
//! engine: there are no margins to honour beyond the parent total itself.
//!
//! Key behaviors
//! -------------
//! - For each `(parent, cell column)`: a zero total gives zeros; a missing
//!   total leaves the sub-unit cells missing; otherwise `replicates`
//!   multinomial draws are made by inverse CDF (first cumulative share
//!   strictly greater than the uniform) and one draw is selected with the
//!   configured [`SelectionRule`](crate::imputation::core::SelectionRule).
//! - All-zero population for a parent column falls back to equal shares and
//!   flags the parent with [`FlagKind::DegenerateWeights`].
//! - A malformed parent total or sub-unit population value leaves that
//!   parent column missing and flags it with [`FlagKind::InvalidInput`];
//!   other parents and columns are unaffected.
//! - Parents are processed in parallel on a bounded rayon pool; write-back is
//!   single-threaded. Margin columns are recomputed for every schema, and an
//!   optional total group is derived as the cell-wise sum of all schemas.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every selected draw sums to its parent total.
//! - Seeds are derived per parent position (sorted by key) and per column,
//!   so a fixed seed reproduces the output for any worker count.
use std::collections::BTreeMap;

use ndarray::Array2;
use rand::Rng;
use rayon::prelude::*;
use slog::{Logger, info, warn};

use crate::{
    imputation::{
        core::{
            ensemble::{group_seed, replicate_rng, select_representative},
            options::DisaggregateOptions,
            report::{FlagKind, UnitFlag},
            schema::GroupSchema,
            validation::{validate_count, validate_weight},
        },
        errors::{ImputeError, ImputeResult},
    },
    logging::discard_logger,
    table::{GeoTable, recompute_margins, sum_groups},
};

/// Sub-unit table plus data-quality flags keyed by parent.
#[derive(Debug, Clone, PartialEq)]
pub struct DisaggregationOutcome {
    pub table: GeoTable,
    pub flags: Vec<UnitFlag>,
}

/// Disaggregator — population-proportional split of parent totals.
#[derive(Debug, Clone)]
pub struct Disaggregator {
    options: DisaggregateOptions,
    logger: Logger,
    total_group: Option<GroupSchema>,
}

/// Draws for one parent, per output column (`None` = total missing).
struct ParentDraws {
    rows: Vec<usize>,
    columns: Vec<Option<Vec<i64>>>,
    flags: Vec<UnitFlag>,
}

impl Disaggregator {
    pub fn new(options: DisaggregateOptions) -> ImputeResult<Disaggregator> {
        options.validate()?;
        Ok(Disaggregator { options, logger: discard_logger(), total_group: None })
    }

    pub fn with_logger(mut self, logger: Logger) -> Disaggregator {
        self.logger = logger;
        self
    }

    /// Derive `total` (e.g. `AllRace`) as the cell-wise sum of the schemas
    /// passed to [`Disaggregator::disaggregate`].
    pub fn with_total_group(mut self, total: GroupSchema) -> Disaggregator {
        self.total_group = Some(total);
        self
    }

    pub fn options(&self) -> &DisaggregateOptions {
        &self.options
    }

    /// Split every cell of `schemas` from `parents` across the rows of
    /// `population`.
    ///
    /// Parameters
    /// ----------
    /// - `parents`: one row per parent, holding the cell columns.
    /// - `population`: one row per sub-unit, holding the same cell columns.
    /// - `parent_of`: parent key of each `population` row.
    /// - `schemas`: groups whose cells are split and whose margins are
    ///   recomputed on the output.
    ///
    /// Errors
    /// ------
    /// - `ShapeMismatch` when `parent_of` and `population` disagree in length.
    /// - `MissingParentRow` when a sub-unit names an unknown parent.
    /// - `Table(MissingColumn)` for absent cell columns; `WorkerPool` when the
    ///   pool cannot be built. Malformed values are flagged per parent.
    pub fn disaggregate(
        &self, parents: &GeoTable, population: &GeoTable, parent_of: &[String],
        schemas: &[GroupSchema],
    ) -> ImputeResult<DisaggregationOutcome> {
        if parent_of.len() != population.n_rows() {
            return Err(ImputeError::ShapeMismatch {
                expected: (population.n_rows(), 1),
                actual: (parent_of.len(), 1),
            });
        }

        let mut members: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (row, parent) in parent_of.iter().enumerate() {
            members.entry(parent.as_str()).or_default().push(row);
        }
        let units: Vec<(usize, &str, Vec<usize>)> = members
            .into_iter()
            .map(|(key, rows)| {
                parents
                    .row_of(key)
                    .map(|p| (p, key, rows))
                    .ok_or_else(|| ImputeError::MissingParentRow { key: key.to_string() })
            })
            .collect::<Result<_, _>>()?;

        let columns: Vec<String> = schemas.iter().flat_map(|s| s.cells().iter().cloned()).collect();
        let groups: Vec<&str> =
            schemas.iter().flat_map(|s| std::iter::repeat_n(s.name(), s.n_cells())).collect();
        let parent_cols: Vec<usize> =
            columns.iter().map(|c| parents.column_of(c)).collect::<Result<_, _>>()?;
        let pop_cols: Vec<usize> =
            columns.iter().map(|c| population.column_of(c)).collect::<Result<_, _>>()?;

        let base_seed = self.options.seed.unwrap_or_else(rand::random);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.unwrap_or(0))
            .build()?;
        info!(self.logger, "disaggregation started";
            "parents" => units.len(),
            "sub_units" => population.n_rows(),
            "columns" => columns.len(),
            "replicates" => self.options.replicates);

        let draws: Vec<ParentDraws> = pool.install(|| {
            units
                .par_iter()
                .enumerate()
                .map(|(p, (parent_row, key, rows))| {
                    let seed = group_seed(base_seed, p);
                    let mut out =
                        ParentDraws { rows: rows.clone(), columns: Vec::new(), flags: Vec::new() };
                    for (c, column) in columns.iter().enumerate() {
                        let Some(value) = parents.get(*parent_row, parent_cols[c]) else {
                            out.columns.push(None);
                            continue;
                        };
                        let drawn = validate_count(value, key, column).and_then(|total| {
                            let mut weights = rows
                                .iter()
                                .map(|&r| {
                                    let value = population.get(r, pop_cols[c]).unwrap_or(f64::NAN);
                                    validate_weight(value, &population.keys()[r], column)
                                })
                                .collect::<ImputeResult<Vec<f64>>>()?;
                            let degenerate = total > 0 && weights.iter().sum::<f64>() <= 0.0;
                            if degenerate {
                                weights.iter_mut().for_each(|w| *w = 1.0);
                            }
                            Ok((self.split(total, &weights, seed, c)?, degenerate))
                        });
                        let flag = |kind: FlagKind| UnitFlag {
                            group: groups[c].to_string(),
                            key: key.to_string(),
                            kind,
                        };
                        match drawn {
                            Ok((counts, degenerate)) => {
                                if degenerate {
                                    out.flags.push(flag(FlagKind::DegenerateWeights));
                                }
                                out.columns.push(Some(counts));
                            }
                            Err(err) => {
                                out.flags.push(flag(FlagKind::InvalidInput { reason: err.to_string() }));
                                out.columns.push(None);
                            }
                        }
                    }
                    out
                })
                .collect()
        });

        let values = Array2::from_elem((population.n_rows(), columns.len()), f64::NAN);
        let mut table = GeoTable::new(
            population.key_column(),
            population.keys().to_vec(),
            columns,
            values,
        )?;
        let mut flags = Vec::new();
        for parent in draws {
            for (c, counts) in parent.columns.iter().enumerate() {
                let Some(counts) = counts else { continue };
                for (&row, &count) in parent.rows.iter().zip(counts) {
                    table.set(row, c, count as f64);
                }
            }
            flags.extend(parent.flags);
        }

        for schema in schemas {
            recompute_margins(&mut table, schema)?;
        }
        if let Some(total) = &self.total_group {
            sum_groups(&mut table, total, schemas)?;
            recompute_margins(&mut table, total)?;
        }

        for flag in &flags {
            warn!(self.logger, "parent flagged";
                "group" => &flag.group, "key" => &flag.key, "flag" => flag.kind.to_string());
        }
        info!(self.logger, "disaggregation finished"; "flags" => flags.len());
        Ok(DisaggregationOutcome { table, flags })
    }

    // ---- Helper methods ----

    /// Select one of `replicates` multinomial draws of `total` over `weights`.
    fn split(&self, total: i64, weights: &[f64], seed: u64, column: usize) -> ImputeResult<Vec<i64>> {
        let n = weights.len();
        if total == 0 {
            return Ok(vec![0; n]);
        }
        let mass: f64 = weights.iter().sum();
        let cdf: Vec<f64> = weights
            .iter()
            .scan(0.0, |acc, &w| {
                *acc += w / mass;
                Some(*acc)
            })
            .collect();

        let last = weights.iter().rposition(|&w| w > 0.0).unwrap_or(n - 1);

        let mut rng = replicate_rng(seed, column);
        let mut draws: Vec<Vec<i64>> = (0..self.options.replicates)
            .map(|_| {
                let mut counts = vec![0_i64; n];
                for _ in 0..total {
                    counts[draw_bin(&cdf, last, rng.r#gen::<f64>())] += 1;
                }
                counts
            })
            .collect();
        let best = select_representative(self.options.selection, &draws)
            .ok_or(ImputeError::InvalidReplicates { value: self.options.replicates })?;
        Ok(draws.swap_remove(best))
    }
}

/// First bin whose cumulative share exceeds `u`, clamped to `last`, the
/// last bin with positive weight.
fn draw_bin(cdf: &[f64], last: usize, u: f64) -> usize {
    cdf.partition_point(|&c| c <= u).min(last)
}
