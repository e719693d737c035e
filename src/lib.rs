//! geo_imputation — multi-constraint Monte Carlo imputation of suppressed
//! small-area counts, with Python bindings.
//!
//! Purpose
//! -------
//! Serve as the crate root for Rust callers and as the PyO3 bridge that
//! exposes the imputation engine to Python via the `_geo_imputation`
//! extension module when the `python-bindings` feature is enabled.
//!
//! Key behaviors
//! -------------
//! - Re-export the core Rust modules: [`imputation`] (engine), [`table`]
//!   (keyed tables, CSV I/O, margin maintenance) and [`logging`].
//! - Define the `#[pymodule]` initializer with `impute` and `disaggregate`
//!   functions operating on 2-D float arrays.
//!
//! Invariants & assumptions
//! ------------------------
//! - All numerical work lives in the inner modules; this file performs only
//!   FFI glue and error mapping.
//! - Missing values cross the Python boundary as `NaN`.
//!
//! Conventions
//! -----------
//! - Errors from Rust code are converted to `PyErr` at the boundary
//!   (`ValueError` for data and option errors, `OSError` for I/O).
//!
//! Downstream usage
//! ----------------
//! - Native Rust code should depend on [`imputation`] and [`table`] directly
//!   (or `imputation::prelude`) and ignore the PyO3 items.
//! - The Python packaging layer imports `_geo_imputation` and wraps its
//!   functions in a pandas-friendly facade.
//!
//! Testing notes
//! -------------
//! - Engine behavior is covered by unit tests in the inner modules and by
//!   `tests/integration_imputation_pipeline.rs`.

pub mod imputation;
pub mod logging;
pub mod table;
pub mod utils;

#[cfg(feature = "python-bindings")]
use numpy::{IntoPyArray, PyArray2};

#[cfg(feature = "python-bindings")]
use pyo3::{prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use crate::{
    imputation::{
        core::{ensemble::SelectionRule, options::DisaggregateOptions},
        models::{Disaggregator, Imputer},
    },
    table::GeoTable,
    utils::{build_table, extract_impute_options, extract_schemas, report_to_tuples},
};

/// impute — fill missing cells of `target` for the requested groups.
///
/// Parameters
/// ----------
/// - `keys`: geographic identifiers, one per row of `target` / `population`.
/// - `columns`: column names of `target` (cells and margins).
/// - `target`: 2-D float array with `NaN` for suppressed values.
/// - `population`: 2-D float array with the same rows and columns.
/// - `incidence`: optional 1-row array of rates over `columns`.
/// - `groups`: group names (default: every default group).
///
/// Returns
/// -------
/// `(values, flags)`: the imputed array over the output columns (inputs plus
/// any appended margins) and a list of `(key, group, message)` tuples.
#[cfg(feature = "python-bindings")]
#[pyfunction]
#[pyo3(
    signature = (
        keys,
        columns,
        target,
        population,
        incidence = None,
        groups = None,
        replicates = 100,
        prefill_budget = 20000,
        workers = None,
        seed = None,
        selection = "min_squared_deviation",
    ),
    text_signature = "(keys, columns, target, population, /, incidence=None, groups=None, \
                      replicates=100, prefill_budget=20000, workers=None, seed=None, \
                      selection='min_squared_deviation')"
)]
#[allow(clippy::too_many_arguments)]
fn impute<'py>(
    py: Python<'py>, keys: Vec<String>, columns: Vec<String>, target: &Bound<'py, PyAny>,
    population: &Bound<'py, PyAny>, incidence: Option<&Bound<'py, PyAny>>,
    groups: Option<Vec<String>>, replicates: usize, prefill_budget: i64, workers: Option<usize>,
    seed: Option<u64>, selection: &str,
) -> PyResult<(Bound<'py, PyArray2<f64>>, Vec<(String, String, String)>)> {
    let target = build_table(keys.clone(), columns.clone(), target)?;
    let population = build_table(keys, columns.clone(), population)?;
    let incidence: Option<GeoTable> = incidence
        .map(|raw| build_table(vec!["rate".to_string()], columns, raw))
        .transpose()?;
    let schemas = extract_schemas(groups)?;
    let options = extract_impute_options(replicates, prefill_budget, workers, seed, selection)?;

    let imputer = Imputer::new(options)?;
    let outcome =
        py.allow_threads(|| imputer.impute(&target, &population, incidence.as_ref(), &schemas))?;
    let flags = report_to_tuples(&outcome.report);
    Ok((outcome.table.values().to_owned().into_pyarray(py), flags))
}

/// disaggregate — split parent totals across sub-unit rows by population.
///
/// Returns the sub-unit array over the cell and margin columns of `groups`
/// (plus `AllRace` when `total_group` is true) and a list of
/// `(parent, group, message)` tuples.
#[cfg(feature = "python-bindings")]
#[pyfunction]
#[pyo3(
    signature = (
        parent_keys,
        parents,
        sub_keys,
        parent_of,
        population,
        columns,
        groups = None,
        total_group = true,
        replicates = 1000,
        workers = None,
        seed = None,
        selection = "min_squared_deviation",
    )
)]
#[allow(clippy::too_many_arguments)]
fn disaggregate<'py>(
    py: Python<'py>, parent_keys: Vec<String>, parents: &Bound<'py, PyAny>,
    sub_keys: Vec<String>, parent_of: Vec<String>, population: &Bound<'py, PyAny>,
    columns: Vec<String>, groups: Option<Vec<String>>, total_group: bool, replicates: usize,
    workers: Option<usize>, seed: Option<u64>, selection: &str,
) -> PyResult<(Bound<'py, PyArray2<f64>>, Vec<(String, String, String)>)> {
    let parents = build_table(parent_keys, columns.clone(), parents)?;
    let population = build_table(sub_keys, columns, population)?;
    let groups = groups.unwrap_or_else(|| {
        ["W", "B", "I", "H", "A", "O"].iter().map(|g| g.to_string()).collect()
    });
    let schemas = extract_schemas(Some(groups))?;
    let selection: SelectionRule = selection.parse()?;
    let options = DisaggregateOptions::new(replicates, seed, selection, workers)?;

    let mut disaggregator = Disaggregator::new(options)?;
    if total_group {
        let all = extract_schemas(Some(vec!["AllRace".to_string()]))?;
        if let Some(all) = all.into_iter().next() {
            disaggregator = disaggregator.with_total_group(all);
        }
    }
    let outcome =
        py.allow_threads(|| disaggregator.disaggregate(&parents, &population, &parent_of, &schemas))?;
    let flags = outcome
        .flags
        .iter()
        .map(|f| (f.key.clone(), f.group.clone(), f.kind.to_string()))
        .collect();
    Ok((outcome.table.values().to_owned().into_pyarray(py), flags))
}

/// _geo_imputation — PyO3 module initializer for the Python extension.
///
/// Registers `impute` and `disaggregate`. Invoked by Python on import.
#[cfg(feature = "python-bindings")]
#[pymodule]
fn _geo_imputation<'py>(_py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(impute, m)?)?;
    m.add_function(wrap_pyfunction!(disaggregate, m)?)?;
    Ok(())
}
