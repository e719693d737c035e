//! utils — PyO3 conversion helpers for the `_geo_imputation` extension.
//!
//! Everything here is compiled only with the `python-bindings` feature and
//! turns Python-side arguments (array-likes, key lists, option keywords) into
//! the crate's Rust types, mapping failures to `ValueError` / `TypeError`.
#[cfg(feature = "python-bindings")]
use ndarray::Array2;

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use numpy::PyReadonlyArray2;

#[cfg(feature = "python-bindings")]
use crate::{
    imputation::{
        core::{
            ensemble::SelectionRule,
            options::ImputeOptions,
            report::ImputationReport,
            schema::{DEFAULT_GROUPS, GroupSchema},
        },
        errors::ImputeResult,
    },
    table::GeoTable,
};

/// Accept a 2-D `numpy.ndarray`, a `pandas.DataFrame` or a nested sequence of
/// floats and return an owned `f64` matrix.
#[cfg(feature = "python-bindings")]
pub fn extract_f64_matrix<'py>(raw: &Bound<'py, PyAny>) -> PyResult<Array2<f64>> {
    if let Ok(arr) = raw.extract::<PyReadonlyArray2<f64>>() {
        return Ok(arr.as_array().to_owned());
    }

    if let Ok(obj) = raw.call_method("to_numpy", (), None) {
        if let Ok(arr) = obj.extract::<PyReadonlyArray2<f64>>() {
            return Ok(arr.as_array().to_owned());
        }
    }

    let rows: Vec<Vec<f64>> = raw.extract().map_err(|_| {
        pyo3::exceptions::PyTypeError::new_err(
            "expected a 2-D numpy.ndarray, pandas.DataFrame, or nested sequence of float64",
        )
    })?;
    let width = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != width) {
        return Err(PyValueError::new_err("rows must all have the same length"));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let n = if width == 0 { 0 } else { flat.len() / width };
    Array2::from_shape_vec((n, width), flat).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Build a [`GeoTable`] from Python-side keys, column names and values.
#[cfg(feature = "python-bindings")]
pub fn build_table<'py>(
    keys: Vec<String>, columns: Vec<String>, values: &Bound<'py, PyAny>,
) -> PyResult<GeoTable> {
    let values = extract_f64_matrix(values)?;
    Ok(GeoTable::new("key", keys, columns, values)?)
}

/// Resolve group names to sex-by-age schemas (all default groups when `None`).
#[cfg(feature = "python-bindings")]
pub fn extract_schemas(groups: Option<Vec<String>>) -> PyResult<Vec<GroupSchema>> {
    let names: Vec<String> =
        groups.unwrap_or_else(|| DEFAULT_GROUPS.iter().map(|g| g.to_string()).collect());
    let schemas: ImputeResult<Vec<GroupSchema>> =
        names.iter().map(|g| GroupSchema::default_sex_by_age(g)).collect();
    Ok(schemas?)
}

/// Validated [`ImputeOptions`] from keyword arguments.
#[cfg(feature = "python-bindings")]
pub fn extract_impute_options(
    replicates: usize, prefill_budget: i64, workers: Option<usize>, seed: Option<u64>,
    selection: &str,
) -> PyResult<ImputeOptions> {
    let selection: SelectionRule = selection.parse()?;
    let options = ImputeOptions {
        replicates,
        prefill_budget: prefill_budget.max(0),
        workers,
        seed,
        selection,
        ..ImputeOptions::default()
    };
    options.validate()?;
    Ok(options)
}

/// Flatten a report into `(key, group, message)` tuples; group failures use
/// an empty key.
#[cfg(feature = "python-bindings")]
pub fn report_to_tuples(report: &ImputationReport) -> Vec<(String, String, String)> {
    let flags = report.flags().map(|f| (f.key.clone(), f.group.clone(), f.kind.to_string()));
    let failures =
        report.failures().map(|(group, err)| (String::new(), group.to_string(), err.to_string()));
    flags.chain(failures).collect()
}
