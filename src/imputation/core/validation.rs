//! imputation::core::validation — input guards for counts, weights and options.
//!
//! Purpose
//! -------
//! Centralize the checks applied when numeric table values are turned into
//! engine inputs, so every entry point reports malformed data the same way.
//!
//! Key behaviors
//! -------------
//! - Counts must be finite, non-negative and integral (within
//!   [`INTEGER_TOL`]); they are returned as `i64`.
//! - Population weights and incidence rates must be finite and non-negative.
//! - Option values that act as sizes must be strictly positive.
//!
//! Conventions
//! -----------
//! - Missing values (`NaN`) are handled by callers *before* these guards run;
//!   a `NaN` reaching a guard is reported as invalid.
//! - All failures are [`ImputeError`] values; nothing here panics.
use crate::imputation::errors::{ImputeError, ImputeResult};

/// Tolerance for accepting a float as an integral count.
pub const INTEGER_TOL: f64 = 1e-9;

/// Convert a table value into a non-negative integer count.
///
/// # Errors
/// [`ImputeError::NonIntegerCount`] if `value` is non-finite, negative, or
/// further than [`INTEGER_TOL`] from an integer.
pub fn validate_count(value: f64, key: &str, column: &str) -> ImputeResult<i64> {
    let rounded = value.round();
    if !value.is_finite() || rounded < 0.0 || (value - rounded).abs() > INTEGER_TOL {
        return Err(ImputeError::NonIntegerCount {
            key: key.to_string(),
            column: column.to_string(),
            value,
        });
    }
    Ok(rounded as i64)
}

/// Validate a population weight.
///
/// # Errors
/// [`ImputeError::InvalidWeight`] if `value` is non-finite or negative.
pub fn validate_weight(value: f64, key: &str, column: &str) -> ImputeResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(ImputeError::InvalidWeight {
            key: key.to_string(),
            column: column.to_string(),
            value,
        });
    }
    Ok(value)
}

/// Validate an incidence rate.
///
/// # Errors
/// [`ImputeError::InvalidIncidence`] if `value` is non-finite or negative.
pub fn validate_incidence(value: f64, column: &str) -> ImputeResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(ImputeError::InvalidIncidence { column: column.to_string(), value });
    }
    Ok(value)
}

/// Validate the replicate count (must be ≥ 1).
pub fn validate_replicates(value: usize) -> ImputeResult<usize> {
    if value == 0 {
        return Err(ImputeError::InvalidReplicates { value });
    }
    Ok(value)
}

/// Validate an explicit worker count (must be ≥ 1 when given).
pub fn validate_workers(value: Option<usize>) -> ImputeResult<Option<usize>> {
    match value {
        Some(0) => Err(ImputeError::InvalidWorkers { value: 0 }),
        other => Ok(other),
    }
}

/// Validate an explicit allocator step cap (must be ≥ 1 when given).
pub fn validate_step_cap(value: Option<usize>) -> ImputeResult<Option<usize>> {
    match value {
        Some(0) => Err(ImputeError::InvalidStepCap { value: 0 }),
        other => Ok(other),
    }
}
