use ndarray::{Array2, ArrayView2};

use crate::utils::AnalysisError;

/// Validate a training matrix before trees are grown on it
///
/// # Arguments
/// * `features` - Feature matrix to validate
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(AnalysisError::InvalidArgument)` if empty or containing NaN/Inf values
pub fn validate_features(features: &ArrayView2<f64>) -> Result<(), AnalysisError> {
    if features.nrows() == 0 {
        return Err(AnalysisError::InvalidArgument(
            "feature matrix cannot be empty".to_string(),
        ));
    }

    if features.ncols() == 0 {
        return Err(AnalysisError::InvalidArgument(
            "feature matrix must have at least one column".to_string(),
        ));
    }

    // Check for NaN or Inf values
    for value in features.iter() {
        if value.is_nan() || value.is_infinite() {
            return Err(AnalysisError::InvalidArgument(
                "feature matrix contains NaN or Inf values".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate a matrix about to be scored against a forest trained on `expected` columns
///
/// Extreme values (including infinities) are allowed; NaN is not, since it
/// cannot be routed through a split.
pub fn validate_prediction_input(
    features: &ArrayView2<f64>,
    expected: usize,
) -> Result<(), AnalysisError> {
    if features.ncols() != expected {
        return Err(AnalysisError::ShapeMismatch {
            expected,
            found: features.ncols(),
        });
    }

    if features.iter().any(|value| value.is_nan()) {
        return Err(AnalysisError::InvalidArgument(
            "prediction input contains NaN values".to_string(),
        ));
    }

    Ok(())
}

/// Per-column (min, max) over the given rows of `features`
pub(crate) fn column_ranges(features: &ArrayView2<f64>, rows: &[usize]) -> Vec<(f64, f64)> {
    (0..features.ncols())
        .map(|col| {
            rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &row| {
                let value = features[[row, col]];
                (lo.min(value), hi.max(value))
            })
        })
        .collect()
}

/// Stack rows into a matrix; used by tests and callers holding row vectors
pub fn rows_to_matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>, AnalysisError> {
    let num_cols = rows.first().map(|row| row.len()).unwrap_or(0);
    if let Some(bad) = rows.iter().find(|row| row.len() != num_cols) {
        return Err(AnalysisError::ShapeMismatch {
            expected: num_cols,
            found: bad.len(),
        });
    }

    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), num_cols), flat)
        .map_err(|e| AnalysisError::InvalidArgument(format!("failed to create Array2: {}", e)))
}
