//! Path-length normalization and the anomaly score derived from it.

use crate::utils::AnalysisError;

/// Euler–Mascheroni constant, used in the harmonic-number approximation
pub const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Expected path length of an unsuccessful search in a binary search tree of `n` nodes
///
/// This is the `c(n)` term of Liu et al.: `2 * H(n - 1) - 2 * (n - 1) / n` with
/// `H(m) ≈ ln(m) + γ`. A single record is isolated immediately, so `c(1) = 0`.
///
/// # Returns
/// * `Ok(c)` for `n >= 1`
/// * `Err(AnalysisError::InvalidArgument)` for `n <= 0`
pub fn expected_path_length(n: i64) -> Result<f64, AnalysisError> {
    match n {
        n if n <= 0 => Err(AnalysisError::InvalidArgument(format!(
            "path length normalizer is undefined for n = {}",
            n
        ))),
        1 => Ok(0.0),
        n => {
            let n = n as f64;
            Ok(2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n)
        }
    }
}

/// Tail correction for a leaf holding `size` training records
///
/// Empty leaves can appear when a split lands exactly on the subset minimum;
/// like singleton leaves they contribute nothing.
pub(crate) fn tail_correction(size: usize) -> f64 {
    if size <= 1 {
        0.0
    } else {
        expected_path_length(size as i64).unwrap_or(0.0)
    }
}

/// Anomaly score `s(x, n) = 2^(-x / c(n))`
///
/// Scores near 1 mark records isolated almost immediately, scores near 0.5 are
/// nominal and scores towards 0 are deeply nested (normal).
///
/// # Arguments
/// * `x` - Average observed path length (finite, non-negative)
/// * `n` - Reference sample size; must be at least 2 so that `c(n) > 0`
pub fn anomaly_score(x: f64, n: i64) -> Result<f64, AnalysisError> {
    if !x.is_finite() || x < 0.0 {
        return Err(AnalysisError::InvalidArgument(format!(
            "path length must be finite and non-negative, got {}",
            x
        )));
    }

    let c = expected_path_length(n)?;
    if c <= 0.0 {
        return Err(AnalysisError::InvalidArgument(format!(
            "anomaly score needs a reference sample size of at least 2, got {}",
            n
        )));
    }

    Ok(2.0_f64.powf(-x / c))
}
