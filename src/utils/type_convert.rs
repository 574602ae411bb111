use super::error::AnalysisError;

/// Validate threshold is within valid range [0, 1]
///
/// # Arguments
/// * `threshold` - The anomaly score cutoff to validate
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(AnalysisError::InvalidArgument)` if out of range
pub fn validate_threshold(threshold: f64) -> Result<(), AnalysisError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(AnalysisError::InvalidArgument(format!(
            "threshold must be 0-1, got {}",
            threshold
        )));
    }
    Ok(())
}

/// Parse a raw cell into a float, accepting surrounding whitespace
///
/// Empty cells are not numbers; callers treat them as missing.
pub fn parse_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

/// Render a float the way a pivoted frame would print it (`1` → `1.0`)
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}
