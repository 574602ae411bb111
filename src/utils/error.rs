use std::fmt;

/// Custom error type for detection operations
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Argument outside the domain of an operation (e.g., `c(0)`, zero trees)
    InvalidArgument(String),
    /// Feature count of a record disagrees with the trained feature count
    ShapeMismatch { expected: usize, found: usize },
    /// Upstream data is missing required keys or columns
    MalformedInput(String),
    /// Arrow-related errors (parsing, schema mismatch)
    ArrowError(String),
    /// Model serialization errors
    ModelError(String),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::InvalidArgument(msg) => write!(f, "InvalidArgument: {}", msg),
            AnalysisError::ShapeMismatch { expected, found } => write!(
                f,
                "ShapeMismatch: expected {} features, got {}",
                expected, found
            ),
            AnalysisError::MalformedInput(msg) => write!(f, "MalformedInput: {}", msg),
            AnalysisError::ArrowError(msg) => write!(f, "ArrowError: {}", msg),
            AnalysisError::ModelError(msg) => write!(f, "ModelError: {}", msg),
        }
    }
}

impl std::error::Error for AnalysisError {}
