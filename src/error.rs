//! Error types for the compositional-tensor library.

use thiserror::Error;

/// Coarse classification of every failure the library can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed numeric input (negative, NaN, infinite, degenerate sums).
    Domain,
    /// Wrong dimensionality or mismatched lengths.
    Shape,
    /// Invalid caller parameters.
    Config,
    /// Ambiguous duplicate samples under a strict policy.
    Replicate,
}

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum TensorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing column '{0}' in metadata")]
    MissingColumn(String),

    #[error("Sample ID mismatch: {0}")]
    SampleMismatch(String),

    #[error(
        "Detected replicate samples for individual ({state_column}) {subject} at state(s) {}. \
         Remove replicate values or choose another replicate handling policy.",
        .states.join(", ")
    )]
    Replicate {
        subject: String,
        state_column: String,
        states: Vec<String>,
    },

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Pipeline step {step} failed: {source}")]
    Pipeline {
        step: String,
        #[source]
        source: Box<TensorError>,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TensorError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TensorError::Domain(_) | TensorError::EmptyData(_) => ErrorKind::Domain,
            TensorError::Shape(_) | TensorError::DimensionMismatch { .. } => ErrorKind::Shape,
            TensorError::Replicate { .. } => ErrorKind::Replicate,
            TensorError::Pipeline { source, .. } => source.kind(),
            TensorError::Io(_)
            | TensorError::Config(_)
            | TensorError::MissingColumn(_)
            | TensorError::SampleMismatch(_)
            | TensorError::Taxonomy(_)
            | TensorError::Yaml(_)
            | TensorError::Json(_) => ErrorKind::Config,
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, TensorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(TensorError::Domain("x".into()).kind(), ErrorKind::Domain);
        assert_eq!(
            TensorError::DimensionMismatch { expected: 2, actual: 3 }.kind(),
            ErrorKind::Shape
        );
        assert_eq!(TensorError::MissingColumn("age".into()).kind(), ErrorKind::Config);
    }

    #[test]
    fn test_pipeline_kind_delegates() {
        let err = TensorError::Pipeline {
            step: "1 (BuildSparse)".into(),
            source: Box::new(TensorError::Replicate {
                subject: "A".into(),
                state_column: "time".into(),
                states: vec!["1".into()],
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Replicate);
        assert!(err.to_string().contains("BuildSparse"));
    }
}
