//! Error types for prediction requests and model evaluation

use thiserror::Error;

/// Why a submission did not produce a prediction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    /// A numeric input was zero or negative; inference was not attempted
    #[error("{feature} must be positive (got {value})")]
    Validation { feature: String, value: f64 },

    /// The submission could not be assembled or encoded for the model
    #[error("{0}")]
    Encoding(String),

    /// The model failed to evaluate the encoded row
    #[error("{0}")]
    Inference(String),
}

impl PredictError {
    /// Stable machine-readable kind, used by the JSON API
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::Validation { .. } => "validation",
            PredictError::Encoding(_) => "encoding",
            PredictError::Inference(_) => "inference",
        }
    }
}

impl From<ModelError> for PredictError {
    fn from(e: ModelError) -> Self {
        PredictError::Inference(e.to_string())
    }
}

/// Model parsing and evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("malformed model: {0}")]
    Malformed(String),

    #[error("unsupported model: {0}")]
    Unsupported(String),

    #[error("expected {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },

    #[error("runtime error: {0}")]
    Runtime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_becomes_inference_error() {
        let err: PredictError = ModelError::FeatureCount {
            expected: 12,
            actual: 11,
        }
        .into();
        assert_eq!(err.kind(), "inference");
        assert_eq!(err.to_string(), "expected 12 features, got 11");
    }
}
