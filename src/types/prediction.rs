//! Prediction results and the page banner derived from them

use crate::error::PredictError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Successful model output for one submission
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// Predicted removal efficiency in percent
    pub value: f64,
    /// Prediction timestamp
    pub timestamp: DateTime<Utc>,
}

impl Prediction {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }

    /// Display text shown in the success banner
    pub fn formatted(&self) -> String {
        format!("Predicted Removal Efficiency (%): {:.2}", self.value)
    }
}

/// Banner severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerKind {
    Success,
    Error,
}

/// Result/error banner rendered above the form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Banner {
    pub kind: BannerKind,
    pub message: String,
}

impl Banner {
    pub fn from_outcome(outcome: &Result<Prediction, PredictError>) -> Self {
        match outcome {
            Ok(prediction) => Banner {
                kind: BannerKind::Success,
                message: prediction.formatted(),
            },
            Err(PredictError::Validation { .. }) => Banner {
                kind: BannerKind::Error,
                message: "Inputs must be positive numbers.".to_string(),
            },
            Err(e) => Banner {
                kind: BannerKind::Error,
                message: format!("Invalid input! {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatted_has_two_decimals() {
        let prediction = Prediction::new(87.456);
        assert_eq!(
            prediction.formatted(),
            "Predicted Removal Efficiency (%): 87.46"
        );
        assert_eq!(
            Prediction::new(5.0).formatted(),
            "Predicted Removal Efficiency (%): 5.00"
        );
    }

    #[test]
    fn test_banner_messages() {
        let validation: Result<Prediction, PredictError> = Err(PredictError::Validation {
            feature: "pH".to_string(),
            value: -5.0,
        });
        let banner = Banner::from_outcome(&validation);
        assert_eq!(banner.kind, BannerKind::Error);
        assert_eq!(banner.message, "Inputs must be positive numbers.");

        let inference: Result<Prediction, PredictError> =
            Err(PredictError::Inference("tree 3 is malformed".to_string()));
        let banner = Banner::from_outcome(&inference);
        assert!(banner.message.starts_with("Invalid input! "));
        assert!(banner.message.contains("tree 3 is malformed"));
    }
}
