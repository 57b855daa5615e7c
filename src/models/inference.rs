//! Single-row inference over a loaded regression model

use crate::error::{ModelError, PredictError};
use crate::metrics::ServiceMetrics;
use crate::schema::FeatureEncoder;
use crate::types::FeatureRecord;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// A pre-fit regression model.
///
/// Implementations are read-only after load and shared across requests.
pub trait Regressor: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &str;

    /// Feature names in input order, when the artifact records them
    fn feature_names(&self) -> Option<&[String]>;

    /// Category lists recorded at fit time, one per categorical column
    fn categories(&self) -> Option<&[Vec<String>]> {
        None
    }

    /// Predict the target for one encoded row
    fn predict(&self, row: &[f64]) -> Result<f64, ModelError>;
}

/// Encodes records and runs the model on them
pub struct InferenceEngine {
    model: Arc<dyn Regressor>,
    encoder: FeatureEncoder,
    metrics: Arc<ServiceMetrics>,
}

impl InferenceEngine {
    pub fn new(
        model: Arc<dyn Regressor>,
        encoder: FeatureEncoder,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            model,
            encoder,
            metrics,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }

    /// Encode `record` and invoke the model exactly once
    pub fn predict(&self, record: &FeatureRecord) -> Result<f64, PredictError> {
        let row = self.encoder.encode(record)?;

        let start = Instant::now();
        self.metrics.record_inference_call();
        let value = self.model.predict(&row).map_err(|e| {
            error!(model = %self.model.name(), error = %e, "Model inference failed");
            PredictError::from(e)
        })?;
        let elapsed = start.elapsed();
        self.metrics.record_inference_time(elapsed);

        if !value.is_finite() {
            return Err(PredictError::Inference(format!(
                "model returned a non-finite value ({})",
                value
            )));
        }

        debug!(
            model = %self.model.name(),
            prediction = value,
            inference_us = elapsed.as_micros() as u64,
            "Inference complete"
        );
        Ok(value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::schema::FeatureSchema;
    use crate::types::FeatureValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Regressor that counts calls and returns the sum of its inputs
    pub(crate) struct CountingModel {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl CountingModel {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Regressor for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn feature_names(&self) -> Option<&[String]> {
            None
        }

        fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ModelError::Runtime("backend exploded".to_string()));
            }
            Ok(row.iter().filter(|v| v.is_finite()).sum::<f64>() + 0.123)
        }
    }

    fn engine(model: Arc<CountingModel>) -> (InferenceEngine, Arc<ServiceMetrics>) {
        let dataset = sample_dataset();
        let schema = FeatureSchema::from_dataset(&dataset).unwrap();
        let encoder = FeatureEncoder::new(&schema, dataset.category_universe(), None).unwrap();
        let metrics = Arc::new(ServiceMetrics::new());
        (
            InferenceEngine::new(model, encoder, metrics.clone()),
            metrics,
        )
    }

    #[test]
    fn test_predict_invokes_model_once() {
        let model = Arc::new(CountingModel::new());
        let (engine, metrics) = engine(model.clone());
        let dataset = sample_dataset();
        let schema = FeatureSchema::from_dataset(&dataset).unwrap();
        let record = schema.record_from_row(&dataset.rows()[0]);

        let value = engine.predict(&record).unwrap();
        assert_eq!(model.calls(), 1);
        assert_eq!(metrics.snapshot().inference_calls, 1);
        assert!(value > 0.0);
    }

    #[test]
    fn test_model_failure_is_inference_error() {
        let model = Arc::new(CountingModel::failing());
        let (engine, _) = engine(model.clone());
        let dataset = sample_dataset();
        let schema = FeatureSchema::from_dataset(&dataset).unwrap();
        let record = schema.record_from_row(&dataset.rows()[1]);

        let err = engine.predict(&record).unwrap_err();
        assert_eq!(err.kind(), "inference");
        assert!(err.to_string().contains("backend exploded"));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_encoding_failure_skips_model() {
        let model = Arc::new(CountingModel::new());
        let (engine, _) = engine(model.clone());
        let mut record = FeatureRecord::new();
        record.insert("Anode", FeatureValue::Numeric(3.0));

        let err = engine.predict(&record).unwrap_err();
        assert_eq!(err.kind(), "encoding");
        assert_eq!(model.calls(), 0);
    }
}
