//! Submission handling: collect, validate, encode, infer.

use crate::error::PredictError;
use crate::metrics::ServiceMetrics;
use crate::models::inference::InferenceEngine;
use crate::schema::{FeatureKind, FeatureSchema};
use crate::types::{FeatureRecord, FeatureValue, Prediction};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns form or JSON submissions into predictions
pub struct Predictor {
    schema: Arc<FeatureSchema>,
    engine: InferenceEngine,
    metrics: Arc<ServiceMetrics>,
}

impl Predictor {
    pub fn new(
        schema: Arc<FeatureSchema>,
        engine: InferenceEngine,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            schema,
            engine,
            metrics,
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Build a record from url-encoded form fields
    pub fn collect_form(&self, form: &HashMap<String, String>) -> Result<FeatureRecord, PredictError> {
        let mut record = FeatureRecord::new();
        for spec in self.schema.features() {
            let raw = form
                .get(&spec.name)
                .ok_or_else(|| PredictError::Encoding(format!("missing field {:?}", spec.name)))?
                .trim();

            let value = match spec.kind {
                FeatureKind::Categorical(choices) => {
                    if !choices.contains(&raw) {
                        return Err(PredictError::Encoding(format!(
                            "{:?} is not a valid {}",
                            raw, spec.name
                        )));
                    }
                    FeatureValue::Categorical(raw.to_string())
                }
                FeatureKind::Numeric => FeatureValue::Numeric(parse_numeric(&spec.name, raw)?),
            };
            record.insert(spec.name.clone(), value);
        }
        Ok(record)
    }

    /// Build a record from JSON values
    pub fn collect_values(
        &self,
        values: &HashMap<String, FeatureValue>,
    ) -> Result<FeatureRecord, PredictError> {
        let mut record = FeatureRecord::new();
        for spec in self.schema.features() {
            let value = values
                .get(&spec.name)
                .ok_or_else(|| PredictError::Encoding(format!("missing field {:?}", spec.name)))?;

            let value = match (spec.kind, value) {
                (FeatureKind::Categorical(choices), FeatureValue::Categorical(v)) => {
                    if !choices.contains(&v.as_str()) {
                        return Err(PredictError::Encoding(format!(
                            "{:?} is not a valid {}",
                            v, spec.name
                        )));
                    }
                    value.clone()
                }
                (FeatureKind::Categorical(_), FeatureValue::Numeric(v)) => {
                    return Err(PredictError::Encoding(format!(
                        "{} expects a category, got {}",
                        spec.name, v
                    )));
                }
                (FeatureKind::Numeric, FeatureValue::Numeric(v)) => {
                    if !v.is_finite() {
                        return Err(PredictError::Encoding(format!(
                            "{} must be a finite number",
                            spec.name
                        )));
                    }
                    FeatureValue::Numeric(*v)
                }
                (FeatureKind::Numeric, FeatureValue::Categorical(v)) => {
                    FeatureValue::Numeric(parse_numeric(&spec.name, v)?)
                }
            };
            record.insert(spec.name.clone(), value);
        }
        Ok(record)
    }

    /// Reject records with any numeric value `<= 0`.
    ///
    /// Categorical fields are exempt. The first offending feature is reported.
    pub fn validate(record: &FeatureRecord) -> Result<(), PredictError> {
        for (name, value) in record.iter() {
            if let FeatureValue::Numeric(v) = value {
                if *v <= 0.0 {
                    return Err(PredictError::Validation {
                        feature: name.to_string(),
                        value: *v,
                    });
                }
            }
        }
        Ok(())
    }

    /// Validate, encode and run the model on one record
    pub fn predict(&self, record: &FeatureRecord) -> Result<Prediction, PredictError> {
        self.metrics.record_submission();

        let outcome = Self::validate(record)
            .and_then(|()| self.engine.predict(record))
            .map(Prediction::new);

        match &outcome {
            Ok(prediction) => {
                self.metrics.record_prediction(prediction.value);
                debug!(prediction = prediction.value, "Prediction served");
            }
            Err(PredictError::Validation { feature, value }) => {
                self.metrics.record_validation_rejection();
                info!(feature = %feature, value = *value, "Submission rejected: non-positive input");
            }
            Err(e @ PredictError::Encoding(_)) => {
                self.metrics.record_encoding_error();
                warn!(error = %e, "Submission could not be encoded");
            }
            Err(PredictError::Inference(_)) => {
                self.metrics.record_inference_error();
            }
        }
        outcome
    }

    /// Collect form fields and predict
    pub fn predict_form(
        &self,
        form: &HashMap<String, String>,
    ) -> (Option<FeatureRecord>, Result<Prediction, PredictError>) {
        match self.collect_form(form) {
            Ok(record) => {
                let outcome = self.predict(&record);
                (Some(record), outcome)
            }
            Err(e) => {
                self.metrics.record_submission();
                self.metrics.record_encoding_error();
                warn!(error = %e, "Form submission could not be collected");
                (None, Err(e))
            }
        }
    }
}

fn parse_numeric(name: &str, raw: &str) -> Result<f64, PredictError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| PredictError::Encoding(format!("{} must be a number, got {:?}", name, raw)))?;
    if !value.is_finite() {
        return Err(PredictError::Encoding(format!(
            "{} must be a finite number",
            name
        )));
    }
    Ok(value)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::tests::sample_dataset;
    use crate::models::inference::tests::CountingModel;
    use crate::schema::FeatureEncoder;

    pub(crate) fn predictor(model: Arc<CountingModel>) -> (Predictor, Arc<ServiceMetrics>) {
        let dataset = sample_dataset();
        let schema = Arc::new(FeatureSchema::from_dataset(&dataset).unwrap());
        let encoder = FeatureEncoder::new(&schema, dataset.category_universe(), None).unwrap();
        let metrics = Arc::new(ServiceMetrics::new());
        let engine = InferenceEngine::new(model, encoder, metrics.clone());
        (Predictor::new(schema, engine, metrics.clone()), metrics)
    }

    pub(crate) fn example_form(numeric: &str) -> HashMap<String, String> {
        [
            ("Anode", "Graphite"),
            ("Cathode", "Graphite"),
            ("Electrolyte", "NaCl"),
            ("Pollutant", "Phenol"),
            ("Reactor type", "Undivided reactor"),
            ("Current density (mA/cm2)", numeric),
            ("pH", numeric),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_positive_submission_predicts_once() {
        let model = Arc::new(CountingModel::new());
        let (predictor, metrics) = predictor(model.clone());

        let (record, outcome) = predictor.predict_form(&example_form("1.0"));
        let prediction = outcome.unwrap();

        assert!(record.is_some());
        assert_eq!(model.calls(), 1);
        let text = prediction.formatted();
        let digits = text.rsplit('.').next().unwrap();
        assert!(text.starts_with("Predicted Removal Efficiency (%): "));
        assert_eq!(digits.len(), 2);
        assert_eq!(metrics.snapshot().predictions, 1);
    }

    #[test]
    fn test_negative_value_never_reaches_model() {
        let model = Arc::new(CountingModel::new());
        let (predictor, metrics) = predictor(model.clone());

        let mut form = example_form("1.0");
        form.insert("pH".to_string(), "-5".to_string());
        let (_, outcome) = predictor.predict_form(&form);

        assert_eq!(
            outcome.unwrap_err(),
            PredictError::Validation {
                feature: "pH".to_string(),
                value: -5.0
            }
        );
        assert_eq!(model.calls(), 0);
        assert_eq!(metrics.snapshot().inference_calls, 0);
        assert_eq!(metrics.snapshot().validation_rejections, 1);
    }

    #[test]
    fn test_zero_is_rejected() {
        let model = Arc::new(CountingModel::new());
        let (predictor, _) = predictor(model.clone());

        let (_, outcome) = predictor.predict_form(&example_form("0"));
        assert_eq!(outcome.unwrap_err().kind(), "validation");
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_unknown_choice_is_encoding_error() {
        let model = Arc::new(CountingModel::new());
        let (predictor, _) = predictor(model.clone());

        let mut form = example_form("2");
        form.insert("Anode".to_string(), "Copper".to_string());
        let (record, outcome) = predictor.predict_form(&form);

        assert!(record.is_none());
        assert_eq!(outcome.unwrap_err().kind(), "encoding");
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_unparsable_number_is_encoding_error() {
        let model = Arc::new(CountingModel::new());
        let (predictor, _) = predictor(model.clone());

        for bad in ["abc", "NaN", "inf", ""] {
            let mut form = example_form("2");
            form.insert("pH".to_string(), bad.to_string());
            let (_, outcome) = predictor.predict_form(&form);
            assert_eq!(outcome.unwrap_err().kind(), "encoding", "input {:?}", bad);
        }
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_inference_failure_is_reported() {
        let model = Arc::new(CountingModel::failing());
        let (predictor, metrics) = predictor(model.clone());

        let (_, outcome) = predictor.predict_form(&example_form("3"));
        assert_eq!(outcome.unwrap_err().kind(), "inference");
        assert_eq!(model.calls(), 1);
        assert_eq!(metrics.snapshot().inference_errors, 1);
    }

    #[test]
    fn test_collect_values_accepts_numeric_strings() {
        let model = Arc::new(CountingModel::new());
        let (predictor, _) = predictor(model);

        let mut values: HashMap<String, FeatureValue> = example_form("4")
            .into_iter()
            .map(|(k, v)| (k, FeatureValue::Categorical(v)))
            .collect();
        values.insert("pH".to_string(), FeatureValue::Numeric(6.5));

        let record = predictor.collect_values(&values).unwrap();
        assert_eq!(record.get("pH"), Some(&FeatureValue::Numeric(6.5)));
        assert_eq!(
            record.get("Current density (mA/cm2)"),
            Some(&FeatureValue::Numeric(4.0))
        );

        values.insert("Anode".to_string(), FeatureValue::Numeric(1.0));
        assert_eq!(
            predictor.collect_values(&values).unwrap_err().kind(),
            "encoding"
        );
    }
}
