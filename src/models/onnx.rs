//! ONNX model backend.
//!
//! The default backend: the booster is exported to ONNX (e.g. with
//! onnxmltools) and evaluated with ONNX Runtime.

use crate::error::ModelError;
use crate::models::inference::Regressor;
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Regression model exported to ONNX, run with ONNX Runtime
pub struct OnnxRegressor {
    /// ONNX Runtime session (run needs exclusive access)
    session: Mutex<Session>,
    /// Input name for the model
    input_name: String,
    /// Output name for the predicted value
    output_name: String,
}

impl OnnxRegressor {
    /// Load an ONNX model from file
    pub fn load<P: AsRef<Path>>(path: P, onnx_threads: usize) -> Result<Self> {
        let path = path.as_ref();

        ort::init().commit()?;
        info!(path = %path.display(), threads = onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        let output_name =
            select_output_name(&output_names).unwrap_or_else(|| "variable".to_string());

        info!(input = %input_name, output = %output_name, "ONNX model loaded");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

/// Pick the output carrying the predicted value.
///
/// Converters name the regression output `variable`; anything containing
/// `variable` or `output` wins, else the first output.
fn select_output_name(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find(|n| n.contains("variable") || n.contains("output"))
        .or_else(|| names.first())
        .map(|n| n.to_string())
}

impl Regressor for OnnxRegressor {
    fn name(&self) -> &str {
        "onnx"
    }

    fn feature_names(&self) -> Option<&[String]> {
        None
    }

    fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        // shape [1, num_features]
        let shape = vec![1_i64, row.len() as i64];
        let data: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        let input_tensor = Tensor::from_array((shape, data))
            .map_err(|e| ModelError::Runtime(format!("input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::Runtime(format!("lock error: {}", e)))?;
        let outputs = session
            .run(ort::inputs![&self.input_name => input_tensor])
            .map_err(|e| ModelError::Runtime(e.to_string()))?;

        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| ModelError::Runtime(format!("missing output {:?}", self.output_name)))?;
        let (_, values) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Runtime(e.to_string()))?;

        values
            .first()
            .map(|&v| v as f64)
            .ok_or_else(|| ModelError::Runtime("empty output tensor".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// MatMul + Add graph over 7 inputs: output = sum(inputs) + 0.5
    const SUM_REGRESSOR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/sum_regressor.onnx");

    #[test]
    fn test_output_name_selection() {
        assert_eq!(
            select_output_name(&["label", "variable"]),
            Some("variable".to_string())
        );
        assert_eq!(
            select_output_name(&["probabilities", "output_value"]),
            Some("output_value".to_string())
        );
        assert_eq!(select_output_name(&["y"]), Some("y".to_string()));
        assert_eq!(select_output_name(&[]), None);
    }

    #[test]
    fn test_missing_file_fails_to_load() {
        assert!(OnnxRegressor::load("nowhere/lightgbm_model.onnx", 1).is_err());
    }

    #[test]
    fn test_corrupt_file_fails_to_load() {
        let mut file = tempfile::Builder::new().suffix(".onnx").tempfile().unwrap();
        file.write_all(b"definitely not a protobuf graph").unwrap();
        assert!(OnnxRegressor::load(file.path(), 1).is_err());
    }

    #[test]
    fn test_single_row_inference() {
        let model = OnnxRegressor::load(SUM_REGRESSOR, 1).unwrap();
        assert_eq!(model.name(), "onnx");
        assert_eq!(model.input_name, "float_input");
        assert_eq!(model.output_name, "variable");

        let value = model.predict(&[1.0, 0.0, 2.0, 2.0, 1.0, 1.0, 1.0]).unwrap();
        assert!((value - 8.5).abs() < 1e-5);
    }

    #[test]
    fn test_wrong_width_is_a_runtime_error() {
        let model = OnnxRegressor::load(SUM_REGRESSOR, 1).unwrap();
        assert!(matches!(
            model.predict(&[1.0, 2.0]),
            Err(ModelError::Runtime(_))
        ));
    }
}
