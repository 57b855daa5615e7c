//! Model loading and inference components

pub mod inference;
pub mod lightgbm;
pub mod loader;
pub mod onnx;

pub use inference::{InferenceEngine, Regressor};
pub use lightgbm::LightGbmModel;
pub use loader::{ArtifactCache, ArtifactSource, FileArtifacts};
pub use onnx::OnnxRegressor;
