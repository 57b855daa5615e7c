//! Removal Efficiency Predictor Library
//!
//! A single-page web form that predicts the removal efficiency (%) of an
//! electrochemical treatment process from a trained LightGBM regressor.

pub mod config;
pub mod dataset;
pub mod error;
pub mod form;
pub mod metrics;
pub mod models;
pub mod predictor;
pub mod schema;
pub mod server;
pub mod session;
pub mod types;

pub use config::AppConfig;
pub use dataset::Dataset;
pub use error::{ModelError, PredictError};
pub use models::inference::InferenceEngine;
pub use predictor::Predictor;
pub use server::AppState;
pub use types::{FeatureRecord, FeatureValue, Prediction};
