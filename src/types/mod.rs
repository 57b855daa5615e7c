//! Type definitions for the predictor service

pub mod prediction;
pub mod record;

pub use prediction::{Banner, BannerKind, Prediction};
pub use record::{FeatureRecord, FeatureValue};
