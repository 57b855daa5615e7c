//! Configuration management for the predictor service

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialized model format
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// ONNX export of the booster, evaluated with ONNX Runtime
    #[default]
    Onnx,
    /// LightGBM text model (`booster.save_model`), evaluated natively
    LightGbm,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub artifacts: ArtifactsConfig,
    pub session: SessionConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. "127.0.0.1:8501"
    pub bind: String,
}

/// Static input files
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactsConfig {
    /// Reference spreadsheet (`.xlsx`, `.xls`, `.ods`) or CSV export
    pub dataset_path: String,
    /// Trained model file
    pub model_path: String,
    /// Model format: "onnx" or "lightgbm"
    #[serde(default)]
    pub model_kind: ModelKind,
    /// Name of the target column in the dataset
    #[serde(default = "default_target_column")]
    pub target_column: String,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_target_column() -> String {
    "Removal Efficiency(%)".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Idle time after which a session is discarded
    pub ttl_secs: u64,
    /// How often idle sessions are swept
    pub sweep_interval_secs: u64,
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Interval of the periodic summary log (0 disables it)
    pub report_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the default file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path.
    ///
    /// Built-in defaults are overlaid by the file (if present) and then by
    /// `REP__SECTION__KEY` environment variables.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(
                Config::try_from(&AppConfig::default())
                    .context("Failed to serialize default configuration")?,
            )
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(Environment::with_prefix("REP").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:8501".to_string(),
            },
            artifacts: ArtifactsConfig {
                dataset_path: "data/DATA.xlsx".to_string(),
                model_path: "models/lightgbm_model.onnx".to_string(),
                model_kind: ModelKind::Onnx,
                target_column: default_target_column(),
                onnx_threads: default_onnx_threads(),
            },
            session: SessionConfig {
                ttl_secs: 3600,
                sweep_interval_secs: 60,
            },
            metrics: MetricsConfig {
                report_interval_secs: 300,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1:8501");
        assert_eq!(config.artifacts.model_kind, ModelKind::Onnx);
        assert_eq!(config.artifacts.model_path, "models/lightgbm_model.onnx");
        assert_eq!(config.artifacts.target_column, "Removal Efficiency(%)");
        assert_eq!(config.session.ttl_secs, 3600);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config.artifacts.dataset_path, "data/DATA.xlsx");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nbind = \"0.0.0.0:9000\"\n\n[artifacts]\nmodel_kind = \"lightgbm\"\nmodel_path = \"models/model.txt\"\ndataset_path = \"data/DATA.csv\""
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.artifacts.model_kind, ModelKind::LightGbm);
        assert_eq!(config.artifacts.model_path, "models/model.txt");
        // untouched sections keep their defaults
        assert_eq!(config.session.sweep_interval_secs, 60);
    }
}
