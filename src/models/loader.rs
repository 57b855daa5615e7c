//! Artifact loading: the reference dataset and the trained model are read
//! once per process and shared read-only afterwards.

use crate::config::{ArtifactsConfig, ModelKind};
use crate::dataset::Dataset;
use crate::models::inference::Regressor;
use crate::models::lightgbm::LightGbmModel;
use crate::models::onnx::OnnxRegressor;
use crate::schema::{FeatureSchema, CATEGORICAL_FEATURES};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Where the dataset and model come from
pub trait ArtifactSource: Send + Sync {
    fn read_dataset(&self) -> Result<Dataset>;
    fn read_model(&self) -> Result<Arc<dyn Regressor>>;
}

/// Reads artifacts from the configured file paths
pub struct FileArtifacts {
    config: ArtifactsConfig,
}

impl FileArtifacts {
    pub fn new(config: ArtifactsConfig) -> Self {
        Self { config }
    }
}

impl ArtifactSource for FileArtifacts {
    fn read_dataset(&self) -> Result<Dataset> {
        let path = Path::new(&self.config.dataset_path);
        info!(path = %path.display(), "Loading reference dataset");

        let dataset = Dataset::load(path, &self.config.target_column, &CATEGORICAL_FEATURES)?;
        info!(
            rows = dataset.len(),
            features = dataset.columns().len(),
            "Reference dataset loaded"
        );
        Ok(dataset)
    }

    fn read_model(&self) -> Result<Arc<dyn Regressor>> {
        let path = Path::new(&self.config.model_path);
        match self.config.model_kind {
            ModelKind::Onnx => Ok(Arc::new(OnnxRegressor::load(
                path,
                self.config.onnx_threads,
            )?)),
            ModelKind::LightGbm => {
                info!(path = %path.display(), "Loading LightGBM model");
                let model = LightGbmModel::load(path)?;
                info!(
                    trees = model.num_trees(),
                    features = model.num_features(),
                    transform = ?model.transform(),
                    "Model loaded successfully"
                );
                Ok(Arc::new(model))
            }
        }
    }
}

/// Memoizes the artifacts of a source.
///
/// The first call to each accessor reads from the source; later calls
/// return the same shared object without touching it again.
pub struct ArtifactCache<S> {
    source: S,
    dataset: OnceCell<Arc<Dataset>>,
    model: OnceCell<Arc<dyn Regressor>>,
}

impl<S: ArtifactSource> ArtifactCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            dataset: OnceCell::new(),
            model: OnceCell::new(),
        }
    }

    pub async fn dataset(&self) -> Result<Arc<Dataset>> {
        self.dataset
            .get_or_try_init(|| async { self.source.read_dataset().map(Arc::new) })
            .await
            .cloned()
    }

    pub async fn model(&self) -> Result<Arc<dyn Regressor>> {
        self.model
            .get_or_try_init(|| async { self.source.read_model() })
            .await
            .cloned()
    }
}

/// Compare the category lists recorded in the model with the ones derived
/// from the dataset. Returns the names of columns that differ.
pub fn check_category_universe(
    schema: &FeatureSchema,
    dataset: &Dataset,
    model: &dyn Regressor,
) -> Vec<String> {
    let Some(recorded) = model.categories() else {
        return Vec::new();
    };
    let universe = dataset.category_universe();

    let categorical: Vec<&str> = schema
        .features()
        .iter()
        .filter(|f| f.is_categorical())
        .map(|f| f.name.as_str())
        .collect();

    if categorical.len() != recorded.len() {
        warn!(
            dataset = categorical.len(),
            model = recorded.len(),
            "Model records a different number of categorical columns"
        );
        return categorical.iter().map(|s| s.to_string()).collect();
    }

    let mut mismatched = Vec::new();
    for (name, fitted) in categorical.iter().zip(recorded) {
        let derived = universe.categories(name).unwrap_or_default();
        if derived != fitted.as_slice() {
            warn!(
                feature = %name,
                dataset_categories = derived.len(),
                model_categories = fitted.len(),
                "Category universe differs from the one recorded in the model"
            );
            mismatched.push(name.to_string());
        }
    }
    mismatched
}
