//! Feature schema and categorical encoding for model inference.
//!
//! The schema is the dataset's column list (target excluded). Five columns
//! are categorical and offered through fixed, hand-curated choice lists;
//! every other column is numeric. The encoder turns a [`FeatureRecord`]
//! into the row layout the model was trained on.

use crate::dataset::{CategoryUniverse, Dataset, Row};
use crate::error::{ModelError, PredictError};
use crate::types::{FeatureRecord, FeatureValue};
use anyhow::{bail, Result};
use tracing::warn;

/// Categorical columns, in the order they appear on the form
pub const CATEGORICAL_FEATURES: [&str; 5] =
    ["Anode", "Cathode", "Electrolyte", "Pollutant", "Reactor type"];

const ANODE_VALUES: &[&str] = &[
    "Graphite",
    "Graphite felt",
    "MWCNT",
    "Black carbon (BC)",
    "GAC",
    "Graphite plate",
    "Carbon fiber",
    "Activated carbon fiber",
];

const CATHODE_VALUES: &[&str] = &[
    "Graphite",
    "Pt plate",
    "Stainless steel",
    "Graphite plate",
    "Graphite felt",
    "Carbon fiber",
    "iridium-coated titanium",
];

const ELECTROLYTE_VALUES: &[&str] = &[
    "NaCl",
    "Na2SO4",
    "NaNO3",
    "NaClO4",
    "HPO4",
    "HCO3",
    "NaHCO3",
    "Groundwater",
];

const POLLUTANT_VALUES: &[&str] = &[
    "cytarabine",
    "Atrazine",
    "Paracetamol",
    "Sulfamethoxazole",
    "Nitrobenzene",
    "Cyclohexanecarboxylic acid",
    "Bisphenol S",
    "Ethinylestradiol",
    "Ibuprofen",
    "Ciprofloxacin",
    "Acetaminophen",
    "Diclofenac",
    "Methylene Blue",
    "Tetracycline",
    "Sulfamethazine",
    "Sulfanilamide",
    "Phenol",
    "Benzoquinone",
    "Catechol",
    "Deoxynivalenol",
    "Diuron",
    "Alizarin red S",
];

const REACTOR_TYPE_VALUES: &[&str] = &["Undivided reactor", "Divided reactor"];

/// Fixed choice list of a categorical feature
pub fn dropdown_values(feature: &str) -> Option<&'static [&'static str]> {
    match feature {
        "Anode" => Some(ANODE_VALUES),
        "Cathode" => Some(CATHODE_VALUES),
        "Electrolyte" => Some(ELECTROLYTE_VALUES),
        "Pollutant" => Some(POLLUTANT_VALUES),
        "Reactor type" => Some(REACTOR_TYPE_VALUES),
        _ => None,
    }
}

/// Name normalization LightGBM applies to pandas column names
pub fn normalize_feature_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Categorical(&'static [&'static str]),
    Numeric,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
}

impl FeatureSpec {
    pub fn is_categorical(&self) -> bool {
        matches!(self.kind, FeatureKind::Categorical(_))
    }
}

/// Input schema of the form and the model
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    /// Build the schema from the dataset's feature columns
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let mut features = Vec::with_capacity(dataset.columns().len());
        for (idx, name) in dataset.columns().iter().enumerate() {
            let kind = if dataset.is_categorical(idx) {
                match dropdown_values(name) {
                    Some(values) => FeatureKind::Categorical(values),
                    None => bail!("no choice list for categorical column {:?}", name),
                }
            } else {
                FeatureKind::Numeric
            };
            features.push(FeatureSpec {
                name: name.clone(),
                kind,
            });
        }
        Ok(Self { features })
    }

    /// All features in dataset column order
    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Categorical features in form order
    pub fn categorical(&self) -> impl Iterator<Item = &FeatureSpec> {
        CATEGORICAL_FEATURES
            .iter()
            .filter_map(move |name| self.feature(name))
    }

    /// Numeric features in dataset column order
    pub fn numeric(&self) -> impl Iterator<Item = &FeatureSpec> {
        self.features.iter().filter(|f| !f.is_categorical())
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name.as_str()).collect()
    }

    /// Turn a dataset row into a record of defaults.
    ///
    /// Empty numeric cells become 0; empty categorical cells are left out so
    /// the selector falls back to its first choice.
    pub fn record_from_row(&self, row: &Row) -> FeatureRecord {
        let mut record = FeatureRecord::new();
        for (spec, value) in self.features.iter().zip(&row.values) {
            match (value, spec.kind) {
                (Some(v), _) => record.insert(spec.name.clone(), v.clone()),
                (None, FeatureKind::Numeric) => {
                    record.insert(spec.name.clone(), FeatureValue::Numeric(0.0))
                }
                (None, FeatureKind::Categorical(_)) => {}
            }
        }
        record
    }
}

/// Encodes records into model rows.
///
/// Column order follows the model's feature names when it has them,
/// otherwise the schema order. Categorical values become their index in the
/// dataset-derived category universe, or NaN when never observed.
#[derive(Debug, Clone)]
pub struct FeatureEncoder {
    order: Vec<FeatureSpec>,
    universe: CategoryUniverse,
}

impl FeatureEncoder {
    pub fn new(
        schema: &FeatureSchema,
        universe: CategoryUniverse,
        model_features: Option<&[String]>,
    ) -> Result<Self, ModelError> {
        let order = match model_features {
            None => schema.features().to_vec(),
            Some(names) => Self::align(schema, names)?,
        };
        Ok(Self { order, universe })
    }

    fn align(schema: &FeatureSchema, names: &[String]) -> Result<Vec<FeatureSpec>, ModelError> {
        let by_name: Option<Vec<FeatureSpec>> = names
            .iter()
            .map(|model_name| {
                schema
                    .features()
                    .iter()
                    .find(|f| normalize_feature_name(&f.name) == *model_name)
                    .cloned()
            })
            .collect();

        match by_name {
            Some(order) if order.len() == schema.feature_count() => Ok(order),
            _ if names.len() == schema.feature_count() => {
                warn!(
                    model_features = ?names,
                    "Model feature names do not match dataset columns, using column order"
                );
                Ok(schema.features().to_vec())
            }
            _ => Err(ModelError::FeatureCount {
                expected: names.len(),
                actual: schema.feature_count(),
            }),
        }
    }

    /// Feature names in model input order
    pub fn input_names(&self) -> Vec<&str> {
        self.order.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn universe(&self) -> &CategoryUniverse {
        &self.universe
    }

    /// Encode one record into a model row
    pub fn encode(&self, record: &FeatureRecord) -> Result<Vec<f64>, PredictError> {
        let mut row = Vec::with_capacity(self.order.len());
        for spec in &self.order {
            let value = record
                .get(&spec.name)
                .ok_or_else(|| PredictError::Encoding(format!("missing feature {:?}", spec.name)))?;

            let encoded = match (spec.kind, value) {
                (FeatureKind::Numeric, FeatureValue::Numeric(v)) => *v,
                (FeatureKind::Categorical(_), FeatureValue::Categorical(v)) => {
                    if self.universe.categories(&spec.name).is_none() {
                        return Err(PredictError::Encoding(format!(
                            "no category universe for {:?}",
                            spec.name
                        )));
                    }
                    self.universe
                        .code(&spec.name, v)
                        .map_or(f64::NAN, |code| code as f64)
                }
                (FeatureKind::Numeric, FeatureValue::Categorical(v)) => {
                    return Err(PredictError::Encoding(format!(
                        "{:?} expects a number, got {:?}",
                        spec.name, v
                    )))
                }
                (FeatureKind::Categorical(_), FeatureValue::Numeric(v)) => {
                    return Err(PredictError::Encoding(format!(
                        "{:?} expects a category, got {}",
                        spec.name, v
                    )))
                }
            };
            row.push(encoded);
        }
        Ok(row)
    }
}
