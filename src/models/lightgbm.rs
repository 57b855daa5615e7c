//! Native evaluator for LightGBM text models (`booster.save_model` output).
//!
//! Secondary backend, selected with `model_kind = "lightgbm"`; the default
//! path runs the ONNX export through ONNX Runtime. Only single-output
//! boosters with constant leaves are supported. Each tree is stored as
//! parallel arrays; a negative child index `c` points at leaf `!c`.

use crate::error::ModelError;
use crate::models::inference::Regressor;
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;

const CATEGORICAL_MASK: i8 = 1;
const DEFAULT_LEFT_MASK: i8 = 2;
const ZERO_THRESHOLD: f64 = 1e-35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

impl MissingType {
    fn from_decision_type(decision_type: i8) -> Self {
        match (decision_type >> 2) & 3 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

/// Output transform implied by the training objective
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputTransform {
    Identity,
    /// `regression` trained with `reg_sqrt`
    Square,
    /// Log-link objectives (poisson, gamma, tweedie)
    Exp,
    Sigmoid(f64),
}

impl OutputTransform {
    fn from_objective(objective: &str) -> Result<Self, ModelError> {
        let mut parts = objective.split_whitespace();
        let name = parts.next().unwrap_or("regression");
        let params: Vec<&str> = parts.collect();

        match name {
            "regression" if params.contains(&"sqrt") => Ok(OutputTransform::Square),
            "regression" | "regression_l1" | "huber" | "fair" | "quantile" | "mape" => {
                Ok(OutputTransform::Identity)
            }
            "poisson" | "gamma" | "tweedie" => Ok(OutputTransform::Exp),
            "binary" | "cross_entropy" | "xentropy" => {
                let sigmoid = params
                    .iter()
                    .find_map(|p| p.strip_prefix("sigmoid:"))
                    .map(|s| s.parse::<f64>())
                    .transpose()
                    .map_err(|e| ModelError::Malformed(format!("sigmoid parameter: {}", e)))?
                    .unwrap_or(1.0);
                Ok(OutputTransform::Sigmoid(sigmoid))
            }
            other => Err(ModelError::Unsupported(format!("objective {:?}", other))),
        }
    }

    fn apply(self, raw: f64) -> f64 {
        match self {
            OutputTransform::Identity => raw,
            OutputTransform::Square => raw.signum() * raw * raw,
            OutputTransform::Exp => raw.exp(),
            OutputTransform::Sigmoid(s) => 1.0 / (1.0 + (-s * raw).exp()),
        }
    }
}

/// One regression tree
#[derive(Debug, Clone)]
pub struct Tree {
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    decision_type: Vec<i8>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
    cat_boundaries: Vec<usize>,
    cat_threshold: Vec<u32>,
}

impl Tree {
    fn from_fields(index: usize, fields: &HashMap<&str, &str>) -> Result<Self, ModelError> {
        let context = |msg: String| ModelError::Malformed(format!("tree {}: {}", index, msg));

        if fields.get("is_linear").map(|v| v.trim()) == Some("1") {
            return Err(ModelError::Unsupported(format!(
                "tree {}: linear trees",
                index
            )));
        }

        let num_leaves: usize = scalar(fields, "num_leaves").map_err(context)?;
        if num_leaves == 0 {
            return Err(context("num_leaves is 0".to_string()));
        }
        let leaf_value: Vec<f64> = array(fields, "leaf_value").map_err(context)?;
        if leaf_value.len() != num_leaves {
            return Err(context(format!(
                "{} leaf values for {} leaves",
                leaf_value.len(),
                num_leaves
            )));
        }

        if num_leaves == 1 {
            return Ok(Self {
                split_feature: Vec::new(),
                threshold: Vec::new(),
                decision_type: Vec::new(),
                left_child: Vec::new(),
                right_child: Vec::new(),
                leaf_value,
                cat_boundaries: Vec::new(),
                cat_threshold: Vec::new(),
            });
        }

        let num_nodes = num_leaves - 1;
        let split_feature: Vec<usize> = array(fields, "split_feature").map_err(context)?;
        let threshold: Vec<f64> = array(fields, "threshold").map_err(context)?;
        let decision_type: Vec<i8> = if fields.contains_key("decision_type") {
            array(fields, "decision_type").map_err(context)?
        } else {
            vec![0; num_nodes]
        };
        let left_child: Vec<i32> = array(fields, "left_child").map_err(context)?;
        let right_child: Vec<i32> = array(fields, "right_child").map_err(context)?;

        for (name, len) in [
            ("split_feature", split_feature.len()),
            ("threshold", threshold.len()),
            ("decision_type", decision_type.len()),
            ("left_child", left_child.len()),
            ("right_child", right_child.len()),
        ] {
            if len != num_nodes {
                return Err(context(format!("{} has {} entries, expected {}", name, len, num_nodes)));
            }
        }
        for &child in left_child.iter().chain(&right_child) {
            let in_range = if child >= 0 {
                (child as usize) < num_nodes
            } else {
                ((!child) as usize) < num_leaves
            };
            if !in_range {
                return Err(context(format!("child index {} out of range", child)));
            }
        }

        let num_cat: usize = if fields.contains_key("num_cat") {
            scalar(fields, "num_cat").map_err(context)?
        } else {
            0
        };
        let (cat_boundaries, cat_threshold) = if num_cat > 0 {
            let boundaries: Vec<usize> = array(fields, "cat_boundaries").map_err(context)?;
            let bits: Vec<u32> = array(fields, "cat_threshold").map_err(context)?;
            if boundaries.len() != num_cat + 1 || boundaries.last() != Some(&bits.len()) {
                return Err(context("inconsistent categorical bitsets".to_string()));
            }
            if boundaries.windows(2).any(|w| w[0] > w[1]) {
                return Err(context("cat_boundaries is not non-decreasing".to_string()));
            }
            (boundaries, bits)
        } else {
            (Vec::new(), Vec::new())
        };

        for (node, &dt) in decision_type.iter().enumerate() {
            if dt & CATEGORICAL_MASK != 0 {
                let cat_idx = threshold[node] as usize;
                if cat_idx + 1 >= cat_boundaries.len() {
                    return Err(context(format!("node {} has no categorical bitset", node)));
                }
            }
        }

        Ok(Self {
            split_feature,
            threshold,
            decision_type,
            left_child,
            right_child,
            leaf_value,
            cat_boundaries,
            cat_threshold,
        })
    }

    fn num_nodes(&self) -> usize {
        self.split_feature.len()
    }

    /// Largest feature index this tree reads
    fn max_feature(&self) -> Option<usize> {
        self.split_feature.iter().copied().max()
    }

    /// Leaf value reached by `row`
    pub fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        if self.num_nodes() == 0 {
            return Ok(self.leaf_value[0]);
        }

        let mut node = 0i32;
        let mut steps = 0;
        while node >= 0 {
            if steps > self.num_nodes() {
                return Err(ModelError::Malformed("cycle in tree".to_string()));
            }
            steps += 1;

            let idx = node as usize;
            let feature = self.split_feature[idx];
            let value = *row.get(feature).ok_or(ModelError::FeatureCount {
                expected: feature + 1,
                actual: row.len(),
            })?;
            node = if self.decision_type[idx] & CATEGORICAL_MASK != 0 {
                self.categorical_decision(idx, value)
            } else {
                self.numerical_decision(idx, value)
            };
        }
        Ok(self.leaf_value[(!node) as usize])
    }

    fn numerical_decision(&self, node: usize, value: f64) -> i32 {
        let decision_type = self.decision_type[node];
        let missing = MissingType::from_decision_type(decision_type);
        let value = if value.is_nan() && missing != MissingType::NaN {
            0.0
        } else {
            value
        };

        let is_missing = match missing {
            MissingType::Zero => (-ZERO_THRESHOLD..=ZERO_THRESHOLD).contains(&value),
            MissingType::NaN => value.is_nan(),
            MissingType::None => false,
        };
        if is_missing {
            return if decision_type & DEFAULT_LEFT_MASK != 0 {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
        }

        if value <= self.threshold[node] {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }

    fn categorical_decision(&self, node: usize, value: f64) -> i32 {
        if value.is_nan() || value < 0.0 {
            return self.right_child[node];
        }
        let category = value as usize;
        let cat_idx = self.threshold[node] as usize;
        let bits = &self.cat_threshold[self.cat_boundaries[cat_idx]..self.cat_boundaries[cat_idx + 1]];

        let word = category / 32;
        let in_set = word < bits.len() && (bits[word] >> (category % 32)) & 1 == 1;
        if in_set {
            self.left_child[node]
        } else {
            self.right_child[node]
        }
    }
}

/// A parsed LightGBM booster
#[derive(Debug, Clone)]
pub struct LightGbmModel {
    feature_names: Vec<String>,
    num_features: usize,
    trees: Vec<Tree>,
    transform: OutputTransform,
    average_output: bool,
    pandas_categorical: Option<Vec<Vec<String>>>,
}

impl LightGbmModel {
    /// Load a model from a text file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to parse model {}", path.display()))
    }

    /// Parse the LightGBM text format
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let mut header: HashMap<&str, &str> = HashMap::new();
        let mut tree_blocks: Vec<HashMap<&str, &str>> = Vec::new();
        let mut current: Option<HashMap<&str, &str>> = None;
        let mut pandas_line = None;
        let mut in_trees = true;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("pandas_categorical:") {
                pandas_line = Some(rest);
                continue;
            }
            if !in_trees {
                continue;
            }
            if line == "end of trees" {
                in_trees = false;
                tree_blocks.extend(current.take());
                continue;
            }
            if line.starts_with("Tree=") {
                tree_blocks.extend(current.take());
                current = Some(HashMap::new());
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                match current.as_mut() {
                    Some(block) => block.insert(key, value),
                    None => header.insert(key, value),
                };
            } else if let Some(block) = current.as_mut() {
                // bare flags such as `average_output`
                block.insert(line, "");
            } else {
                header.insert(line, "");
            }
        }
        tree_blocks.extend(current.take());

        if !header.contains_key("tree") && !header.contains_key("version") {
            return Err(ModelError::Malformed("missing LightGBM header".to_string()));
        }

        let per_iteration: usize = if header.contains_key("num_tree_per_iteration") {
            scalar(&header, "num_tree_per_iteration").map_err(ModelError::Malformed)?
        } else {
            1
        };
        if per_iteration != 1 {
            return Err(ModelError::Unsupported(format!(
                "{} trees per iteration (multi-output models)",
                per_iteration
            )));
        }

        let transform =
            OutputTransform::from_objective(header.get("objective").copied().unwrap_or("regression"))?;

        let feature_names: Vec<String> = header
            .get("feature_names")
            .map(|names| names.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let trees = tree_blocks
            .iter()
            .enumerate()
            .map(|(i, fields)| Tree::from_fields(i, fields))
            .collect::<Result<Vec<_>, _>>()?;
        if trees.is_empty() {
            return Err(ModelError::Malformed("model has no trees".to_string()));
        }

        let declared = if header.contains_key("max_feature_idx") {
            Some(scalar::<usize>(&header, "max_feature_idx").map_err(ModelError::Malformed)? + 1)
        } else {
            None
        };
        let used = trees.iter().filter_map(Tree::max_feature).max().map(|m| m + 1);
        let num_features = declared
            .or(Some(feature_names.len()).filter(|n| *n > 0))
            .or(used)
            .unwrap_or(0);
        if used.is_some_and(|u| u > num_features) {
            return Err(ModelError::Malformed(
                "tree splits on a feature beyond max_feature_idx".to_string(),
            ));
        }
        if !feature_names.is_empty() && feature_names.len() != num_features {
            return Err(ModelError::Malformed(format!(
                "{} feature names for {} features",
                feature_names.len(),
                num_features
            )));
        }

        let pandas_categorical = match pandas_line {
            Some(json) => parse_pandas_categorical(json)?,
            None => None,
        };

        Ok(Self {
            feature_names,
            num_features,
            trees,
            transform,
            average_output: header.contains_key("average_output"),
            pandas_categorical,
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn transform(&self) -> OutputTransform {
        self.transform
    }

    /// Raw score before the objective transform
    pub fn raw_score(&self, row: &[f64]) -> Result<f64, ModelError> {
        if row.len() != self.num_features {
            return Err(ModelError::FeatureCount {
                expected: self.num_features,
                actual: row.len(),
            });
        }
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += tree.predict(row)?;
        }
        if self.average_output {
            sum /= self.trees.len() as f64;
        }
        Ok(sum)
    }
}

impl Regressor for LightGbmModel {
    fn name(&self) -> &str {
        "lightgbm"
    }

    fn feature_names(&self) -> Option<&[String]> {
        if self.feature_names.is_empty() {
            None
        } else {
            Some(&self.feature_names)
        }
    }

    fn categories(&self) -> Option<&[Vec<String>]> {
        self.pandas_categorical.as_deref()
    }

    fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        Ok(self.transform.apply(self.raw_score(row)?))
    }
}

fn scalar<T: std::str::FromStr>(fields: &HashMap<&str, &str>, key: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let raw = fields.get(key).ok_or_else(|| format!("missing {}", key))?;
    raw.trim()
        .parse()
        .map_err(|e| format!("bad {} {:?}: {}", key, raw, e))
}

fn array<T: std::str::FromStr>(fields: &HashMap<&str, &str>, key: &str) -> Result<Vec<T>, String>
where
    T::Err: std::fmt::Display,
{
    let raw = fields.get(key).ok_or_else(|| format!("missing {}", key))?;
    raw.split_whitespace()
        .map(|v| v.parse().map_err(|e| format!("bad {} entry {:?}: {}", key, v, e)))
        .collect()
}

fn parse_pandas_categorical(json: &str) -> Result<Option<Vec<Vec<String>>>, ModelError> {
    let lists: Option<Vec<Vec<serde_json::Value>>> = serde_json::from_str(json.trim())
        .map_err(|e| ModelError::Malformed(format!("pandas_categorical: {}", e)))?;
    Ok(lists.map(|lists| {
        lists
            .into_iter()
            .map(|list| {
                list.into_iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect()
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two trees over [Anode, pH]: a categorical split on Anode codes {1, 3}
    /// and a numeric split on pH with NaN routed left.
    pub(crate) const TWO_TREE_MODEL: &str = "\
tree
version=v4
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx=1
objective=regression
feature_names=Anode pH
feature_infos=0:1:2:3 [2:9]
tree_sizes=300 300

Tree=0
num_leaves=2
num_cat=1
split_feature=0
split_gain=10
threshold=0
decision_type=1
left_child=-1
right_child=-2
leaf_value=60 40
leaf_weight=5 5
leaf_count=5 5
internal_value=50
internal_weight=10
internal_count=10
cat_boundaries=0 1
cat_threshold=10
is_linear=0
shrinkage=1


Tree=1
num_leaves=3
num_cat=0
split_feature=1 1
split_gain=4 2
threshold=5.0000000000000009 7.5
decision_type=10 2
left_child=-1 -2
right_child=1 -3
leaf_value=1.5 -0.5 2.25
leaf_weight=3 4 3
leaf_count=3 4 3
internal_value=0 0
internal_weight=10 7
internal_count=10 7
is_linear=0
shrinkage=0.1


end of trees

feature_importances:
pH=2
Anode=1

parameters:
[boosting: gbdt]
end of parameters

pandas_categorical:[[\"GAC\", \"Graphite\", \"Graphite felt\", \"MWCNT\"]]
";

    #[test]
    fn test_parse_header_and_trees() {
        let model = LightGbmModel::parse(TWO_TREE_MODEL).unwrap();
        assert_eq!(model.num_trees(), 2);
        assert_eq!(model.num_features(), 2);
        assert_eq!(model.transform(), OutputTransform::Identity);
        assert_eq!(
            model.feature_names().unwrap(),
            &["Anode".to_string(), "pH".to_string()]
        );
        assert_eq!(model.categories().unwrap()[0][1], "Graphite");
    }

    #[test]
    fn test_categorical_split_uses_bitset() {
        let model = LightGbmModel::parse(TWO_TREE_MODEL).unwrap();
        // bitset 10 = 0b1010 -> codes 1 and 3 go left
        assert_eq!(model.predict(&[1.0, 4.0]).unwrap(), 60.0 + 1.5);
        assert_eq!(model.predict(&[3.0, 4.0]).unwrap(), 60.0 + 1.5);
        assert_eq!(model.predict(&[0.0, 4.0]).unwrap(), 40.0 + 1.5);
        assert_eq!(model.predict(&[40.0, 4.0]).unwrap(), 40.0 + 1.5);
        // unseen category (NaN) and negative codes go right
        assert_eq!(model.predict(&[f64::NAN, 4.0]).unwrap(), 40.0 + 1.5);
        assert_eq!(model.predict(&[-1.0, 4.0]).unwrap(), 40.0 + 1.5);
    }

    #[test]
    fn test_numerical_split_and_missing_values() {
        let model = LightGbmModel::parse(TWO_TREE_MODEL).unwrap();
        assert_eq!(model.predict(&[1.0, 6.0]).unwrap(), 60.0 - 0.5);
        assert_eq!(model.predict(&[1.0, 8.0]).unwrap(), 60.0 + 2.25);
        // decision_type 10 = NaN missing type with default left
        assert_eq!(model.predict(&[1.0, f64::NAN]).unwrap(), 60.0 + 1.5);
    }

    #[test]
    fn test_feature_count_is_checked() {
        let model = LightGbmModel::parse(TWO_TREE_MODEL).unwrap();
        assert_eq!(
            model.predict(&[1.0]).unwrap_err(),
            ModelError::FeatureCount {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_single_leaf_tree_and_log_link() {
        let text = "tree\nversion=v4\nnum_tree_per_iteration=1\nmax_feature_idx=0\nobjective=poisson\n\nTree=0\nnum_leaves=1\nnum_cat=0\nsplit_feature=\nsplit_gain=\nthreshold=\ndecision_type=\nleft_child=\nright_child=\nleaf_value=0.5\nshrinkage=1\n\nend of trees\n";
        let model = LightGbmModel::parse(text).unwrap();
        let value = model.predict(&[3.0]).unwrap();
        assert!((value - 0.5f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn test_multiclass_is_unsupported() {
        let text = TWO_TREE_MODEL.replace("num_tree_per_iteration=1", "num_tree_per_iteration=3");
        assert!(matches!(
            LightGbmModel::parse(&text),
            Err(ModelError::Unsupported(_))
        ));
    }

    #[test]
    fn test_out_of_range_child_is_malformed() {
        let text = TWO_TREE_MODEL.replace("left_child=-1 -2", "left_child=-1 -9");
        let err = LightGbmModel::parse(&text).unwrap_err();
        assert!(err.to_string().contains("tree 1"));
    }

    #[test]
    fn test_linear_trees_are_unsupported() {
        let text = TWO_TREE_MODEL.replacen("is_linear=0", "is_linear=1", 1);
        let err = LightGbmModel::parse(&text).unwrap_err();
        assert!(matches!(err, ModelError::Unsupported(_)));
        assert!(err.to_string().contains("tree 0"));
    }

    #[test]
    fn test_decreasing_cat_boundaries_are_malformed() {
        let text = TWO_TREE_MODEL
            .replace("num_cat=1\n", "num_cat=2\n")
            .replace("cat_boundaries=0 1", "cat_boundaries=0 2 1");
        let err = LightGbmModel::parse(&text).unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
        assert!(err.to_string().contains("cat_boundaries"));
    }

    #[test]
    fn test_objective_transforms() {
        assert_eq!(
            OutputTransform::from_objective("regression sqrt").unwrap(),
            OutputTransform::Square
        );
        assert_eq!(
            OutputTransform::from_objective("binary sigmoid:2").unwrap(),
            OutputTransform::Sigmoid(2.0)
        );
        assert!(OutputTransform::from_objective("lambdarank").is_err());
        assert_eq!(OutputTransform::Square.apply(-3.0), -9.0);
    }
}
