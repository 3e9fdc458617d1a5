// Gradient-boosted decision tree pipeline.
//
// Trees are stored as flat node arrays (root at index 0, children after their
// parent). Categorical features are ordinal-encoded through a per-feature
// category table; an unseen category becomes NaN and follows the split's
// default direction, the same as a missing numeric value.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::loader::ModelLoadError;
use super::{Pipeline, PipelineKind, ScoringError};
use crate::player::FeatureRow;

// ---------------------------------------------------------------------------
// Serialized form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GradientBoostedSpec {
    #[serde(default)]
    pub base_score: f64,
    #[serde(default = "unit_rate")]
    pub learning_rate: f64,
    /// Feature names; split `feature` fields index into this list.
    pub features: Vec<String>,
    /// Ordinal encoding tables for categorical features.
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
    pub trees: Vec<TreeSpec>,
}

fn unit_rate() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeSpec {
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NodeSpec {
    Split {
        feature: usize,
        threshold: f64,
        #[serde(default)]
        default_left: bool,
        left: usize,
        right: usize,
    },
    Leaf {
        leaf: f64,
    },
}

impl NodeSpec {
    /// Go left when `value < threshold`; NaN follows `default_left`.
    fn go_left(value: f64, threshold: f64, default_left: bool) -> bool {
        if value.is_nan() {
            default_left
        } else {
            value < threshold
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Encoding {
    Numeric,
    Ordinal(HashMap<String, usize>),
}

#[derive(Debug)]
pub struct GradientBoostedPipeline {
    name: String,
    base_score: f64,
    learning_rate: f64,
    features: Vec<(String, Encoding)>,
    trees: Vec<Vec<NodeSpec>>,
}

impl GradientBoostedPipeline {
    pub fn new(name: &str, spec: GradientBoostedSpec) -> Result<Self, ModelLoadError> {
        let invalid = |message: String| ModelLoadError::Invalid {
            model: name.to_string(),
            message,
        };

        if !(spec.base_score.is_finite() && spec.learning_rate.is_finite()) {
            return Err(invalid("base_score and learning_rate must be finite".into()));
        }
        if spec.trees.is_empty() {
            return Err(invalid("model has no trees".into()));
        }
        for (t, tree) in spec.trees.iter().enumerate() {
            validate_tree(t, &tree.nodes, spec.features.len()).map_err(invalid)?;
        }
        if let Some(unknown) = spec
            .categories
            .keys()
            .find(|c| !spec.features.contains(c))
        {
            return Err(invalid(format!(
                "category table `{unknown}` does not name a model feature"
            )));
        }

        let mut categories = spec.categories;
        let features = spec
            .features
            .into_iter()
            .map(|feature| {
                let encoding = match categories.remove(&feature) {
                    Some(levels) => Encoding::Ordinal(
                        levels
                            .into_iter()
                            .enumerate()
                            .map(|(i, level)| (level, i))
                            .collect(),
                    ),
                    None => Encoding::Numeric,
                };
                (feature, encoding)
            })
            .collect();

        Ok(GradientBoostedPipeline {
            name: name.to_string(),
            base_score: spec.base_score,
            learning_rate: spec.learning_rate,
            features,
            trees: spec.trees.into_iter().map(|t| t.nodes).collect(),
        })
    }

    fn encode(&self, row: &FeatureRow) -> Result<Vec<f64>, ScoringError> {
        self.features
            .iter()
            .map(|(feature, encoding)| match encoding {
                Encoding::Numeric => row.number(feature),
                Encoding::Ordinal(levels) => {
                    let level = row.category(feature)?;
                    Ok(levels.get(&level).map_or(f64::NAN, |&i| i as f64))
                }
            })
            .collect()
    }
}

/// Children must come after their parent, which rules out cycles and
/// guarantees traversal terminates.
fn validate_tree(index: usize, nodes: &[NodeSpec], num_features: usize) -> Result<(), String> {
    if nodes.is_empty() {
        return Err(format!("tree {index} has no nodes"));
    }
    for (i, node) in nodes.iter().enumerate() {
        match *node {
            NodeSpec::Split {
                feature,
                threshold,
                left,
                right,
                ..
            } => {
                if feature >= num_features {
                    return Err(format!("tree {index} node {i}: feature {feature} out of range"));
                }
                if threshold.is_nan() {
                    return Err(format!("tree {index} node {i}: threshold is NaN"));
                }
                if left <= i || right <= i || left >= nodes.len() || right >= nodes.len() {
                    return Err(format!("tree {index} node {i}: invalid child index"));
                }
            }
            NodeSpec::Leaf { leaf } => {
                if !leaf.is_finite() {
                    return Err(format!("tree {index} node {i}: leaf value is not finite"));
                }
            }
        }
    }
    Ok(())
}

fn traverse(nodes: &[NodeSpec], x: &[f64]) -> f64 {
    let mut i = 0;
    loop {
        match nodes[i] {
            NodeSpec::Leaf { leaf } => return leaf,
            NodeSpec::Split {
                feature,
                threshold,
                default_left,
                left,
                right,
            } => {
                i = if NodeSpec::go_left(x[feature], threshold, default_left) {
                    left
                } else {
                    right
                };
            }
        }
    }
}

impl Pipeline for GradientBoostedPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PipelineKind {
        PipelineKind::GradientBoosted
    }

    fn predict(&self, row: &FeatureRow) -> Result<f64, ScoringError> {
        let x = self.encode(row)?;
        let sum: f64 = self.trees.iter().map(|nodes| traverse(nodes, &x)).sum();
        Ok(self.base_score + self.learning_rate * sum)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
