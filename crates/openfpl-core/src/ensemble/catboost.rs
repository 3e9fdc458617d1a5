// Categorical-boosted pipeline: oblivious (symmetric) trees over features
// where categorical columns are replaced by per-category target statistics.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::loader::ModelLoadError;
use super::{Pipeline, PipelineKind, ScoringError};
use crate::player::FeatureRow;

const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, Deserialize)]
pub struct CategoricalBoostedSpec {
    #[serde(default)]
    pub bias: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
    pub features: Vec<String>,
    /// Target statistics for categorical features, keyed by feature name.
    #[serde(default)]
    pub ctr: BTreeMap<String, TargetStats>,
    pub trees: Vec<ObliviousTreeSpec>,
}

fn unit_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetStats {
    pub values: BTreeMap<String, f64>,
    /// Used for categories not seen during training.
    pub prior: f64,
}

/// Every level of an oblivious tree applies the same split, so a tree of
/// depth `d` is `d` splits plus `2^d` leaves indexed by the split outcomes.
#[derive(Debug, Clone, Deserialize)]
pub struct ObliviousTreeSpec {
    pub splits: Vec<ObliviousSplit>,
    pub leaf_values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ObliviousSplit {
    pub feature: usize,
    pub border: f64,
}

#[derive(Debug)]
enum Transform {
    Numeric,
    TargetStats { values: HashMap<String, f64>, prior: f64 },
}

#[derive(Debug)]
pub struct CategoricalBoostedPipeline {
    name: String,
    bias: f64,
    scale: f64,
    features: Vec<(String, Transform)>,
    trees: Vec<ObliviousTreeSpec>,
}

impl CategoricalBoostedPipeline {
    pub fn new(name: &str, spec: CategoricalBoostedSpec) -> Result<Self, ModelLoadError> {
        let invalid = |message: String| ModelLoadError::Invalid {
            model: name.to_string(),
            message,
        };

        if !(spec.bias.is_finite() && spec.scale.is_finite()) {
            return Err(invalid("bias and scale must be finite".into()));
        }
        if spec.trees.is_empty() {
            return Err(invalid("model has no trees".into()));
        }
        for (t, tree) in spec.trees.iter().enumerate() {
            if tree.splits.len() > MAX_DEPTH {
                return Err(invalid(format!("tree {t} deeper than {MAX_DEPTH}")));
            }
            if tree.leaf_values.len() != 1 << tree.splits.len() {
                return Err(invalid(format!(
                    "tree {t} has {} leaves, expected {}",
                    tree.leaf_values.len(),
                    1usize << tree.splits.len()
                )));
            }
            if tree.splits.iter().any(|s| s.feature >= spec.features.len()) {
                return Err(invalid(format!("tree {t} splits on an unknown feature")));
            }
            if tree.leaf_values.iter().any(|v| !v.is_finite()) {
                return Err(invalid(format!("tree {t} has a non-finite leaf")));
            }
        }
        for (feature, stats) in &spec.ctr {
            if !spec.features.contains(feature) {
                return Err(invalid(format!(
                    "target statistics `{feature}` do not name a model feature"
                )));
            }
            if !stats.prior.is_finite() {
                return Err(invalid(format!("prior for `{feature}` is not finite")));
            }
        }

        let mut ctr = spec.ctr;
        let features = spec
            .features
            .into_iter()
            .map(|feature| {
                let transform = match ctr.remove(&feature) {
                    Some(stats) => Transform::TargetStats {
                        values: stats.values.into_iter().collect(),
                        prior: stats.prior,
                    },
                    None => Transform::Numeric,
                };
                (feature, transform)
            })
            .collect();

        Ok(CategoricalBoostedPipeline {
            name: name.to_string(),
            bias: spec.bias,
            scale: spec.scale,
            features,
            trees: spec.trees,
        })
    }

    fn transform(&self, row: &FeatureRow) -> Result<Vec<f64>, ScoringError> {
        self.features
            .iter()
            .map(|(feature, transform)| match transform {
                Transform::Numeric => row.number(feature),
                Transform::TargetStats { values, prior } => {
                    let level = row.category(feature)?;
                    Ok(values.get(&level).copied().unwrap_or(*prior))
                }
            })
            .collect()
    }
}

fn leaf_index(tree: &ObliviousTreeSpec, x: &[f64]) -> usize {
    tree.splits
        .iter()
        .enumerate()
        .fold(0, |index, (depth, split)| {
            // NaN compares false and lands on the low side.
            if x[split.feature] > split.border {
                index | (1 << depth)
            } else {
                index
            }
        })
}

impl Pipeline for CategoricalBoostedPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PipelineKind {
        PipelineKind::CategoricalBoosted
    }

    fn predict(&self, row: &FeatureRow) -> Result<f64, ScoringError> {
        let x = self.transform(row)?;
        let sum: f64 = self
            .trees
            .iter()
            .map(|tree| tree.leaf_values[leaf_index(tree, &x)])
            .sum();
        Ok(self.bias + self.scale * sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::tests::row;
    use crate::player::{FeatureValue, Position};

    fn spec() -> CategoricalBoostedSpec {
        serde_json::from_str(
            r#"{
                "bias": 1.0,
                "scale": 2.0,
                "features": ["minutes", "team_name"],
                "ctr": {
                    "team_name": { "values": { "Arsenal": 0.8, "Everton": 0.2 }, "prior": 0.5 }
                },
                "trees": [
                    {
                        "splits": [
                            { "feature": 0, "border": 45.0 },
                            { "feature": 1, "border": 0.6 }
                        ],
                        "leaf_values": [0.0, 0.5, 0.25, 1.0]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    fn with_minutes(minutes: f64) -> FeatureRow {
        let mut r = row(3, Position::Defender, 50);
        r.features
            .insert("minutes".into(), FeatureValue::Number(minutes));
        r
    }

    #[test]
    fn leaf_selected_by_split_bits() {
        let model = CategoricalBoostedPipeline::new("cat", spec()).unwrap();

        // minutes > 45 (bit 0), Arsenal 0.8 > 0.6 (bit 1) -> leaf 3
        let got = model.predict(&with_minutes(90.0)).unwrap();
        assert!((got - 3.0).abs() < 1e-9);

        // minutes <= 45, Everton 0.2 -> leaf 0
        let mut r = with_minutes(20.0);
        r.team_name = "Everton".into();
        assert!((model.predict(&r).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unseen_category_uses_prior() {
        let model = CategoricalBoostedPipeline::new("cat", spec()).unwrap();
        let mut r = with_minutes(90.0);
        r.team_name = "Ipswich".into();
        // prior 0.5 <= 0.6 -> leaf 1 (0.5)
        assert!((model.predict(&r).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn wrong_leaf_count_rejected() {
        let mut s = spec();
        s.trees[0].leaf_values.pop();
        let err = CategoricalBoostedPipeline::new("cat", s).unwrap_err();
        assert!(err.to_string().contains("expected 4"));
    }
}
