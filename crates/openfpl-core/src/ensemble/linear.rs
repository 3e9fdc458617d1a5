// Linear regression pipeline with standardized numeric terms and one-hot
// encoded categorical terms.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::loader::ModelLoadError;
use super::{Pipeline, PipelineKind, ScoringError};
use crate::player::FeatureRow;

/// Serialized form of a linear model.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearSpec {
    pub intercept: f64,
    /// Numeric feature name -> standardized coefficient.
    #[serde(default)]
    pub numeric: BTreeMap<String, NumericTerm>,
    /// Categorical feature name -> (category -> coefficient). A category
    /// not listed contributes nothing (the dropped reference level).
    #[serde(default)]
    pub categorical: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NumericTerm {
    pub coef: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

#[derive(Debug)]
pub struct LinearPipeline {
    name: String,
    intercept: f64,
    numeric: Vec<(String, NumericTerm)>,
    categorical: Vec<(String, HashMap<String, f64>)>,
}

impl LinearPipeline {
    pub fn new(name: &str, spec: LinearSpec) -> Result<Self, ModelLoadError> {
        let invalid = |message: String| ModelLoadError::Invalid {
            model: name.to_string(),
            message,
        };

        if !spec.intercept.is_finite() {
            return Err(invalid("intercept is not finite".into()));
        }
        for (feature, term) in &spec.numeric {
            if !(term.coef.is_finite() && term.mean.is_finite() && term.scale.is_finite()) {
                return Err(invalid(format!("term `{feature}` has non-finite parameters")));
            }
            if term.scale == 0.0 {
                return Err(invalid(format!("term `{feature}` has zero scale")));
            }
        }

        Ok(LinearPipeline {
            name: name.to_string(),
            intercept: spec.intercept,
            numeric: spec.numeric.into_iter().collect(),
            categorical: spec
                .categorical
                .into_iter()
                .map(|(feature, levels)| (feature, levels.into_iter().collect()))
                .collect(),
        })
    }
}

impl Pipeline for LinearPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PipelineKind {
        PipelineKind::Linear
    }

    fn predict(&self, row: &FeatureRow) -> Result<f64, ScoringError> {
        let mut total = self.intercept;
        for (feature, term) in &self.numeric {
            let x = row.number(feature)?;
            total += term.coef * (x - term.mean) / term.scale;
        }
        for (feature, levels) in &self.categorical {
            let level = row.category(feature)?;
            total += levels.get(&level).copied().unwrap_or(0.0);
        }
        Ok(total)
    }
}
