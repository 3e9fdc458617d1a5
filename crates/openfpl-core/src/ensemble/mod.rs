// Model ensemble: heterogeneous scoring pipelines behind one capability.
//
// Each pipeline maps a FeatureRow to a scalar point prediction. Pipelines are
// loaded once at startup (see `loader`) and are read-only afterwards, so a
// single `Ensemble` is shared across all scoring threads.

pub mod catboost;
pub mod gbdt;
pub mod linear;
pub mod loader;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::combiner::{combine, InsufficientPredictionsError};
use crate::player::FeatureRow;

pub use catboost::CategoricalBoostedPipeline;
pub use gbdt::GradientBoostedPipeline;
pub use linear::LinearPipeline;
pub use loader::{load_ensemble, ModelLoadError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A single row could not be scored. Always row-local.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("missing required feature `{feature}`")]
    MissingFeature { feature: String },

    #[error("feature `{feature}` has unusable value `{value}`")]
    InvalidFeature { feature: String, value: String },

    #[error("pipeline `{pipeline}` produced a non-finite prediction")]
    NonFinitePrediction { pipeline: String },

    #[error(transparent)]
    InsufficientPredictions(#[from] InsufficientPredictionsError),
}

// ---------------------------------------------------------------------------
// Pipeline capability
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Linear,
    GradientBoosted,
    CategoricalBoosted,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineKind::Linear => "linear",
            PipelineKind::GradientBoosted => "gradient_boosted",
            PipelineKind::CategoricalBoosted => "categorical_boosted",
        };
        f.write_str(s)
    }
}

/// Score one row. Implementations must be pure: no interior mutability, no
/// I/O, safe to call from many threads at once.
pub trait Pipeline: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn kind(&self) -> PipelineKind;

    fn predict(&self, row: &FeatureRow) -> Result<f64, ScoringError>;
}

// ---------------------------------------------------------------------------
// Ensemble
// ---------------------------------------------------------------------------

/// The loaded set of pipelines, in config order.
#[derive(Debug)]
pub struct Ensemble {
    pipelines: Vec<Box<dyn Pipeline>>,
}

impl Ensemble {
    pub fn new(pipelines: Vec<Box<dyn Pipeline>>) -> Self {
        Ensemble { pipelines }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &dyn Pipeline> {
        self.pipelines.iter().map(|p| p.as_ref())
    }

    /// Raw predictions from every pipeline, in load order. The first
    /// failing pipeline fails the row.
    pub fn predictions(&self, row: &FeatureRow) -> Result<Vec<f64>, ScoringError> {
        self.pipelines
            .iter()
            .map(|pipeline| {
                let value = pipeline.predict(row)?;
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(ScoringError::NonFinitePrediction {
                        pipeline: pipeline.name().to_string(),
                    })
                }
            })
            .collect()
    }

    /// Combined expected points for one row.
    pub fn score(&self, row: &FeatureRow) -> Result<f64, ScoringError> {
        let predictions = self.predictions(row)?;
        Ok(combine(&predictions)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
