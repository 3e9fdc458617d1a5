// Startup loading of model files into type-erased pipelines.
//
// Model files are JSON documents tagged by `kind`. Any failure here is fatal:
// the service never starts with a partial ensemble.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use super::catboost::{CategoricalBoostedPipeline, CategoricalBoostedSpec};
use super::gbdt::{GradientBoostedPipeline, GradientBoostedSpec};
use super::linear::{LinearPipeline, LinearSpec};
use super::{Ensemble, Pipeline};
use crate::config::ModelEntry;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse model file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid model `{model}`: {message}")]
    Invalid { model: String, message: String },

    #[error("no models configured")]
    Empty,
}

/// On-disk model document.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ModelFile {
    Linear(LinearSpec),
    GradientBoosted(GradientBoostedSpec),
    CategoricalBoosted(CategoricalBoostedSpec),
}

impl ModelFile {
    fn into_pipeline(self, name: &str) -> Result<Box<dyn Pipeline>, ModelLoadError> {
        Ok(match self {
            ModelFile::Linear(spec) => Box::new(LinearPipeline::new(name, spec)?),
            ModelFile::GradientBoosted(spec) => {
                Box::new(GradientBoostedPipeline::new(name, spec)?)
            }
            ModelFile::CategoricalBoosted(spec) => {
                Box::new(CategoricalBoostedPipeline::new(name, spec)?)
            }
        })
    }
}

/// Build a pipeline from an in-memory JSON model document.
pub fn parse_pipeline(name: &str, json: &str, path: &Path) -> Result<Box<dyn Pipeline>, ModelLoadError> {
    let file: ModelFile = serde_json::from_str(json).map_err(|e| ModelLoadError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    file.into_pipeline(name)
}

/// Load one pipeline from a model file.
pub fn load_pipeline(name: &str, path: &Path) -> Result<Box<dyn Pipeline>, ModelLoadError> {
    let json = std::fs::read_to_string(path).map_err(|e| ModelLoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_pipeline(name, &json, path)
}

/// Load every configured model. Relative paths resolve against `base_dir`.
pub fn load_ensemble(models: &[ModelEntry], base_dir: &Path) -> Result<Ensemble, ModelLoadError> {
    if models.is_empty() {
        return Err(ModelLoadError::Empty);
    }

    let mut pipelines = Vec::with_capacity(models.len());
    for entry in models {
        let path = base_dir.join(&entry.path);
        let pipeline = load_pipeline(&entry.name, &path)?;
        info!(
            "Loaded {} model `{}` from {}",
            pipeline.kind(),
            entry.name,
            path.display()
        );
        pipelines.push(pipeline);
    }

    Ok(Ensemble::new(pipelines))
}
