//! Model construction boundary
//!
//! A [`ModelFactory`] turns a configuration plus a serialized artifact into a
//! live [`Model`]. The engine consumes this as an opaque capability and never
//! interprets artifact bytes itself.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{ModelMuxError, Result};
use crate::model::Model;

/// Builds models from persisted artifacts.
pub trait ModelFactory: Send + Sync {
    /// Build a model from the artifact path recorded in the configuration.
    fn build(&self, config: &ModelConfig) -> Result<Box<dyn Model>>;

    /// Build a model directly from artifact bytes.
    fn build_from_bytes(&self, config: &ModelConfig, bytes: &[u8]) -> Result<Box<dyn Model>>;
}

/// Factory for JSON-serialized [`CentroidModel`] artifacts.
pub struct SerializedModelFactory;

impl ModelFactory for SerializedModelFactory {
    fn build(&self, config: &ModelConfig) -> Result<Box<dyn Model>> {
        let path = config.artifact.as_ref().ok_or_else(|| {
            ModelMuxError::Config("model configuration has no artifact path".to_string())
        })?;
        let bytes = std::fs::read(path)?;
        debug!(path = %path.display(), size = bytes.len(), "read model artifact");
        self.build_from_bytes(config, &bytes)
    }

    fn build_from_bytes(&self, config: &ModelConfig, bytes: &[u8]) -> Result<Box<dyn Model>> {
        let model: CentroidModel = serde_json::from_slice(bytes)?;
        if model.centroids.len() != config.num_classes() {
            return Err(ModelMuxError::Config(format!(
                "artifact has {} centroids but configuration declares {} classes",
                model.centroids.len(),
                config.num_classes()
            )));
        }
        Ok(Box::new(model))
    }
}

/// Nearest-centroid classifier: one centroid per class in encoded feature
/// space. Scores are inverse-distance weights normalized to sum to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidModel {
    pub centroids: Vec<Vec<f64>>,
}

impl CentroidModel {
    pub fn new(centroids: Vec<Vec<f64>>) -> Result<Self> {
        if centroids.is_empty() {
            return Err(ModelMuxError::Config(
                "centroid model needs at least one class centroid".to_string(),
            ));
        }
        let width = centroids[0].len();
        if centroids.iter().any(|c| c.len() != width) {
            return Err(ModelMuxError::Config(
                "all centroids must have the same dimension".to_string(),
            ));
        }
        Ok(Self { centroids })
    }

    pub fn to_artifact_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Model for CentroidModel {
    fn score(&self, features: &[f64]) -> Result<Vec<f64>> {
        let width = self.centroids[0].len();
        if features.len() != width {
            return Err(ModelMuxError::Scoring(format!(
                "expected {} features, got {}",
                width,
                features.len()
            )));
        }

        let weights: Vec<f64> = self
            .centroids
            .iter()
            .map(|centroid| {
                let squared: f64 = centroid
                    .iter()
                    .zip(features)
                    .map(|(c, x)| (c - x) * (c - x))
                    .sum();
                1.0 / (squared.sqrt() + 1e-9)
            })
            .collect();

        let total: f64 = weights.iter().sum();
        Ok(weights.iter().map(|w| w / total).collect())
    }

    fn try_clone(&self) -> Result<Box<dyn Model>> {
        Ok(Box::new(self.clone()))
    }
}
