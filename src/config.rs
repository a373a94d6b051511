//! Model configuration: attribute schema, thread-safety declaration and pool tuning
//!
//! A [`ModelConfig`] is the persisted header that describes a model's input
//! attributes, which attribute it predicts, whether its implementation may be
//! shared across threads, and how its instance pool (when pooled) is sized.
//! Configurations are replaced wholesale on reconfiguration and never mutated
//! while a scorer built from them is live.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelMuxError, Result};
use crate::model::FeatureValue;

/// The kind of a model input attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeKind {
    /// A continuous numeric attribute.
    Numeric,
    /// A categorical attribute with a closed set of known values.
    Categorical { values: Vec<String> },
}

/// A named, typed input attribute of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(flatten)]
    pub kind: AttributeKind,
}

impl Attribute {
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Numeric,
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Categorical { values },
        }
    }
}

/// Sizing and eviction parameters for a pooled scorer's instance pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of idle instances pre-created at pool construction so the
    /// first callers do not pay clone/deserialization latency.
    pub min_idle: usize,
    /// Upper bound on idle instances kept after return; `None` is unbounded.
    pub max_idle: Option<usize>,
    /// Upper bound on instances alive at once (idle + on loan); `None` is
    /// unbounded.
    pub max_active: Option<usize>,
    /// How long a borrow may block waiting for a returned instance.
    /// `None` blocks indefinitely (the conservative default).
    pub max_wait_ms: Option<u64>,
    /// Idle instances older than this are discarded on the next borrow.
    pub evict_idle_after_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 0,
            max_idle: Some(8),
            max_active: Some(8),
            max_wait_ms: None,
            evict_idle_after_ms: None,
        }
    }
}

impl PoolConfig {
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    pub fn evict_idle_after(&self) -> Option<Duration> {
        self.evict_idle_after_ms.map(Duration::from_millis)
    }

    /// Number of instances to pre-create: min_idle bounded by max_idle and
    /// max_active.
    pub fn prewarm_count(&self) -> usize {
        let mut n = self.min_idle;
        if let Some(max_idle) = self.max_idle {
            n = n.min(max_idle);
        }
        if let Some(max_active) = self.max_active {
            n = n.min(max_active);
        }
        n
    }
}

/// Semantic description of a model: its input schema, predicted attribute,
/// thread-safety declaration and pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Ordered input attributes. Feature vectors follow this order.
    pub attributes: Vec<Attribute>,
    /// Index of the predicted attribute; `None` means the last attribute.
    #[serde(default)]
    pub class_index: Option<usize>,
    /// Whether the model implementation may be scored concurrently from a
    /// shared reference. This is a declared contract, never inferred: a model
    /// backed by non-reentrant internals (FFI handles, unsynchronized scratch
    /// buffers) must be declared `false` and will be accessed through an
    /// instance pool.
    #[serde(default)]
    pub thread_safe: bool,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Path to the serialized model artifact, when persisted.
    #[serde(default)]
    pub artifact: Option<PathBuf>,
    /// Free-form key/value properties.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ModelConfig {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self {
            attributes,
            class_index: None,
            thread_safe: false,
            pool: PoolConfig::default(),
            artifact: None,
            properties: HashMap::new(),
        }
    }

    /// Resolved index of the predicted attribute (defaults to the last one).
    pub fn class_index(&self) -> usize {
        self.class_index
            .unwrap_or_else(|| self.attributes.len().saturating_sub(1))
    }

    /// Number of classes the model predicts over.
    pub fn num_classes(&self) -> usize {
        match &self.attributes[self.class_index()].kind {
            AttributeKind::Categorical { values } => values.len(),
            AttributeKind::Numeric => 0,
        }
    }

    /// Check structural soundness: non-empty schema, class index in range and
    /// pointing at a categorical attribute.
    pub fn validate(&self) -> Result<()> {
        if self.attributes.is_empty() {
            return Err(ModelMuxError::Config(
                "model must have at least one attribute".to_string(),
            ));
        }
        let class_index = self.class_index();
        if class_index >= self.attributes.len() {
            return Err(ModelMuxError::Config(format!(
                "class index {} out of range for {} attributes",
                class_index,
                self.attributes.len()
            )));
        }
        match &self.attributes[class_index].kind {
            AttributeKind::Categorical { values } if !values.is_empty() => Ok(()),
            AttributeKind::Categorical { .. } => Err(ModelMuxError::Config(format!(
                "class attribute '{}' has no values",
                self.attributes[class_index].name
            ))),
            AttributeKind::Numeric => Err(ModelMuxError::Config(format!(
                "class attribute '{}' must be categorical",
                self.attributes[class_index].name
            ))),
        }
    }

    /// Validate a full-width feature vector against this schema and encode it
    /// for the model: numerics pass through, categorical symbols become their
    /// declared value index. The class slot is ignored and dropped.
    pub fn encode(&self, features: &[FeatureValue]) -> Result<Vec<f64>> {
        if self.attributes.is_empty() {
            return Err(ModelMuxError::ConfigMismatch(
                "model has no attributes".to_string(),
            ));
        }
        if features.len() != self.attributes.len() {
            return Err(ModelMuxError::ConfigMismatch(format!(
                "expected {} values (one per attribute), got {}",
                self.attributes.len(),
                features.len()
            )));
        }

        let class_index = self.class_index();
        let mut encoded = Vec::with_capacity(self.attributes.len() - 1);
        for (index, (attribute, value)) in self.attributes.iter().zip(features).enumerate() {
            if index == class_index {
                continue;
            }
            match (&attribute.kind, value) {
                (AttributeKind::Numeric, FeatureValue::Number(x)) if x.is_finite() => {
                    encoded.push(*x);
                }
                (AttributeKind::Numeric, FeatureValue::Number(_)) => {
                    return Err(ModelMuxError::ConfigMismatch(format!(
                        "attribute '{}' value is not finite",
                        attribute.name
                    )));
                }
                (AttributeKind::Numeric, FeatureValue::Symbol(s)) => {
                    return Err(ModelMuxError::ConfigMismatch(format!(
                        "attribute '{}' expects a number, got symbol '{}'",
                        attribute.name, s
                    )));
                }
                (AttributeKind::Categorical { values }, FeatureValue::Symbol(s)) => {
                    match values.iter().position(|v| v == s) {
                        Some(position) => encoded.push(position as f64),
                        None => {
                            return Err(ModelMuxError::ConfigMismatch(format!(
                                "attribute '{}' has no value '{}'",
                                attribute.name, s
                            )));
                        }
                    }
                }
                (AttributeKind::Categorical { .. }, FeatureValue::Number(x)) => {
                    return Err(ModelMuxError::ConfigMismatch(format!(
                        "attribute '{}' expects a symbol, got number {}",
                        attribute.name, x
                    )));
                }
            }
        }
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iris_like_config() -> ModelConfig {
        ModelConfig::new(vec![
            Attribute::numeric("petal_length"),
            Attribute::numeric("petal_width"),
            Attribute::categorical(
                "species",
                vec!["setosa".into(), "versicolor".into(), "virginica".into()],
            ),
        ])
    }

    #[test]
    fn test_class_index_defaults_to_last() {
        let config = iris_like_config();
        assert_eq!(config.class_index(), 2);
        assert_eq!(config.num_classes(), 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_numeric_class() {
        let mut config = iris_like_config();
        config.class_index = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ModelMuxError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_class_index() {
        let mut config = iris_like_config();
        config.class_index = Some(7);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encode_drops_class_slot() {
        let config = iris_like_config();
        let encoded = config
            .encode(&[
                FeatureValue::Number(1.4),
                FeatureValue::Number(0.2),
                FeatureValue::Symbol("setosa".into()),
            ])
            .unwrap();
        assert_eq!(encoded, vec![1.4, 0.2]);
    }

    #[test]
    fn test_encode_rejects_empty_schema() {
        let config = ModelConfig::new(Vec::new());
        assert!(matches!(
            config.encode(&[]),
            Err(ModelMuxError::ConfigMismatch(_))
        ));
    }

    #[test]
    fn test_encode_rejects_wrong_arity() {
        let config = iris_like_config();
        let err = config
            .encode(&[FeatureValue::Number(1.4)])
            .unwrap_err();
        assert!(matches!(err, ModelMuxError::ConfigMismatch(_)));
    }

    #[test]
    fn test_encode_rejects_unknown_symbol() {
        let mut config = iris_like_config();
        config.attributes.insert(
            0,
            Attribute::categorical("color", vec!["red".into(), "blue".into()]),
        );
        let err = config
            .encode(&[
                FeatureValue::Symbol("green".into()),
                FeatureValue::Number(1.4),
                FeatureValue::Number(0.2),
                FeatureValue::Symbol("setosa".into()),
            ])
            .unwrap_err();
        assert!(matches!(err, ModelMuxError::ConfigMismatch(_)));
    }

    #[test]
    fn test_encode_rejects_type_mismatch() {
        let config = iris_like_config();
        let err = config
            .encode(&[
                FeatureValue::Symbol("oops".into()),
                FeatureValue::Number(0.2),
                FeatureValue::Symbol("setosa".into()),
            ])
            .unwrap_err();
        assert!(matches!(err, ModelMuxError::ConfigMismatch(_)));
    }

    #[test]
    fn test_pool_config_prewarm_bounds() {
        let pool = PoolConfig {
            min_idle: 5,
            max_idle: Some(3),
            max_active: Some(4),
            ..PoolConfig::default()
        };
        assert_eq!(pool.prewarm_count(), 3);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = iris_like_config();
        let json = serde_json::to_string(&config).unwrap();
        let back: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.attributes, config.attributes);
        assert_eq!(back.class_index, None);
    }
}
