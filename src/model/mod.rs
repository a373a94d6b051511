//! The opaque model boundary
//!
//! The engine treats a trained classifier as an opaque capability: it can
//! score an encoded feature vector into a distribution and produce an
//! interchangeable clone of itself. How a model is trained or serialized is
//! outside this crate's core; [`factory`] holds the construction boundary.

mod factory;

pub use factory::{CentroidModel, ModelFactory, SerializedModelFactory};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single feature value on the wire and at the API boundary: either a
/// number or a categorical symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Symbol(String),
}

/// An opaque trained classifier.
///
/// `Send + Sync` bounds make a model shareable at the type level, but whether
/// its `score` is actually safe to call concurrently is a *declared* property
/// of its [`ModelConfig`](crate::config::ModelConfig) (`thread_safe`), never
/// inferred. Implementations whose scoring path is not reentrant (FFI
/// sessions, unsynchronized scratch state behind interior mutability) must be
/// declared `thread_safe = false`; the engine then serializes access to each
/// instance through a pool of clones.
pub trait Model: Send + Sync {
    /// Score one encoded feature vector into a distribution, one value per
    /// class. Must fail rather than return a partial or zeroed distribution.
    fn score(&self, features: &[f64]) -> Result<Vec<f64>>;

    /// Produce an interchangeable clone of this model. May be expensive
    /// (deep copy or re-deserialization); pools pay this cost at warm-up, not
    /// on the scoring hot path.
    fn try_clone(&self) -> Result<Box<dyn Model>>;
}
