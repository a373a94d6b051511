//! Scorer: the concurrency wrapper around one model
//!
//! Two variants behind one trait, selected from the configuration's declared
//! thread-safety: [`DirectScorer`] shares a single model read-only across all
//! callers, [`PooledScorer`] multiplexes callers over a pool of clones of a
//! model whose scoring path must not be entered concurrently.

use std::sync::Arc;

use tracing::debug;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::model::{FeatureValue, Model};
use crate::pool::InstancePool;

/// The scoring capability bound to exactly one model.
pub trait Scorer: Send + Sync {
    /// Score a full-width feature vector (one value per configured
    /// attribute) into a distribution, one score per class.
    fn score(&self, features: &[FeatureValue]) -> Result<Vec<f64>>;

    /// Release any pooled resources. Idempotent, and safe on a scorer that
    /// was never used. In-flight `score` calls complete or fail with a
    /// defined error; they are never corrupted.
    fn close(&self);
}

/// Build the scorer variant declared by the configuration.
///
/// The choice is driven solely by `config.thread_safe`; it is a declared
/// contract, never inferred from the model.
pub fn build_scorer(config: &ModelConfig, model: Box<dyn Model>) -> Result<Arc<dyn Scorer>> {
    config.validate()?;
    if config.thread_safe {
        debug!(variant = "direct", "building scorer");
        Ok(Arc::new(DirectScorer {
            config: config.clone(),
            model: Arc::from(model),
        }))
    } else {
        debug!(variant = "pooled", "building scorer");
        Ok(Arc::new(PooledScorer::new(config.clone(), model)?))
    }
}

/// Scorer for a model declared thread-safe: one shared instance, no
/// synchronization on the scoring path.
pub struct DirectScorer {
    config: ModelConfig,
    model: Arc<dyn Model>,
}

impl Scorer for DirectScorer {
    fn score(&self, features: &[FeatureValue]) -> Result<Vec<f64>> {
        let encoded = self.config.encode(features)?;
        self.model.score(&encoded)
    }

    fn close(&self) {}
}

/// Scorer for a model that must not be scored concurrently: each call
/// borrows a clone for exclusive use and the RAII handle returns it on every
/// exit path, success or failure.
pub struct PooledScorer {
    config: ModelConfig,
    pool: Arc<InstancePool<Box<dyn Model>>>,
}

impl PooledScorer {
    pub fn new(config: ModelConfig, prototype: Box<dyn Model>) -> Result<Self> {
        let factory = Box::new(move || prototype.try_clone());
        let pool = InstancePool::new(factory, config.pool.clone())?;
        Ok(Self { config, pool })
    }

    /// The underlying pool, for inspection.
    pub fn pool(&self) -> &Arc<InstancePool<Box<dyn Model>>> {
        &self.pool
    }
}

impl Scorer for PooledScorer {
    fn score(&self, features: &[FeatureValue]) -> Result<Vec<f64>> {
        // Validate before borrowing so config errors never consume a slot.
        let encoded = self.config.encode(features)?;
        let instance = self.pool.borrow()?;
        instance.score(&encoded)
    }

    fn close(&self) {
        self.pool.close();
    }
}
