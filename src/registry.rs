//! Hot-swap registry of live scorers
//!
//! One fair read-write lock guards the whole identifier-to-scorer map. Reads
//! clone the `Arc` and release immediately; writes do nothing but the map
//! swap inside the critical section, so write latency is bounded and readers
//! are paused only for a pointer swap. The displaced scorer is handed back to
//! the caller, who closes it *after* releasing the lock — closing a pooled
//! scorer can block on a graceful pool shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{ModelMuxError, Result};
use crate::scorer::Scorer;

#[derive(Default)]
pub struct ScorerRegistry {
    scorers: RwLock<HashMap<Uuid, Arc<dyn Scorer>>>,
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the current scorer for a model. The returned `Arc` stays valid
    /// after the lock is released; its internal state is independently
    /// synchronized.
    pub fn get(&self, id: Uuid) -> Result<Arc<dyn Scorer>> {
        self.scorers
            .read()
            .get(&id)
            .cloned()
            .ok_or(ModelMuxError::ModelNotFound(id))
    }

    /// Atomically install a scorer, returning whatever was previously mapped
    /// so the caller can close it outside the lock.
    #[must_use = "the displaced scorer must be closed by the caller"]
    pub fn put(&self, id: Uuid, scorer: Arc<dyn Scorer>) -> Option<Arc<dyn Scorer>> {
        // Quick switch: nothing but the map write in the critical section.
        self.scorers.write().insert(id, scorer)
    }

    /// Atomically remove a scorer, returning it for the caller to close.
    #[must_use = "the displaced scorer must be closed by the caller"]
    pub fn remove(&self, id: Uuid) -> Option<Arc<dyn Scorer>> {
        self.scorers.write().remove(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.scorers.read().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.scorers.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.scorers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.read().is_empty()
    }

    /// Remove every entry in one swap, returning them for the caller to
    /// close outside the lock.
    pub fn drain(&self) -> Vec<(Uuid, Arc<dyn Scorer>)> {
        self.scorers.write().drain().collect()
    }
}
