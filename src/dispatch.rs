//! Scatter/gather scoring dispatcher
//!
//! Executes a scoring request against one or many models or inputs over a
//! bounded worker pool, gathering results in the caller's input order
//! regardless of completion order. Single-unit requests run inline so they
//! keep synchronous latency and failure semantics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ModelMuxError, Result};
use crate::model::FeatureValue;
use crate::registry::ScorerRegistry;
use crate::scorer::Scorer;

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringStats {
    pub total_units: u64,
    pub total_errors: u64,
    pub avg_unit_latency_ms: f64,
}

/// Scatter/gather scheduler over a fixed-size worker pool.
pub struct Dispatcher {
    registry: Arc<ScorerRegistry>,
    workers: rayon::ThreadPool,

    total_units: AtomicU64,
    total_errors: AtomicU64,
    total_unit_nanos: AtomicU64,
}

impl Dispatcher {
    /// Build a dispatcher with a fixed number of worker threads. Submitting
    /// more concurrent batches than the pool can serve queues work, it does
    /// not reject it.
    pub fn new(registry: Arc<ScorerRegistry>, workers: usize) -> Result<Self> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("mux-score-{index}"))
            .build()
            .map_err(|e| ModelMuxError::Config(format!("could not build worker pool: {e}")))?;

        Ok(Self {
            registry,
            workers,
            total_units: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_unit_nanos: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &Arc<ScorerRegistry> {
        &self.registry
    }

    /// Score one feature vector against one model.
    pub fn score_one(&self, id: Uuid, features: &[FeatureValue]) -> Result<Vec<f64>> {
        let scorer = self.registry.get(id)?;
        self.run_unit(&scorer, features)
    }

    /// Score one feature vector against many models; `result[i]` belongs to
    /// `ids[i]`. Any failing unit fails the whole batch.
    pub fn score_models(
        &self,
        ids: &[Uuid],
        features: &[FeatureValue],
    ) -> Result<Vec<Vec<f64>>> {
        // Resolve every id up front so an unknown model fails the batch
        // before any unit is scored.
        let scorers: Vec<Arc<dyn Scorer>> = ids
            .iter()
            .map(|id| self.registry.get(*id))
            .collect::<Result<_>>()?;

        match scorers.len() {
            0 => Ok(Vec::new()),
            1 => Ok(vec![self.run_unit(&scorers[0], features)?]),
            _ => self.workers.install(|| {
                scorers
                    .par_iter()
                    .map(|scorer| self.run_unit(scorer, features))
                    .collect::<Result<Vec<_>>>()
            }),
        }
    }

    /// Score many feature vectors against one model; `result[i]` belongs to
    /// `instances[i]`. Any failing unit fails the whole batch.
    pub fn score_batch(
        &self,
        id: Uuid,
        instances: &[Vec<FeatureValue>],
    ) -> Result<Vec<Vec<f64>>> {
        let scorer = self.registry.get(id)?;

        match instances.len() {
            0 => Ok(Vec::new()),
            1 => Ok(vec![self.run_unit(&scorer, &instances[0])?]),
            _ => self.workers.install(|| {
                instances
                    .par_iter()
                    .map(|features| self.run_unit(&scorer, features))
                    .collect::<Result<Vec<_>>>()
            }),
        }
    }

    pub fn stats(&self) -> ScoringStats {
        let units = self.total_units.load(Ordering::Relaxed);
        let nanos = self.total_unit_nanos.load(Ordering::Relaxed);
        ScoringStats {
            total_units: units,
            total_errors: self.total_errors.load(Ordering::Relaxed),
            avg_unit_latency_ms: if units > 0 {
                (nanos as f64 / units as f64) / 1_000_000.0
            } else {
                0.0
            },
        }
    }

    fn run_unit(&self, scorer: &Arc<dyn Scorer>, features: &[FeatureValue]) -> Result<Vec<f64>> {
        let start = Instant::now();
        match scorer.score(features) {
            Ok(distribution) => {
                self.total_units.fetch_add(1, Ordering::Relaxed);
                self.total_unit_nanos
                    .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
                Ok(distribution)
            }
            Err(e) => {
                self.total_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}
