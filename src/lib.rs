//! modelmux - Concurrent model scoring engine
//!
//! Hosts many scoring models behind one process: each model is registered
//! with a configuration describing its feature space and concurrency
//! contract, wrapped in the matching scorer, and served over a framed TCP
//! endpoint. Models can be added, reconfigured, and removed while scoring
//! traffic is live.
//!
//! # Modules
//!
//! ## Scoring Engine
//! - [`model`] - Model trait, factory boundary, feature values
//! - [`scorer`] - Direct and pooled scoring wrappers
//! - [`pool`] - Bounded instance pool with RAII loans
//! - [`dispatch`] - Scatter/gather execution over a worker pool
//!
//! ## Lifecycle
//! - [`registry`] - Hot-swap identifier-to-scorer map
//! - [`manager`] - Add/reconfigure/remove lifecycle with persistence
//! - [`persist`] - Header files mirroring registered models to disk
//!
//! ## Services
//! - [`server`] - Framed TCP scoring endpoint
//!
//! ## Foundation
//! - [`config`] - Attribute and pool configuration
//! - [`error`] - Error taxonomy

pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod model;
pub mod persist;
pub mod pool;
pub mod registry;
pub mod scorer;
pub mod server;

pub use error::{ModelMuxError, Result};

/// Common imports for embedding the engine.
pub mod prelude {
    pub use crate::config::{Attribute, AttributeKind, ModelConfig, PoolConfig};
    pub use crate::dispatch::Dispatcher;
    pub use crate::error::{ModelMuxError, Result};
    pub use crate::manager::ModelManager;
    pub use crate::model::{FeatureValue, Model, ModelFactory, SerializedModelFactory};
    pub use crate::persist::HeaderStore;
    pub use crate::registry::ScorerRegistry;
    pub use crate::scorer::{build_scorer, Scorer};
    pub use crate::server::{ConnectionServer, ServerConfig};
}
