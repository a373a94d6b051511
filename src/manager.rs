//! Model lifecycle management
//!
//! The [`ModelManager`] owns the full add/reconfigure/remove lifecycle: it
//! builds scorers through the factory, installs them in the registry, closes
//! whatever they displaced, and mirrors every change to the header store.
//! Persistence failures after a successful registry update are logged, not
//! propagated: the in-memory state is authoritative for the running process.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ModelConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ModelMuxError, Result};
use crate::model::ModelFactory;
use crate::persist::{Header, HeaderStore};
use crate::registry::ScorerRegistry;

pub const ARTIFACT_EXTENSION: &str = "model";

/// Property key that pins a model to a caller-chosen identifier.
pub const ID_PROPERTY: &str = "id";

pub struct ModelManager {
    registry: Arc<ScorerRegistry>,
    dispatcher: Arc<Dispatcher>,
    factory: Arc<dyn ModelFactory>,
    store: HeaderStore,
    configs: Mutex<HashMap<Uuid, ModelConfig>>,
}

impl ModelManager {
    /// Open a manager over a header directory, restoring every model whose
    /// header loads and builds. A model that fails to build is logged and
    /// skipped so one broken artifact cannot block startup.
    pub fn open(
        store: HeaderStore,
        factory: Arc<dyn ModelFactory>,
        workers: usize,
    ) -> Result<Self> {
        let registry = Arc::new(ScorerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), workers)?);
        let manager = Self {
            registry,
            dispatcher,
            factory,
            store,
            configs: Mutex::new(HashMap::new()),
        };

        for header in manager.store.load_all() {
            match manager.install(header.id, header.config.clone(), None) {
                Ok(()) => info!(id = %header.id, "restored model"),
                Err(e) => {
                    error!(id = %header.id, error = %e, "could not restore model, skipping")
                }
            }
        }
        Ok(manager)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<ScorerRegistry> {
        &self.registry
    }

    /// Register a new model from its configuration and raw artifact bytes.
    /// The artifact is written under the managed directory and the header is
    /// persisted. Returns the model's identifier, taken from the `id`
    /// property when present, freshly generated otherwise.
    pub fn add_model(&self, mut config: ModelConfig, artifact: &[u8]) -> Result<Uuid> {
        let id = self.reserve_id(&config)?;
        let installed = (|| {
            let path = self
                .store
                .dir()
                .join(format!("{id}.{ARTIFACT_EXTENSION}"));
            fs::write(&path, artifact)?;
            config.artifact = Some(path);
            self.install(id, config.clone(), Some(artifact))
        })();
        if let Err(e) = installed {
            self.configs.lock().remove(&id);
            return Err(e);
        }

        self.persist(id, &config);
        info!(id = %id, "added model");
        Ok(id)
    }

    /// Register a new model whose configuration already points at an
    /// artifact on disk.
    pub fn add_model_from_config(&self, config: ModelConfig) -> Result<Uuid> {
        let id = self.reserve_id(&config)?;
        if let Err(e) = self.install(id, config.clone(), None) {
            self.configs.lock().remove(&id);
            return Err(e);
        }
        self.persist(id, &config);
        info!(id = %id, "added model");
        Ok(id)
    }

    /// Replace the configuration (and optionally the artifact) of a
    /// registered model. The swap is atomic from the scorers' point of view:
    /// in-flight calls finish against the old scorer, new calls see the new
    /// one, and nobody observes a window with no model.
    pub fn reconfigure_model(
        &self,
        id: Uuid,
        mut config: ModelConfig,
        artifact: Option<&[u8]>,
    ) -> Result<()> {
        let previous = self
            .configs
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ModelMuxError::ModelNotFound(id))?;

        match artifact {
            Some(bytes) => {
                let path = self
                    .store
                    .dir()
                    .join(format!("{id}.{ARTIFACT_EXTENSION}"));
                fs::write(&path, bytes)?;
                config.artifact = Some(path);
            }
            None => {
                // Keep scoring the artifact already on disk.
                config.artifact = previous.artifact.clone();
            }
        }

        self.install(id, config.clone(), artifact)?;
        self.persist(id, &config);
        info!(id = %id, "reconfigured model");
        Ok(())
    }

    /// Unregister a model and delete its persisted state. Removing an
    /// unknown model is logged and ignored.
    pub fn remove_model(&self, id: Uuid) -> Result<()> {
        let config = self.configs.lock().remove(&id);
        match self.registry.remove(id) {
            Some(scorer) => scorer.close(),
            None => {
                warn!(id = %id, "remove requested for unknown model");
                return Ok(());
            }
        }
        if let Some(config) = config {
            if let Err(e) = self.store.remove(id, &config) {
                error!(id = %id, error = %e, "could not delete persisted model state");
            }
        }
        info!(id = %id, "removed model");
        Ok(())
    }

    /// Copy a model's artifact to a caller-chosen destination.
    pub fn save_model(&self, id: Uuid, dest: &Path) -> Result<()> {
        let config = self
            .configs
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ModelMuxError::ModelNotFound(id))?;
        let artifact = config.artifact.as_ref().ok_or_else(|| {
            ModelMuxError::Persistence(format!("model {id} has no artifact on disk"))
        })?;
        fs::copy(artifact, dest)?;
        info!(id = %id, dest = %dest.display(), "exported model artifact");
        Ok(())
    }

    /// Snapshot of every registered model and its configuration.
    pub fn list_models(&self) -> Vec<(Uuid, ModelConfig)> {
        self.configs
            .lock()
            .iter()
            .map(|(id, config)| (*id, config.clone()))
            .collect()
    }

    /// Close every scorer and stop serving. Idempotent.
    pub fn close(&self) {
        self.configs.lock().clear();
        for (id, scorer) in self.registry.drain() {
            scorer.close();
            info!(id = %id, "closed model");
        }
    }

    /// Build a scorer for `config`, swap it in, and close whatever it
    /// displaced. The scorer is fully built before the registry is touched,
    /// so a factory failure leaves the previous model serving.
    fn install(&self, id: Uuid, config: ModelConfig, artifact: Option<&[u8]>) -> Result<()> {
        config.validate()?;
        let model = match artifact {
            Some(bytes) => self.factory.build_from_bytes(&config, bytes)?,
            None => self.factory.build(&config)?,
        };
        let scorer = crate::scorer::build_scorer(&config, model)?;

        self.configs.lock().insert(id, config);
        if let Some(displaced) = self.registry.put(id, scorer) {
            displaced.close();
        }
        Ok(())
    }

    /// Resolve the model's identifier and reserve it in the entry map in one
    /// critical section, so two concurrent adds with the same pinned id
    /// cannot both pass the existence check. The caller rolls the
    /// reservation back if installation fails.
    fn reserve_id(&self, config: &ModelConfig) -> Result<Uuid> {
        let id = match config.properties.get(ID_PROPERTY) {
            Some(raw) => raw
                .parse()
                .map_err(|_| ModelMuxError::Config(format!("invalid model id {raw:?}")))?,
            None => Uuid::new_v4(),
        };
        let mut configs = self.configs.lock();
        if configs.contains_key(&id) {
            return Err(ModelMuxError::Config(format!(
                "model {id} is already registered"
            )));
        }
        configs.insert(id, config.clone());
        Ok(id)
    }

    fn persist(&self, id: Uuid, config: &ModelConfig) {
        if let Err(e) = self.store.save(&Header::new(id, config.clone())) {
            error!(id = %id, error = %e, "could not persist model header");
        }
    }
}
