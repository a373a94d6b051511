//! Model header persistence
//!
//! Each registered model is mirrored to disk as a `<uuid>.header` JSON file
//! holding its identifier, configuration, and save timestamp. Startup reads
//! the whole directory back; a corrupt or duplicated header is logged and
//! skipped, never fatal, so one bad file cannot take down the fleet.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::ModelConfig;
use crate::error::{ModelMuxError, Result};

pub const HEADER_EXTENSION: &str = "header";

/// On-disk record for one registered model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub config: ModelConfig,
}

impl Header {
    pub fn new(id: Uuid, config: ModelConfig) -> Self {
        Self {
            id,
            saved_at: Utc::now(),
            config,
        }
    }
}

/// Directory-backed store of model headers.
pub struct HeaderStore {
    dir: PathBuf,
}

impl HeaderStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn header_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.{HEADER_EXTENSION}"))
    }

    /// Write (or overwrite) the header for one model.
    pub fn save(&self, header: &Header) -> Result<()> {
        let path = self.header_path(header.id);
        let json = serde_json::to_vec_pretty(header)?;
        fs::write(&path, json)?;
        debug!(id = %header.id, path = %path.display(), "saved model header");
        Ok(())
    }

    /// Delete the header for one model, plus its artifact when the artifact
    /// lives inside the managed directory. Artifacts elsewhere belong to the
    /// caller and are left alone.
    pub fn remove(&self, id: Uuid, config: &ModelConfig) -> Result<()> {
        let path = self.header_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(id = %id, "removed model header");
        }
        if let Some(artifact) = &config.artifact {
            if artifact.starts_with(&self.dir) && artifact.exists() {
                fs::remove_file(artifact)?;
                debug!(id = %id, path = %artifact.display(), "removed model artifact");
            }
        }
        Ok(())
    }

    /// Read every header in the directory. Never fails as a whole: unreadable
    /// files, malformed JSON, and duplicated identifiers are logged and
    /// skipped.
    pub fn load_all(&self) -> Vec<Header> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(dir = %self.dir.display(), error = %e, "could not read header directory");
                return Vec::new();
            }
        };

        let mut headers: HashMap<Uuid, Header> = HashMap::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some(HEADER_EXTENSION) {
                continue;
            }
            match self.load_one(&path) {
                Ok(header) => {
                    if let Some(existing) = headers.get(&header.id) {
                        warn!(
                            id = %header.id,
                            kept = %existing.saved_at,
                            skipped = %path.display(),
                            "duplicate model id in header directory, skipping"
                        );
                        continue;
                    }
                    headers.insert(header.id, header);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "skipping unloadable header");
                }
            }
        }

        let mut loaded: Vec<Header> = headers.into_values().collect();
        loaded.sort_by_key(|header| header.saved_at);
        loaded
    }

    fn load_one(&self, path: &Path) -> Result<Header> {
        let bytes = fs::read(path)?;
        let header: Header = serde_json::from_slice(&bytes)?;
        let stem = path.file_stem().and_then(|stem| stem.to_str());
        if stem != Some(header.id.to_string().as_str()) {
            return Err(ModelMuxError::Persistence(format!(
                "header file {} names model {}",
                path.display(),
                header.id
            )));
        }
        Ok(header)
    }
}
