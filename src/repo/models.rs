//! Model store: one artifact per (farm, horizon)
//!
//! Writes are idempotent overwrites; a retrain replaces the previous
//! artifact for its key. File writes go through a temp file and a rename so
//! readers never see a half-written model.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::file::file_stem;
use crate::error::PipelineError;
use crate::ml::{HorizonModel, ModelKey, ModelSet};

pub trait ModelStore: Send + Sync {
    fn save(&self, model: &HorizonModel) -> Result<()>;

    fn load(&self, key: &ModelKey) -> Result<Option<HorizonModel>>;

    /// Every readable model. Corrupt artifacts are logged and skipped.
    fn load_all(&self) -> Result<ModelSet>;
}

fn encode(model: &HorizonModel) -> Result<Vec<u8>> {
    bincode::serialize(model)
        .map_err(|e| PipelineError::ModelStore(format!("serialize {}: {e}", model.key())).into())
}

fn decode(bytes: &[u8], origin: &str) -> Result<HorizonModel> {
    bincode::deserialize(bytes)
        .map_err(|e| PipelineError::ModelStore(format!("deserialize {origin}: {e}")).into())
}

/// Directory of bincode artifacts named `<farm>__h<horizon>.bin`
#[derive(Debug, Clone)]
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub const EXTENSION: &'static str = "bin";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &ModelKey) -> PathBuf {
        self.dir.join(format!(
            "{}__h{}.{}",
            file_stem(&key.farm),
            key.horizon_hours,
            Self::EXTENSION
        ))
    }
}

impl ModelStore for FileModelStore {
    fn save(&self, model: &HorizonModel) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create model dir {}", self.dir.display()))?;

        let bytes = encode(model)?;
        let path = self.path_for(model.key());
        let tmp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, &bytes).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("replace {}", path.display()))?;

        info!(model = %model.key(), path = %path.display(), bytes = bytes.len(), "model persisted");
        Ok(())
    }

    fn load(&self, key: &ModelKey) -> Result<Option<HorizonModel>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let model = decode(&bytes, &path.display().to_string())?;
        if model.key() != key {
            return Err(PipelineError::ModelStore(format!(
                "{} holds model {}, expected {key}",
                path.display(),
                model.key()
            ))
            .into());
        }
        Ok(Some(model))
    }

    fn load_all(&self) -> Result<ModelSet> {
        let mut set = ModelSet::new();
        if !self.dir.exists() {
            warn!(dir = %self.dir.display(), "model directory does not exist");
            return Ok(set);
        }

        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("list {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(Self::EXTENSION) {
                continue;
            }
            let loaded = std::fs::read(&path)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| decode(&bytes, &path.display().to_string()))
                .and_then(|model| {
                    if self.path_for(model.key()) == path {
                        Ok(model)
                    } else {
                        Err(PipelineError::ModelStore(format!("artifact holds model {}", model.key())).into())
                    }
                });
            match loaded {
                Ok(model) => set.insert(model),
                Err(e) => error!(path = %path.display(), error = %e, "skipping unreadable model artifact"),
            }
        }

        info!(models = set.len(), dir = %self.dir.display(), "models loaded");
        Ok(set)
    }
}

/// Model store keeping serialized artifacts in memory
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    artifacts: Mutex<BTreeMap<ModelKey, Vec<u8>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<ModelKey> {
        self.artifacts.lock().keys().cloned().collect()
    }

    /// Overwrite an artifact with raw bytes
    pub fn put_raw(&self, key: ModelKey, bytes: Vec<u8>) {
        self.artifacts.lock().insert(key, bytes);
    }
}

impl ModelStore for InMemoryModelStore {
    fn save(&self, model: &HorizonModel) -> Result<()> {
        let bytes = encode(model)?;
        self.artifacts.lock().insert(model.key().clone(), bytes);
        Ok(())
    }

    fn load(&self, key: &ModelKey) -> Result<Option<HorizonModel>> {
        let artifacts = self.artifacts.lock();
        artifacts
            .get(key)
            .map(|bytes| decode(bytes, &key.to_string()))
            .transpose()
    }

    fn load_all(&self) -> Result<ModelSet> {
        let mut set = ModelSet::new();
        for (key, bytes) in self.artifacts.lock().iter() {
            match decode(bytes, &key.to_string()) {
                Ok(model) => set.insert(model),
                Err(e) => error!(model = %key, error = %e, "skipping unreadable model artifact"),
            }
        }
        Ok(set)
    }
}
