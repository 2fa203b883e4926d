//! Target configuration persistence
//!
//! The whole target list is read and written as one record. Writes go to a
//! temporary sibling first and are renamed into place.

use crate::error::{Error, Result};
use crate::types::TargetConfig;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "watchers.json";

/// Durable record of the desired target list.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Vec<TargetConfig>>;
    fn save(&self, targets: &[TargetConfig]) -> Result<()>;
}

/// `watchers.json`-style store: a pretty-printed JSON array.
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<Vec<TargetConfig>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::ConfigLoad(format!("{}: {}", self.path.display(), e))),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, targets: &[TargetConfig]) -> Result<()> {
        let json = serde_json::to_string_pretty(targets).map_err(Error::config_persist)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(Error::config_persist)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(Error::config_persist)?;
        std::fs::rename(&tmp, &self.path).map_err(Error::config_persist)?;
        debug!("Saved {} targets to {}", targets.len(), self.path.display());
        Ok(())
    }
}

/// Volatile store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryConfigStore {
    targets: Mutex<Vec<TargetConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: Vec<TargetConfig>) -> Self {
        Self { targets: Mutex::new(targets) }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<TargetConfig>>> {
        self.targets
            .lock()
            .map_err(|_| Error::Internal("config store lock poisoned".into()))
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Vec<TargetConfig>> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, targets: &[TargetConfig]) -> Result<()> {
        *self.lock()? = targets.to_vec();
        Ok(())
    }
}
