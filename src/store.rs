//! On-disk copy of the active model set.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::ensemble::ModelSet;
use crate::error::Result;

const MODEL_SET_FILE: &str = "model_set.json";

#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(MODEL_SET_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Writes the set to a fresh temp file in the store directory, then renames it
    /// into place. Readers see either the old set or the new one.
    pub fn save(&self, set: &ModelSet) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path();
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, set)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        info!(path = %path.display(), version = set.version, "saved model set");
        Ok(path)
    }

    /// `None` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<ModelSet>> {
        let path = self.path();
        if !path.is_file() {
            return Ok(None);
        }
        let set = read_model_set(&path)?;
        info!(path = %path.display(), version = set.version, "loaded model set");
        Ok(Some(set))
    }

    /// One past the stored version. An unreadable store is logged and counts as empty.
    pub fn next_version(&self) -> u64 {
        match self.load() {
            Ok(Some(previous)) => previous.version + 1,
            Ok(None) => 1,
            Err(e) => {
                warn!(error = %e, path = %self.path().display(), "stored model set is unreadable");
                1
            }
        }
    }
}

fn read_model_set(path: &Path) -> Result<ModelSet> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
