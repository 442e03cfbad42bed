use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{KeyValueStore, StoreOp};

/// Session file name in the cache directory
pub const SESSION_FILE: &str = "session.json";

/// Stores every key in one JSON object on disk.
///
/// Writes go to a temporary sibling file which is then renamed over the
/// session file, so a crash mid-write leaves either the old or the new
/// contents. When the last key is removed the file itself is deleted, which
/// makes a logged-out store indistinguishable from one that was never used.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store backed by `session.json` inside `cache_dir`
    pub fn in_dir(cache_dir: &Path) -> Self {
        Self::new(cache_dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file: {}", self.path.display()))?;

        match serde_json::from_str(&contents) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // A corrupt file is the same as no stored session
                warn!(path = %self.path.display(), error = %e, "Ignoring unparseable session file");
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).with_context(|| {
                    format!("Failed to remove session file: {}", self.path.display())
                })?;
                debug!(path = %self.path.display(), "Removed empty session file");
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write session file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace session file: {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.apply(&[StoreOp::set(key, value)])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.apply(&[StoreOp::remove(key)])
    }

    fn apply(&self, ops: &[StoreOp]) -> Result<()> {
        let mut entries = self.read_all()?;
        for op in ops {
            match op {
                StoreOp::Set(key, value) => {
                    entries.insert(key.clone(), value.clone());
                }
                StoreOp::Remove(key) => {
                    entries.remove(key);
                }
            }
        }
        self.write_all(&entries)
    }
}
