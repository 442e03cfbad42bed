//! Key-value persistence for session state.
//!
//! The session store never talks to a storage medium directly; it goes
//! through the `KeyValueStore` trait so the same session logic can persist to
//! a JSON file in the cache directory, the OS keychain, or memory.
//!
//! Values are plain strings. Structured values (the user profile) are
//! serialized to JSON by the caller.

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;
use tracing::warn;

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// A single mutation applied by `KeyValueStore::apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set(String, String),
    Remove(String),
}

impl StoreOp {
    pub fn set(key: &str, value: impl Into<String>) -> Self {
        StoreOp::Set(key.to_string(), value.into())
    }

    pub fn remove(key: &str) -> Self {
        StoreOp::Remove(key.to_string())
    }
}

pub trait KeyValueStore: Send + Sync {
    /// Read a value, `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Apply a batch of mutations in order, all or nothing.
    ///
    /// The default writes key by key and, if one step fails, puts back the
    /// previous values of the keys already touched before returning the
    /// error. Backends that can write the whole batch at once (the file
    /// store) override this so a session update lands in a single write.
    fn apply(&self, ops: &[StoreOp]) -> Result<()> {
        let mut previous: Vec<(&str, Option<String>)> = Vec::with_capacity(ops.len());

        for op in ops {
            let key = match op {
                StoreOp::Set(key, _) | StoreOp::Remove(key) => key.as_str(),
            };
            let step = self.get(key).and_then(|before| {
                match op {
                    StoreOp::Set(_, value) => self.set(key, value)?,
                    StoreOp::Remove(_) => self.remove(key)?,
                }
                previous.push((key, before));
                Ok(())
            });

            if let Err(e) = step {
                rollback(self, previous);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Restore earlier values, newest first. Failures here are logged only.
fn rollback<S: KeyValueStore + ?Sized>(store: &S, previous: Vec<(&str, Option<String>)>) {
    for (key, before) in previous.into_iter().rev() {
        let restored = match before {
            Some(ref value) => store.set(key, value),
            None => store.remove(key),
        };
        if let Err(e) = restored {
            warn!(key, error = %e, "Failed to roll back storage key");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Memory store that refuses to write one particular key
    struct FlakyStore {
        inner: MemoryStore,
        refused: &'static str,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == self.refused {
                anyhow::bail!("write refused for {}", key);
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_failed_batch_restores_earlier_keys() {
        let store = FlakyStore {
            inner: MemoryStore::with_entries([
                ("accessToken", "a1"),
                ("refreshToken", "r1"),
                ("token", "legacy"),
            ]),
            refused: "refreshToken",
        };

        let err = store
            .apply(&[
                StoreOp::set("accessToken", "a2"),
                StoreOp::set("refreshToken", "r2"),
                StoreOp::remove("token"),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("refreshToken"));

        assert_eq!(store.get("accessToken").unwrap().as_deref(), Some("a1"));
        assert_eq!(store.get("refreshToken").unwrap().as_deref(), Some("r1"));
        assert_eq!(store.get("token").unwrap().as_deref(), Some("legacy"));
    }

    #[test]
    fn test_rollback_removes_keys_that_did_not_exist() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            refused: "user",
        };

        store
            .apply(&[StoreOp::set("accessToken", "a1"), StoreOp::set("user", "{}")])
            .unwrap_err();
        assert!(store.inner.is_empty());
    }
}
