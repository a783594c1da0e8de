//! Usage: JSON-file key-value store backing credential persistence.
//!
//! One flat JSON object on disk, write-through on every mutation so a read
//! immediately after a write always observes it. Writes go through a temp file
//! and an atomic rename; the file is chmod 0600 on unix because it can hold a
//! plaintext token when platform encryption is unavailable.

use crate::shared::error::{AuthError, AuthResult};
use crate::shared::mutex_ext::MutexExt;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub(crate) struct KvStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl KvStore {
    /// Open (or create) the store file. A corrupt file is logged and treated
    /// as empty rather than refused; the next write replaces it.
    pub(crate) fn open(path: impl Into<PathBuf>) -> AuthResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AuthError::StorageUnavailable(format!("create store dir: {e}")))?;
        }

        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %path.display(), "store file unreadable; starting empty");
                    Map::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => {
                return Err(AuthError::StorageUnavailable(format!("read store file: {err}")))
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock_or_recover().get(key).cloned()
    }

    pub(crate) fn set(&self, key: &str, value: Value) -> AuthResult<()> {
        let mut entries = self.entries.lock_or_recover();
        entries.insert(key.to_string(), value);
        flush(&self.path, &entries)
    }

    /// Remove any of the given keys that exist. Flushes once; removing keys
    /// that are already absent is a successful no-op.
    pub(crate) fn remove_all(&self, keys: &[&str]) -> AuthResult<()> {
        let mut entries = self.entries.lock_or_recover();
        let mut touched = false;
        for key in keys {
            touched |= entries.remove(*key).is_some();
        }
        if !touched {
            return Ok(());
        }
        flush(&self.path, &entries)
    }

    /// Replace one key and delete others in a single flush, so a crash cannot
    /// leave both the new record and a superseded one behind.
    pub(crate) fn set_and_remove(
        &self,
        key: &str,
        value: Value,
        remove: &[&str],
    ) -> AuthResult<()> {
        let mut entries = self.entries.lock_or_recover();
        entries.insert(key.to_string(), value);
        for key in remove {
            entries.remove(*key);
        }
        flush(&self.path, &entries)
    }
}

fn flush(path: &Path, entries: &Map<String, Value>) -> AuthResult<()> {
    let json = serde_json::to_vec_pretty(&Value::Object(entries.clone()))
        .map_err(|e| AuthError::StorageUnavailable(format!("serialize store: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    write_secure_file(&tmp, &json)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|e| AuthError::StorageUnavailable(format!("write store file: {e}")))
}

fn write_secure_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");

        let store = KvStore::open(&path).expect("open");
        store.set("alpha", json!("one")).expect("set");

        // A second handle must see the flushed value.
        let reopened = KvStore::open(&path).expect("reopen");
        assert_eq!(reopened.get("alpha"), Some(json!("one")));
    }

    #[test]
    fn remove_all_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KvStore::open(dir.path().join("config.json")).expect("open");
        store.set("alpha", json!(1)).expect("set");

        store.remove_all(&["alpha", "missing"]).expect("remove");
        store.remove_all(&["alpha", "missing"]).expect("remove again");
        assert_eq!(store.get("alpha"), None);
    }

    #[test]
    fn set_and_remove_swaps_in_one_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let store = KvStore::open(&path).expect("open");
        store.set("old", json!("legacy")).expect("set");

        store
            .set_and_remove("new", json!("fresh"), &["old"])
            .expect("swap");

        let reopened = KvStore::open(&path).expect("reopen");
        assert_eq!(reopened.get("new"), Some(json!("fresh")));
        assert_eq!(reopened.get("old"), None);
    }

    #[test]
    fn corrupt_store_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, b"{not json").expect("write garbage");

        let store = KvStore::open(&path).expect("open");
        assert_eq!(store.get("anything"), None);
    }
}
