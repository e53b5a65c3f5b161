#![forbid(unsafe_code)]

//! Key-value backends for persisted and distributed values.
//!
//! Values cross the backend boundary as [`serde_json::Value`]. A backend is
//! shared through `Rc<dyn KeyValueBackend>` and takes `&self`, so hosts and
//! tests can keep a handle and inspect what was written.

use std::cell::RefCell;
use std::collections::BTreeMap;
#[cfg(feature = "json-file")]
use std::path::{Path, PathBuf};

use serde_json::Value;

#[cfg(feature = "json-file")]
use crate::error::StorageError;
use crate::error::Result;

/// Narrow storage interface behind persistent and distributed stores.
pub trait KeyValueBackend {
    /// Stored value of `key`, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove `key`. Absent keys are not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// In-memory backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<BTreeMap<String, Value>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with `entries`.
    #[must_use]
    pub fn with_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            entries: RefCell::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.borrow_mut().insert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.borrow_mut().clear();
        Ok(())
    }
}

/// Backend that keeps a JSON object file in sync.
///
/// The file is loaded once on [`open`](Self::open) and rewritten after every
/// mutation. A missing file starts empty.
#[cfg(feature = "json-file")]
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    entries: RefCell<BTreeMap<String, Value>>,
}

#[cfg(feature = "json-file")]
impl JsonFileBackend {
    /// # Errors
    ///
    /// [`StorageError::Io`] if the file exists but cannot be read,
    /// [`StorageError::Corruption`] if it is not a JSON object.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Corruption {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "JsonFileBackend::open");
        Ok(Self {
            path,
            entries: RefCell::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&*self.entries.borrow()).map_err(|source| {
            StorageError::Corruption {
                path: self.path.clone(),
                source,
            }
        })?;
        std::fs::write(&self.path, bytes).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(feature = "json-file")]
impl KeyValueBackend for JsonFileBackend {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.borrow_mut().insert(key.to_owned(), value);
        self.flush()
    }

    fn delete(&self, key: &str) -> Result<()> {
        if self.entries.borrow_mut().remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.borrow_mut().clear();
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_backend_basic_ops() {
        let backend = MemoryBackend::with_entries([("a", json!(1))]);
        assert_eq!(backend.get("a").unwrap(), Some(json!(1)));
        assert_eq!(backend.get("b").unwrap(), None);

        backend.set("b", json!("two")).unwrap();
        backend.delete("a").unwrap();
        backend.delete("missing").unwrap();
        assert_eq!(backend.snapshot().into_iter().collect::<Vec<_>>(), vec![("b".to_owned(), json!("two"))]);

        backend.clear().unwrap();
        assert!(backend.is_empty());
    }

    #[cfg(feature = "json-file")]
    #[test]
    fn json_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let backend = JsonFileBackend::open(&path).unwrap();
        backend.set("volume", json!(7)).unwrap();
        backend.set("name", json!("x")).unwrap();
        backend.delete("name").unwrap();
        drop(backend);

        let reopened = JsonFileBackend::open(&path).unwrap();
        assert_eq!(reopened.get("volume").unwrap(), Some(json!(7)));
        assert_eq!(reopened.get("name").unwrap(), None);
    }

    #[cfg(feature = "json-file")]
    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"[1, 2").unwrap();
        assert!(matches!(
            JsonFileBackend::open(&path),
            Err(StorageError::Corruption { .. })
        ));
    }
}
