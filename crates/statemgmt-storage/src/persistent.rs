#![forbid(unsafe_code)]

//! App-storage keys mirrored into a durable backend.
//!
//! # Design
//!
//! [`PersistentStorage`] holds one two-way link per persisted key into
//! [`AppStorage`] and subscribes to every one of them. Any change of a
//! persisted key writes all persisted keys to the backend.
//!
//! On [`persist_prop`](PersistentStorage::persist_prop) an existing app
//! storage key keeps its value. Otherwise the backend value is used, or the
//! default when the backend has nothing usable, and the key is created.
//!
//! # Failure Modes
//!
//! Backend write failures inside change notifications cannot be returned to
//! the writer; they are logged at `error` level and the next change retries.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use statemgmt_core::{Capabilities, StateError, Subscriber, SubscriberId};

use crate::app_storage::AppStorage;
use crate::backend::KeyValueBackend;
use crate::binding::{Bindings, Persistable, TypedBinding, decode_or};
use crate::error::{Result, StorageError};

struct PersistentInner {
    id: SubscriberId,
    app: AppStorage,
    backend: Rc<dyn KeyValueBackend>,
    links: RefCell<Bindings>,
    deleted: Cell<bool>,
}

/// Handle to a persistent store. Clones share the store.
#[derive(Clone)]
pub struct PersistentStorage {
    inner: Rc<PersistentInner>,
}

impl fmt::Debug for PersistentStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStorage")
            .field("id", &self.inner.id)
            .field("keys", &self.keys())
            .finish()
    }
}

impl PersistentStorage {
    /// Create a store over `app` and register it as a subscriber.
    pub fn new(app: &AppStorage, backend: Rc<dyn KeyValueBackend>) -> Self {
        let registry = app.context().registry();
        let inner = Rc::new(PersistentInner {
            id: registry.make_id(),
            app: app.clone(),
            backend,
            links: RefCell::new(Bindings::default()),
            deleted: Cell::new(false),
        });
        registry.add(&inner);
        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Persist `key`, then write the store. Returns `Ok(false)` if `key` is
    /// already persisted.
    ///
    /// # Errors
    ///
    /// [`StateError::TypeMismatch`] if the app storage key holds another
    /// type, or a backend error.
    pub fn persist_prop<T: Persistable>(&self, key: &str, default: T) -> Result<bool> {
        if !self.persist_one(key, default)? {
            return Ok(false);
        }
        self.inner.write_all()?;
        Ok(true)
    }

    /// Persist several keys of one type and write the store once.
    ///
    /// # Errors
    ///
    /// As [`persist_prop`](Self::persist_prop); keys before the failing one
    /// stay persisted.
    pub fn persist_props<T: Persistable>(&self, props: impl IntoIterator<Item = (String, T)>) -> Result<()> {
        for (key, default) in props {
            self.persist_one(&key, default)?;
        }
        self.inner.write_all()
    }

    /// Stop persisting `key` and remove it from the backend. The app storage
    /// key stays. Returns `Ok(false)` if `key` was not persisted.
    ///
    /// # Errors
    ///
    /// A backend error.
    pub fn delete_prop(&self, key: &str) -> Result<bool> {
        let removed = self.inner.links.borrow_mut().remove(key);
        let Some(link) = removed else {
            tracing::warn!(key, "PersistentStorage::delete_prop: key is not persisted");
            return Ok(false);
        };
        link.about_to_be_deleted();
        self.inner.backend.delete(key)?;
        tracing::debug!(key, "PersistentStorage::delete_prop");
        Ok(true)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.links.borrow().keys()
    }

    /// Write the store because the value of `key` changed in place.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotBound`] if `key` is not persisted, or a backend
    /// error.
    pub fn notify_has_changed(&self, key: &str) -> Result<()> {
        if !self.inner.links.borrow().contains(key) {
            return Err(StorageError::NotBound { key: key.to_owned() });
        }
        self.inner.write_all()
    }

    /// Write every persisted key to the backend.
    ///
    /// # Errors
    ///
    /// A codec or backend error.
    pub fn write(&self) -> Result<()> {
        self.inner.write_all()
    }

    /// Drop every link, deregister and clear the backend.
    ///
    /// Dropping the last handle without calling this also unlinks and
    /// deregisters, but keeps the backend contents for the next start.
    ///
    /// # Errors
    ///
    /// A backend error while clearing.
    pub fn about_to_be_deleted(&self) -> Result<()> {
        if !self.inner.release() {
            return Ok(());
        }
        self.inner.backend.clear()
    }

    fn persist_one<T: Persistable>(&self, key: &str, default: T) -> Result<bool> {
        if self.inner.deleted.get() {
            tracing::warn!(key, "PersistentStorage::persist_prop on deleted store");
            return Ok(false);
        }
        if self.inner.links.borrow().contains(key) {
            tracing::warn!(key, "PersistentStorage::persist_prop: key is already persisted");
            return Ok(false);
        }
        let (app, id) = (&self.inner.app, Some(self.inner.id));
        let link = match app.link::<T>(key, id, Some(key)) {
            Ok(link) => link,
            Err(StateError::UnknownProperty { .. }) => {
                let value = decode_or(key, self.inner.backend.get(key)?, default);
                app.set_and_link(key, value, id, Some(key))?
            }
            Err(err) => return Err(err.into()),
        };
        self.inner.links.borrow_mut().push(key, TypedBinding::boxed(key, link));
        tracing::debug!(key, "PersistentStorage::persist_prop");
        Ok(true)
    }
}

impl PersistentInner {
    /// Unlink every key and deregister. Returns `false` if already released.
    fn release(&self) -> bool {
        if self.deleted.replace(true) {
            return false;
        }
        let links = self.links.borrow_mut().take_all();
        for (_, link) in links {
            link.about_to_be_deleted();
        }
        self.app.context().registry().delete(self.id);
        true
    }

    fn write_all(&self) -> Result<()> {
        let links = self.links.borrow();
        for key in links.keys() {
            if let Some(link) = links.get(&key) {
                self.backend.set(&key, link.read_json()?)?;
            }
        }
        Ok(())
    }
}

impl Subscriber for PersistentInner {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NAMED_CHANGE
    }

    fn info(&self) -> Option<String> {
        Some("PersistentStorage".to_owned())
    }

    fn property_has_changed(&self, info: Option<&str>) {
        if let Err(err) = self.write_all() {
            tracing::error!(changed = info.unwrap_or("?"), %err, "PersistentStorage: write failed");
        }
    }
}

impl Drop for PersistentInner {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;
    use statemgmt_core::StateContext;

    fn setup(backend: MemoryBackend) -> (AppStorage, Rc<MemoryBackend>, PersistentStorage) {
        let ctx = StateContext::default();
        let app = AppStorage::new(&ctx);
        let backend = Rc::new(backend);
        let persistent = PersistentStorage::new(&app, backend.clone());
        (app, backend, persistent)
    }

    #[test]
    fn backend_value_wins_over_default() {
        let (app, backend, persistent) = setup(MemoryBackend::with_entries([("volume", json!(3))]));
        assert!(persistent.persist_prop("volume", 10_u8).unwrap());
        assert_eq!(app.get::<u8>("volume"), Some(3));
        assert_eq!(backend.get("volume").unwrap(), Some(json!(3)));
    }

    #[test]
    fn existing_app_key_wins_over_backend() {
        let (app, backend, persistent) = setup(MemoryBackend::with_entries([("volume", json!(3))]));
        app.set_or_create("volume", 8_u8);
        assert!(persistent.persist_prop("volume", 10_u8).unwrap());
        assert_eq!(app.get::<u8>("volume"), Some(8));
        assert_eq!(backend.get("volume").unwrap(), Some(json!(8)));
    }

    #[test]
    fn app_writes_reach_backend() {
        let (app, backend, persistent) = setup(MemoryBackend::new());
        persistent.persist_prop("name", String::from("anon")).unwrap();
        assert_eq!(backend.get("name").unwrap(), Some(json!("anon")));

        assert!(app.set("name", String::from("ada")));
        assert_eq!(backend.get("name").unwrap(), Some(json!("ada")));
    }

    #[tracing_test::traced_test]
    #[test]
    fn persisting_twice_is_a_warned_no_op() {
        let (_app, _backend, persistent) = setup(MemoryBackend::new());
        assert!(persistent.persist_prop("k", 1_i32).unwrap());
        assert!(!persistent.persist_prop("k", 2_i32).unwrap());
        assert!(logs_contain("already persisted"));
        assert_eq!(persistent.keys(), vec!["k".to_owned()]);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let (app, _backend, persistent) = setup(MemoryBackend::new());
        app.set_or_create("k", 1_i32);
        assert!(matches!(
            persistent.persist_prop("k", String::new()),
            Err(StorageError::State(StateError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn delete_prop_keeps_app_key_and_drops_backend_key() {
        let (app, backend, persistent) = setup(MemoryBackend::new());
        persistent
            .persist_props([("a".to_owned(), 1_i32), ("b".to_owned(), 2_i32)])
            .unwrap();
        assert_eq!(backend.len(), 2);

        assert!(persistent.delete_prop("a").unwrap());
        assert!(!persistent.delete_prop("a").unwrap());
        assert_eq!(backend.get("a").unwrap(), None);
        assert_eq!(app.get::<i32>("a"), Some(1));
        assert_eq!(app.number_of_subscribers_to("a"), Some(0));

        app.set("a", 5_i32);
        assert_eq!(backend.get("a").unwrap(), None);
    }

    #[test]
    fn notify_has_changed_requires_a_persisted_key() {
        let (_app, _backend, persistent) = setup(MemoryBackend::new());
        assert!(matches!(
            persistent.notify_has_changed("nope"),
            Err(StorageError::NotBound { .. })
        ));
        persistent.persist_prop("k", true).unwrap();
        persistent.notify_has_changed("k").unwrap();
    }

    #[test]
    fn dropping_the_store_deregisters_and_keeps_backend() {
        let (app, backend, persistent) = setup(MemoryBackend::new());
        let registry = app.context().registry();
        persistent.persist_prop("k", 1_i64).unwrap();
        let id = persistent.id();
        let clone = persistent.clone();

        drop(persistent);
        assert!(registry.has(id));
        drop(clone);

        assert!(!registry.has(id));
        assert_eq!(app.number_of_subscribers_to("k"), Some(0));
        assert_eq!(backend.get("k").unwrap(), Some(json!(1)));
    }

    #[test]
    fn about_to_be_deleted_unlinks_and_clears() {
        let (app, backend, persistent) = setup(MemoryBackend::new());
        persistent.persist_prop("k", 1_i64).unwrap();
        persistent.about_to_be_deleted().unwrap();

        assert!(backend.is_empty());
        assert_eq!(app.number_of_subscribers_to("k"), Some(0));
        assert!(!app.context().registry().has(persistent.id()));
        assert!(app.delete("k"));
    }
}
