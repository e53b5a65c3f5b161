#![forbid(unsafe_code)]

//! App-storage keys shared with a remote session.
//!
//! # Design
//!
//! Like [`PersistentStorage`](crate::PersistentStorage), the store holds a
//! two-way link per key into [`AppStorage`] and subscribes to them. A change
//! writes only the changed key, and only while the session is available.
//!
//! The session starts unavailable. The first
//! [`on_connected`](DistributedStorage::on_connected) makes it available and
//! synchronizes every key: a remote value wins, a missing remote value is
//! filled from the local one. Remote changes arrive through
//! [`on_data_changed`](DistributedStorage::on_data_changed).
//!
//! # Failure Modes
//!
//! Remote write failures inside change notifications are logged at `error`
//! level and dropped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use statemgmt_core::{Capabilities, StateError, Subscriber, SubscriberId};

use crate::app_storage::AppStorage;
use crate::backend::KeyValueBackend;
use crate::binding::{Bindings, Persistable, TypedBinding, decode_or};
use crate::error::{Result, StorageError};

/// Connection status callback.
pub type StatusNotifier = Box<dyn Fn(&str)>;

struct DistributedInner {
    id: SubscriberId,
    app: AppStorage,
    session_id: String,
    remote: Rc<dyn KeyValueBackend>,
    links: RefCell<Bindings>,
    available: Cell<bool>,
    notifier: Option<StatusNotifier>,
    deleted: Cell<bool>,
}

/// Handle to a distributed store. Clones share the store.
#[derive(Clone)]
pub struct DistributedStorage {
    inner: Rc<DistributedInner>,
}

impl fmt::Debug for DistributedStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedStorage")
            .field("session_id", &self.inner.session_id)
            .field("available", &self.inner.available.get())
            .field("keys", &self.keys())
            .finish()
    }
}

impl DistributedStorage {
    pub fn new(
        app: &AppStorage,
        session_id: impl Into<String>,
        remote: Rc<dyn KeyValueBackend>,
        notifier: Option<StatusNotifier>,
    ) -> Self {
        let registry = app.context().registry();
        let inner = Rc::new(DistributedInner {
            id: registry.make_id(),
            app: app.clone(),
            session_id: session_id.into(),
            remote,
            links: RefCell::new(Bindings::default()),
            available: Cell::new(false),
            notifier,
            deleted: Cell::new(false),
        });
        registry.add(&inner);
        tracing::debug!(session = %inner.session_id, "DistributedStorage::new");
        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.available.get()
    }

    /// Share `key`. Returns `Ok(false)` if it is already shared.
    ///
    /// An existing app storage key keeps its value and pushes it to the
    /// session. Otherwise the remote value is used when available, or
    /// `default`, which is then pushed.
    ///
    /// # Errors
    ///
    /// [`StateError::TypeMismatch`] if the app storage key holds another
    /// type, or a remote error.
    pub fn link<T: Persistable>(&self, key: &str, default: T) -> Result<bool> {
        let inner = &self.inner;
        if inner.deleted.get() {
            tracing::warn!(key, "DistributedStorage::link on deleted store");
            return Ok(false);
        }
        if inner.links.borrow().contains(key) {
            tracing::warn!(key, "DistributedStorage::link: key is already distributed");
            return Ok(false);
        }
        let id = Some(inner.id);
        let binding = match inner.app.link::<T>(key, id, Some(key)) {
            Ok(link) => {
                let binding = TypedBinding::boxed(key, link);
                inner.set_remote(key, binding.read_json()?)?;
                binding
            }
            Err(StateError::UnknownProperty { .. }) => {
                let mut value = default;
                if inner.available.get() {
                    match inner.remote.get(key)? {
                        None | Some(Value::Null) => {
                            let json = serde_json::to_value(&value)
                                .map_err(|err| StorageError::codec(key, err))?;
                            inner.set_remote(key, json)?;
                        }
                        Some(json) => value = decode_or(key, Some(json), value),
                    }
                }
                TypedBinding::boxed(key, inner.app.set_and_link(key, value, id, Some(key))?)
            }
            Err(err) => return Err(err.into()),
        };
        inner.links.borrow_mut().push(key, binding);
        tracing::debug!(key, "DistributedStorage::link");
        Ok(true)
    }

    /// Same as [`link`](Self::link).
    ///
    /// # Errors
    ///
    /// As [`link`](Self::link).
    pub fn distribute_prop<T: Persistable>(&self, key: &str, default: T) -> Result<bool> {
        self.link(key, default)
    }

    /// Share several keys of one type.
    ///
    /// # Errors
    ///
    /// As [`link`](Self::link); keys before the failing one stay shared.
    pub fn distribute_props<T: Persistable>(&self, props: impl IntoIterator<Item = (String, T)>) -> Result<()> {
        for (key, default) in props {
            self.link(&key, default)?;
        }
        Ok(())
    }

    /// Stop sharing `key`, removing it remotely when available. The app
    /// storage key stays.
    ///
    /// # Errors
    ///
    /// A remote error.
    pub fn delete_prop(&self, key: &str) -> Result<bool> {
        let removed = self.inner.links.borrow_mut().remove(key);
        let Some(link) = removed else {
            tracing::warn!(key, "DistributedStorage::delete_prop: key is not distributed");
            return Ok(false);
        };
        link.about_to_be_deleted();
        if self.inner.available.get() {
            self.inner.remote.delete(key)?;
        }
        Ok(true)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.links.borrow().keys()
    }

    /// The remote value of `key` changed; adopt it locally.
    ///
    /// # Errors
    ///
    /// A remote or codec error.
    pub fn on_data_changed(&self, key: &str) -> Result<()> {
        if !self.inner.links.borrow().contains(key) {
            tracing::debug!(key, "DistributedStorage::on_data_changed: key is not distributed");
            return Ok(());
        }
        match self.inner.remote.get(key)? {
            None | Some(Value::Null) => Ok(()),
            Some(json) => self.inner.write_local(key, json),
        }
    }

    /// The session reports a connection status. The first call makes the
    /// session available and synchronizes all keys.
    ///
    /// # Errors
    ///
    /// A remote or codec error during the first synchronization.
    pub fn on_connected(&self, status: &str) -> Result<()> {
        let inner = &self.inner;
        tracing::debug!(session = %inner.session_id, status, "DistributedStorage::on_connected");
        if !inner.available.replace(true) {
            for key in self.keys() {
                match inner.remote.get(&key)? {
                    None | Some(Value::Null) => inner.write_remote(&key)?,
                    Some(json) => inner.write_local(&key, json)?,
                }
            }
        }
        if let Some(notifier) = &inner.notifier {
            notifier(status);
        }
        Ok(())
    }

    /// Drop every link and deregister. Dropping the last handle does the
    /// same.
    pub fn about_to_be_deleted(&self) {
        self.inner.release();
    }
}

impl DistributedInner {
    fn release(&self) {
        if self.deleted.replace(true) {
            return;
        }
        let links = self.links.borrow_mut().take_all();
        for (_, link) in links {
            link.about_to_be_deleted();
        }
        self.app.context().registry().delete(self.id);
    }

    fn set_remote(&self, key: &str, value: Value) -> Result<()> {
        if !self.available.get() {
            tracing::warn!(key, session = %self.session_id, "DistributedStorage: session not available, skipping write");
            return Ok(());
        }
        self.remote.set(key, value)
    }

    fn write_remote(&self, key: &str) -> Result<()> {
        let json = match self.links.borrow().get(key) {
            Some(link) => link.read_json()?,
            None => return Ok(()),
        };
        self.set_remote(key, json)
    }

    fn write_local(&self, key: &str, json: Value) -> Result<()> {
        let links = self.links.borrow();
        match links.get(key) {
            Some(link) => link.write_json(json),
            None => Ok(()),
        }
    }
}

impl Subscriber for DistributedInner {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NAMED_CHANGE
    }

    fn info(&self) -> Option<String> {
        Some(format!("DistributedStorage({})", self.session_id))
    }

    fn property_has_changed(&self, info: Option<&str>) {
        let Some(key) = info else { return };
        if !self.available.get() {
            return;
        }
        if let Err(err) = self.write_remote(key) {
            tracing::error!(key, %err, "DistributedStorage: remote write failed");
        }
    }
}

impl Drop for DistributedInner {
    fn drop(&mut self) {
        self.release();
    }
}
