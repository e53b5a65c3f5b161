#![forbid(unsafe_code)]

//! Application-wide store.

use std::ops::Deref;

use statemgmt_core::{LocalStorage, StateContext};

/// The store every view of an application can link to.
///
/// It is a [`LocalStorage`] in all but name: the persistent, environment and
/// distributed stores bind their keys into one `AppStorage`, and views reach
/// it through [`View::create_storage_link`] and
/// [`View::create_storage_prop`].
///
/// [`View::create_storage_link`]: statemgmt_core::View::create_storage_link
/// [`View::create_storage_prop`]: statemgmt_core::View::create_storage_prop
#[derive(Debug, Clone)]
pub struct AppStorage(LocalStorage);

impl AppStorage {
    #[must_use]
    pub fn new(ctx: &StateContext) -> Self {
        Self(LocalStorage::new(ctx))
    }

    /// Whether `key` may be written by views. Every key of the app store is
    /// mutable.
    #[must_use]
    pub fn is_mutable(&self, _key: &str) -> bool {
        true
    }

    #[must_use]
    pub fn local_storage(&self) -> &LocalStorage {
        &self.0
    }
}

impl From<LocalStorage> for AppStorage {
    fn from(storage: LocalStorage) -> Self {
        Self(storage)
    }
}

impl Deref for AppStorage {
    type Target = LocalStorage;

    fn deref(&self) -> &LocalStorage {
        &self.0
    }
}
