#![forbid(unsafe_code)]

//! Application-level stores built on `statemgmt-core`.
//!
//! - [`AppStorage`]: the app-wide key → property store views link to.
//! - [`PersistentStorage`]: mirrors chosen app storage keys into a
//!   [`KeyValueBackend`] and restores them on the next start.
//! - [`Environment`]: publishes device settings as read-only app storage
//!   keys.
//! - [`DistributedStorage`]: shares app storage keys with a remote session.
//!
//! Persisted and distributed values cross the backend boundary as JSON, so
//! their types implement [`Persistable`] (any `Serialize + DeserializeOwned`
//! [`PropertyValue`](statemgmt_core::PropertyValue)).
//!
//! # Feature Flags
//!
//! - `json-file` (default): [`JsonFileBackend`].

pub mod app_storage;
pub mod backend;
mod binding;
pub mod distributed;
pub mod environment;
pub mod error;
pub mod persistent;

pub use app_storage::AppStorage;
#[cfg(feature = "json-file")]
pub use backend::JsonFileBackend;
pub use backend::{KeyValueBackend, MemoryBackend};
pub use binding::Persistable;
pub use distributed::{DistributedStorage, StatusNotifier};
pub use environment::{
    ColorMode, EnvValue, Environment, EnvironmentBackend, LayoutDirection, StaticEnvironment,
};
pub use error::{Result, StorageError};
pub use persistent::PersistentStorage;
