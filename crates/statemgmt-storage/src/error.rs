#![forbid(unsafe_code)]

use std::path::PathBuf;

use statemgmt_core::StateError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    State(#[from] StateError),

    /// A value could not be converted to or from its JSON form.
    #[error("failed to convert value of '{key}' to or from JSON")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage file {} is corrupt", path.display())]
    Corruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The key is not bound by this persistent or distributed store.
    #[error("'{key}' is not bound by this store")]
    NotBound { key: String },
}

impl StorageError {
    pub(crate) fn codec(key: &str, source: serde_json::Error) -> Self {
        Self::Codec {
            key: key.to_owned(),
            source,
        }
    }
}
