#![forbid(unsafe_code)]

use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use statemgmt_core::{ObservedProperty, PropertyValue};

use crate::error::{Result, StorageError};

/// Values that can be bound to a persistent or distributed backend.
pub trait Persistable: PropertyValue + Serialize + DeserializeOwned {}

impl<T: PropertyValue + Serialize + DeserializeOwned> Persistable for T {}

/// Type-erased link from a store key into [`AppStorage`](crate::AppStorage).
pub(crate) trait ValueBinding: Debug {
    fn read_json(&self) -> Result<Value>;
    fn write_json(&self, value: Value) -> Result<()>;
    fn about_to_be_deleted(&self);
}

#[derive(Debug)]
pub(crate) struct TypedBinding<T: Persistable> {
    key: String,
    link: ObservedProperty<T>,
}

impl<T: Persistable> TypedBinding<T> {
    pub(crate) fn boxed(key: &str, link: ObservedProperty<T>) -> Box<dyn ValueBinding> {
        Box::new(Self {
            key: key.to_owned(),
            link,
        })
    }
}

impl<T: Persistable> ValueBinding for TypedBinding<T> {
    fn read_json(&self) -> Result<Value> {
        serde_json::to_value(self.link.get_unmonitored()).map_err(|err| StorageError::codec(&self.key, err))
    }

    fn write_json(&self, value: Value) -> Result<()> {
        let value = serde_json::from_value(value).map_err(|err| StorageError::codec(&self.key, err))?;
        self.link.set(value);
        Ok(())
    }

    fn about_to_be_deleted(&self) {
        self.link.about_to_be_deleted();
    }
}

/// Decode a stored value, falling back to `default` when it does not fit `T`.
pub(crate) fn decode_or<T: Persistable>(key: &str, stored: Option<Value>, default: T) -> T {
    match stored {
        None | Some(Value::Null) => default,
        Some(json) => serde_json::from_value(json).unwrap_or_else(|err| {
            tracing::warn!(key, %err, "stored value does not decode, using default");
            default
        }),
    }
}

/// Ordered key → binding list shared by the backed stores.
#[derive(Debug, Default)]
pub(crate) struct Bindings {
    entries: Vec<(String, Box<dyn ValueBinding>)>,
}

impl Bindings {
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub(crate) fn get(&self, key: &str) -> Option<&dyn ValueBinding> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, b)| b.as_ref())
    }

    pub(crate) fn push(&mut self, key: &str, binding: Box<dyn ValueBinding>) {
        self.entries.push((key.to_owned(), binding));
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Box<dyn ValueBinding>> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub(crate) fn take_all(&mut self) -> Vec<(String, Box<dyn ValueBinding>)> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}
