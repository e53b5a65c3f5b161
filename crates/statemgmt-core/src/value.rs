#![forbid(unsafe_code)]

//! Values that can be stored in a property.
//!
//! A property value is either *simple* (compared by value, no ownership) or
//! an [`ObservedObject`] (compared by identity, owned by the properties that
//! hold it). The distinction is static: [`PropertyValue::IS_OBJECT`].

use std::fmt;

use crate::object::{ObservedClass, ObservedObject};
use crate::registry::SubscriberId;

/// A type a property can hold.
///
/// Implement it with an empty impl for your own simple value types:
///
/// ```
/// use statemgmt_core::PropertyValue;
///
/// #[derive(Debug, Clone, PartialEq)]
/// enum Theme { Light, Dark }
///
/// impl PropertyValue for Theme {}
/// ```
pub trait PropertyValue: Clone + PartialEq + fmt::Debug + 'static {
    /// Whether values of this type are observed objects.
    const IS_OBJECT: bool = false;

    /// Register `owner` as an owning property of the contained object.
    fn add_owning_property(&self, _owner: SubscriberId) {}

    /// Undo [`add_owning_property`](PropertyValue::add_owning_property).
    fn remove_owning_property(&self, _owner: SubscriberId) {}
}

macro_rules! simple_values {
    ($($ty:ty),* $(,)?) => {
        $(impl PropertyValue for $ty {})*
    };
}

simple_values!(
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
    (),
);

impl<T: Clone + PartialEq + fmt::Debug + 'static> PropertyValue for Vec<T> {}

impl<T: PropertyValue> PropertyValue for Option<T> {
    const IS_OBJECT: bool = T::IS_OBJECT;

    fn add_owning_property(&self, owner: SubscriberId) {
        if let Some(value) = self {
            value.add_owning_property(owner);
        }
    }

    fn remove_owning_property(&self, owner: SubscriberId) {
        if let Some(value) = self {
            value.remove_owning_property(owner);
        }
    }
}

impl<S: ObservedClass> PropertyValue for ObservedObject<S> {
    const IS_OBJECT: bool = true;

    fn add_owning_property(&self, owner: SubscriberId) {
        ObservedObject::add_owning_property(self, owner);
    }

    fn remove_owning_property(&self, owner: SubscriberId) {
        ObservedObject::remove_owning_property(self, owner);
    }
}
