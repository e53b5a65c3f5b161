#![forbid(unsafe_code)]

//! Name-indexed collection of observed properties.
//!
//! [`LocalStorage`] maps keys to `State` properties of any value type and
//! hands out links and props over them. It is the building block for the
//! app-wide store and for the per-page storage a top-level view shares with
//! its descendants.
//!
//! An entry is never removed while something still subscribes to it:
//! [`delete`](LocalStorage::delete) and [`clear`](LocalStorage::clear) refuse
//! and leave the store untouched. Drop the links and props first.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::context::StateContext;
use crate::error::{Result, StateError};
use crate::property::{ObservedProperty, StateVariable};
use crate::registry::SubscriberId;
use crate::value::PropertyValue;
use crate::view::downcast_variable;

struct StoreInner {
    ctx: StateContext,
    entries: RefCell<AHashMap<String, Rc<dyn StateVariable>>>,
    order: RefCell<Vec<String>>,
}

/// Shared handle to a key → property store.
#[derive(Clone)]
pub struct LocalStorage {
    inner: Rc<StoreInner>,
}

impl fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStorage")
            .field("keys", &*self.inner.order.borrow())
            .finish()
    }
}

impl LocalStorage {
    #[must_use]
    pub fn new(ctx: &StateContext) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                ctx: ctx.clone(),
                entries: RefCell::new(AHashMap::new()),
                order: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Builder-style initial entry.
    #[must_use]
    pub fn with_prop<T: PropertyValue>(self, key: &str, value: T) -> Self {
        if !self.set_or_create(key, value) {
            tracing::warn!(key, "LocalStorage::with_prop: key holds another type, entry kept");
        }
        self
    }

    #[must_use]
    pub fn context(&self) -> &StateContext {
        &self.inner.ctx
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.inner.entries.borrow().contains_key(key)
    }

    /// Current value of `key`. `None` if missing or of another type.
    #[must_use]
    pub fn get<T: PropertyValue>(&self, key: &str) -> Option<T> {
        match self.property::<T>(key) {
            Ok(prop) => Some(prop.get_unmonitored()),
            Err(err) => {
                tracing::debug!(key, %err, "LocalStorage::get");
                None
            }
        }
    }

    /// Update an existing entry. Returns `false` (and logs) if `key` is
    /// missing or holds another type.
    pub fn set<T: PropertyValue>(&self, key: &str, value: T) -> bool {
        match self.property::<T>(key) {
            Ok(prop) => {
                prop.set(value);
                true
            }
            Err(err) => {
                tracing::warn!(key, %err, "LocalStorage::set: not updated");
                false
            }
        }
    }

    /// Update `key`, creating it if missing. Returns `false` only when an
    /// existing entry holds another type.
    pub fn set_or_create<T: PropertyValue>(&self, key: &str, value: T) -> bool {
        if self.has(key) {
            return self.set(key, value);
        }
        self.create_entry(key, value);
        true
    }

    /// Remove `key`. Refuses (returns `false`) while the entry has
    /// subscribers or if it is unknown.
    pub fn delete(&self, key: &str) -> bool {
        let Some(entry) = self.entry(key) else {
            tracing::warn!(key, "LocalStorage::delete: unknown key");
            return false;
        };
        let subscribers = entry.number_of_subscribers();
        if subscribers > 0 {
            tracing::error!(
                key,
                subscribers,
                "LocalStorage::delete: property still has subscribers, not deleting"
            );
            return false;
        }
        entry.about_to_be_deleted();
        self.inner.entries.borrow_mut().remove(key);
        self.inner.order.borrow_mut().retain(|k| k != key);
        true
    }

    /// Remove every entry, but only if none of them has subscribers.
    pub fn clear(&self) -> bool {
        let entries: Vec<(String, Rc<dyn StateVariable>)> = self
            .keys()
            .into_iter()
            .filter_map(|key| self.entry(&key).map(|entry| (key, entry)))
            .collect();
        let mut blocked = false;
        for (key, entry) in &entries {
            let subscribers = entry.number_of_subscribers();
            if subscribers > 0 {
                tracing::error!(
                    key = key.as_str(),
                    subscribers,
                    "LocalStorage::clear: property still has subscribers"
                );
                blocked = true;
            }
        }
        if blocked {
            return false;
        }
        for (_, entry) in &entries {
            entry.about_to_be_deleted();
        }
        self.inner.entries.borrow_mut().clear();
        self.inner.order.borrow_mut().clear();
        true
    }

    /// Keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.order.borrow().clone()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.order.borrow().len()
    }

    /// Two-way link over an existing entry.
    ///
    /// # Errors
    ///
    /// [`StateError::UnknownProperty`] or [`StateError::TypeMismatch`].
    pub fn link<T: PropertyValue>(
        &self,
        key: &str,
        subscriber: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Result<ObservedProperty<T>> {
        self.property::<T>(key)?.create_link(subscriber, info.or(Some(key)))
    }

    /// Create `key` with `default` if missing, then link to it.
    ///
    /// # Errors
    ///
    /// [`StateError::TypeMismatch`] if `key` holds another type.
    pub fn set_and_link<T: PropertyValue>(
        &self,
        key: &str,
        default: T,
        subscriber: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Result<ObservedProperty<T>> {
        if !self.has(key) {
            self.create_entry(key, default);
        }
        self.link(key, subscriber, info)
    }

    /// One-way subscribing prop over an existing entry.
    ///
    /// # Errors
    ///
    /// [`StateError::UnknownProperty`], [`StateError::TypeMismatch`] or
    /// [`StateError::PropFromObject`].
    pub fn prop<T: PropertyValue>(
        &self,
        key: &str,
        subscriber: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Result<ObservedProperty<T>> {
        self.property::<T>(key)?.create_prop(subscriber, info.or(Some(key)))
    }

    /// Create `key` with `default` if missing, then create a prop over it.
    /// Object defaults are rejected before anything is created.
    ///
    /// # Errors
    ///
    /// As [`prop`](Self::prop).
    pub fn set_and_prop<T: PropertyValue>(
        &self,
        key: &str,
        default: T,
        subscriber: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Result<ObservedProperty<T>> {
        if T::IS_OBJECT {
            return Err(StateError::PropFromObject { info: key.to_owned() });
        }
        if !self.has(key) {
            self.create_entry(key, default);
        }
        self.prop(key, subscriber, info)
    }

    /// Subscribe `subscriber` directly to the entry of `key`.
    pub fn subscribe_to_changes_of<T: PropertyValue>(&self, key: &str, subscriber: SubscriberId) -> bool {
        match self.property::<T>(key) {
            Ok(prop) => {
                prop.subscribe_me(subscriber);
                true
            }
            Err(err) => {
                tracing::warn!(key, %err, "LocalStorage::subscribe_to_changes_of");
                false
            }
        }
    }

    pub fn unsubscribe_from_changes_of<T: PropertyValue>(&self, key: &str, subscriber: SubscriberId) -> bool {
        match self.property::<T>(key) {
            Ok(prop) => prop.unlink_subscriber(subscriber),
            Err(err) => {
                tracing::warn!(key, %err, "LocalStorage::unsubscribe_from_changes_of");
                false
            }
        }
    }

    /// Subscriber count of the entry of `key`, `None` if unknown.
    #[must_use]
    pub fn number_of_subscribers_to(&self, key: &str) -> Option<usize> {
        self.entry(key).map(|entry| entry.number_of_subscribers())
    }

    /// Same as [`clear`](Self::clear).
    pub fn about_to_be_deleted(&self) -> bool {
        self.clear()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The property stored under `key`.
    ///
    /// # Errors
    ///
    /// [`StateError::UnknownProperty`] or [`StateError::TypeMismatch`].
    pub fn property<T: PropertyValue>(&self, key: &str) -> Result<ObservedProperty<T>> {
        let entry = self.entry(key).ok_or_else(|| StateError::unknown(key))?;
        downcast_variable::<T>(entry.as_ref())
            .cloned()
            .ok_or_else(|| StateError::type_mismatch::<T>(key))
    }

    fn entry(&self, key: &str) -> Option<Rc<dyn StateVariable>> {
        self.inner.entries.borrow().get(key).cloned()
    }

    fn create_entry<T: PropertyValue>(&self, key: &str, value: T) -> ObservedProperty<T> {
        tracing::debug!(key, "LocalStorage: new entry");
        let prop = ObservedProperty::new(&self.inner.ctx, value, None, Some(key));
        self.inner
            .entries
            .borrow_mut()
            .insert(key.to_owned(), Rc::new(prop.clone()));
        self.inner.order.borrow_mut().push(key.to_owned());
        prop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[tracing_test::traced_test]
    fn with_prop_of_another_type_keeps_entry_and_warns() {
        let ctx = StateContext::default();
        let store = LocalStorage::new(&ctx)
            .with_prop("k", 1_i32)
            .with_prop("k", String::from("one"));
        assert_eq!(store.get::<i32>("k"), Some(1));
        assert_eq!(store.get::<String>("k"), None);
        assert!(logs_contain("key holds another type"));
    }

    #[test]
    fn set_on_missing_key_is_rejected() {
        let ctx = StateContext::default();
        let store = LocalStorage::new(&ctx);
        assert!(!store.set("missing", 1));
        assert!(!store.has("missing"));
        assert!(store.set_or_create("missing", 1));
        assert_eq!(store.get::<i32>("missing"), Some(1));
        assert_eq!(store.get::<String>("missing"), None);
        assert!(!store.set("missing", "text"));
    }

    #[test]
    fn set_and_link_scenario() {
        let ctx = StateContext::default();
        let store = LocalStorage::new(&ctx);
        let a = ctx.registry().make_id();
        let b = ctx.registry().make_id();

        let link_a = store.set_and_link("count", 0, Some(a), Some("a")).unwrap();
        let link_b = store.link::<i32>("count", Some(b), Some("b")).unwrap();
        assert_eq!(link_b.get(), 0);

        link_a.set(5);
        assert_eq!(link_b.get(), 5);
        assert_eq!(store.get::<i32>("count"), Some(5));
    }

    #[test]
    fn delete_is_guarded_by_subscribers() {
        let ctx = StateContext::default();
        let store = LocalStorage::new(&ctx).with_prop("k", 1_u32);
        let prop = store.prop::<u32>("k", None, None).unwrap();

        assert_eq!(store.number_of_subscribers_to("k"), Some(1));
        assert!(!store.delete("k"));
        assert!(store.has("k"));

        drop(prop);
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn clear_checks_every_entry_first() {
        let ctx = StateContext::default();
        let store = LocalStorage::new(&ctx)
            .with_prop("a", 1)
            .with_prop("b", String::from("x"));
        let link = store.link::<String>("b", None, None).unwrap();

        assert!(!store.clear());
        assert_eq!(store.keys(), vec!["a".to_owned(), "b".to_owned()]);

        link.about_to_be_deleted();
        assert!(store.about_to_be_deleted());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn link_errors() {
        let ctx = StateContext::default();
        let store = LocalStorage::new(&ctx).with_prop("n", 1_i64);
        assert!(matches!(
            store.link::<i64>("nope", None, None),
            Err(StateError::UnknownProperty { .. })
        ));
        assert!(matches!(
            store.link::<bool>("n", None, None),
            Err(StateError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn external_subscription() {
        let ctx = StateContext::default();
        let store = LocalStorage::new(&ctx).with_prop("k", 0);
        let id = ctx.registry().make_id();
        assert!(store.subscribe_to_changes_of::<i32>("k", id));
        assert_eq!(store.number_of_subscribers_to("k"), Some(1));
        assert!(store.unsubscribe_from_changes_of::<i32>("k", id));
        assert!(!store.unsubscribe_from_changes_of::<i32>("k", id));
        assert_eq!(store.number_of_subscribers_to("missing"), None);
    }
}
