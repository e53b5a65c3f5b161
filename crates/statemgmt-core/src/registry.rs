#![forbid(unsafe_code)]

//! Subscriber registry: the id → subscriber directory every notification goes
//! through.
//!
//! # Design
//!
//! Properties, views and storage adapters only ever store each other's
//! [`SubscriberId`]s. Delivering a notification means looking the id up here
//! and dispatching on the subscriber's declared [`Capabilities`]. Entries are
//! held as `Weak`, so the registry never keeps a subscriber alive; a dropped
//! subscriber looks exactly like an unknown id.
//!
//! # Invariants
//!
//! 1. [`make_id`](SubscriberRegistry::make_id) never returns the same id twice
//!    for one registry, even after the owner of an id has been deleted.
//! 2. `add` of an id already present and `delete` of an absent id are
//!    rejected with `false`; neither panics. A missing subscriber in the
//!    middle of a fan-out must not abort delivery to the others.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use bitflags::bitflags;

/// Process-wide unique subscriber identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// The notifications a subscriber wants to receive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// `has_changed(new_value)`: synchronized properties and object owners.
        const VALUE_CHANGE = 1 << 0;
        /// `property_has_changed(info)`: multi-property subscribers such as
        /// storage adapters.
        const NAMED_CHANGE = 1 << 1;
        /// `property_read(info)` on every monitored read.
        const READ = 1 << 2;
        /// `view_property_has_changed(info)`; takes precedence over
        /// `NAMED_CHANGE`.
        const VIEW = 1 << 3;
    }
}

/// Anything that can be registered and notified.
///
/// Only the hooks matching [`capabilities`](Subscriber::capabilities) are ever
/// called; the defaults are no-ops.
pub trait Subscriber {
    fn id(&self) -> SubscriberId;

    fn capabilities(&self) -> Capabilities;

    /// Human readable name for diagnostics.
    fn info(&self) -> Option<String> {
        None
    }

    /// The observed value changed. `new_value` is the concrete value type of
    /// the notifying property (or the `ObservedObject` itself for field
    /// writes).
    fn has_changed(&self, _new_value: &dyn Any) {}

    fn property_has_changed(&self, _info: Option<&str>) {}

    fn property_read(&self, _info: Option<&str>) {}

    fn view_property_has_changed(&self, _info: Option<&str>) {}
}

/// The id → subscriber directory.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RefCell<AHashMap<SubscriberId, Weak<dyn Subscriber>>>,
    next_free_id: Cell<u64>,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("registered", &self.subscribers.borrow().len())
            .field("next_free_id", &self.next_free_id.get())
            .finish()
    }
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next unused id.
    pub fn make_id(&self) -> SubscriberId {
        let id = self.next_free_id.get();
        self.next_free_id.set(id + 1);
        SubscriberId(id)
    }

    /// Register `subscriber` under its own id.
    ///
    /// Returns `false` if the id is already registered.
    pub fn add<S: Subscriber + 'static>(&self, subscriber: &Rc<S>) -> bool {
        let id = subscriber.id();
        let mut subscribers = self.subscribers.borrow_mut();
        if subscribers.contains_key(&id) {
            tracing::error!(%id, "SubscriberRegistry::add: duplicate registration");
            return false;
        }
        let weak: Weak<dyn Subscriber> = Rc::downgrade(subscriber) as Weak<dyn Subscriber>;
        subscribers.insert(id, weak);
        true
    }

    /// Remove the entry for `id`.
    ///
    /// Returns `false` (and logs) if `id` is not registered.
    pub fn delete(&self, id: SubscriberId) -> bool {
        if self.subscribers.borrow_mut().remove(&id).is_none() {
            tracing::warn!(%id, "SubscriberRegistry::delete: unknown id");
            return false;
        }
        true
    }

    /// Look up a live subscriber. No borrow is held once this returns.
    #[must_use]
    pub fn get(&self, id: SubscriberId) -> Option<Rc<dyn Subscriber>> {
        self.subscribers.borrow().get(&id).and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn has(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow().contains_key(&id)
    }

    /// Number of registered entries, live or not.
    #[must_use]
    pub fn number_of_subscribers(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Log every registered id with its info at debug level.
    pub fn dump_subscriber_info(&self) {
        let mut entries: Vec<(SubscriberId, Option<String>)> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(id, weak)| (*id, weak.upgrade().and_then(|s| s.info())))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        tracing::debug!(count = entries.len(), "SubscriberRegistry dump: start");
        for (id, info) in entries {
            tracing::debug!(%id, info = info.as_deref().unwrap_or("unknown"), "subscriber");
        }
        tracing::debug!("SubscriberRegistry dump: end");
    }
}
