#![forbid(unsafe_code)]

//! Observed properties: the owning state slot and its synchronized variants.
//!
//! # Design
//!
//! [`ObservedProperty<T>`] is one handle type over a closed set of behaviors
//! selected at construction ([`PropertyKind`]):
//!
//! | kind | value lives in | `set` | source change |
//! |---|---|---|---|
//! | `State` | the property | store + notify | - |
//! | `Link` | the source | write through | re-notify |
//! | `Prop` / `SubscribingProp` | a private cache | cache only | refresh cache + re-notify |
//! | `NestedObject` | the property (an object) | store + notify | - |
//!
//! Whether `T` is an object is static ([`PropertyValue::IS_OBJECT`]). Object
//! valued properties register themselves as owners of the wrapped object, so
//! a field write reaches them through `has_changed`.
//!
//! Properties only hold ids of their subscribers and resolve them through the
//! context's registry on every notification. A synchronized property keeps a
//! strong handle to its source; the source only knows the link's id.
//!
//! # Invariants
//!
//! 1. `set` with a value equal to the current one notifies nobody.
//! 2. A two-way link suppresses the echo of its own write: its
//!    change-notification-ongoing flag wraps exactly the forwarding call.
//! 3. A one-way prop never writes to its source.
//! 4. A change sets the pending-dirty flag; dependent elements are marked only
//!    by [`mark_dependent_elements_dirty`](ObservedProperty::mark_dependent_elements_dirty).
//!
//! # Failure Modes
//!
//! - **Unknown subscriber id during fan-out**: logged at error level and
//!   skipped; remaining subscribers are still notified.
//! - **`set` after `about_to_be_deleted`**: logged and ignored. Reads keep
//!   returning the last value. The same holds for a link whose source was
//!   deleted: nothing is forwarded and nobody is notified.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::context::StateContext;
use crate::error::{Result, StateError};
use crate::object::{ObjectValue, ObservedClass, ObservedObject};
use crate::registry::{Capabilities, Subscriber, SubscriberId};
use crate::tracker::ElementId;
use crate::value::PropertyValue;
use crate::view::View;

/// The behavior variant of an [`ObservedProperty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Owns its value.
    State,
    /// Two-way synchronized with a source.
    Link,
    /// One-way copy of a source, refreshed on source change.
    Prop,
    /// One-way copy that may itself be the source of further props. Created
    /// by stores and by [`ObservedProperty::create_prop`].
    SubscribingProp,
    /// Directly references an object shared with a parent.
    NestedObject,
}

enum Backing<T: PropertyValue> {
    Owned(RefCell<T>),
    TwoWay(ObservedProperty<T>),
    OneWay {
        source: RefCell<Option<ObservedProperty<T>>>,
        cached: RefCell<T>,
    },
}

struct PropertyInner<T: PropertyValue> {
    id: SubscriberId,
    kind: PropertyKind,
    ctx: StateContext,
    info: RefCell<Option<String>>,
    subscribers: RefCell<Vec<SubscriberId>>,
    dependent_elmt_ids: RefCell<BTreeSet<ElementId>>,
    dirty_pending: Cell<bool>,
    change_notification_ongoing: Cell<bool>,
    deleted: Cell<bool>,
    backing: Backing<T>,
}

/// A subscribable holder of one state value.
///
/// Cloning yields another handle to the same property. Dropping the last
/// handle of a property that was never explicitly deleted performs
/// [`about_to_be_deleted`](Self::about_to_be_deleted).
pub struct ObservedProperty<T: PropertyValue> {
    inner: Rc<PropertyInner<T>>,
}

impl<T: PropertyValue> Clone for ObservedProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: PropertyValue> fmt::Debug for ObservedProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedProperty")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("info", &*self.inner.info.borrow())
            .field("value", &self.inner.value_unmonitored())
            .field("subscribers", &*self.inner.subscribers.borrow())
            .finish()
    }
}

impl<T: PropertyValue> ObservedProperty<T> {
    fn build(
        ctx: &StateContext,
        kind: PropertyKind,
        backing: Backing<T>,
        subscribe_me: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Self {
        let inner = Rc::new(PropertyInner {
            id: ctx.registry().make_id(),
            kind,
            ctx: ctx.clone(),
            info: RefCell::new(info.map(str::to_owned)),
            subscribers: RefCell::new(subscribe_me.into_iter().collect()),
            dependent_elmt_ids: RefCell::new(BTreeSet::new()),
            dirty_pending: Cell::new(false),
            change_notification_ongoing: Cell::new(false),
            deleted: Cell::new(false),
            backing,
        });
        ctx.registry().add(&inner);
        tracing::debug!(id = %inner.id, ?kind, info, "ObservedProperty: created");
        Self { inner }
    }

    /// Create an owning (`State`) property.
    ///
    /// `subscribe_me` is typically the owning view. An object value gets this
    /// property added to its owner set.
    pub fn new(
        ctx: &StateContext,
        value: T,
        subscribe_me: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Self {
        let prop = Self::build(
            ctx,
            PropertyKind::State,
            Backing::Owned(RefCell::new(value)),
            subscribe_me,
            info,
        );
        if T::IS_OBJECT {
            prop.inner.value_unmonitored().add_owning_property(prop.inner.id);
        }
        prop
    }

    /// Two-way property over `source`, registered as its subscriber.
    fn new_link(source: &Self, subscribe_me: Option<SubscriberId>, info: Option<&str>) -> Self {
        let link = Self::build(
            &source.inner.ctx,
            PropertyKind::Link,
            Backing::TwoWay(source.clone()),
            subscribe_me,
            info,
        );
        source.subscribe_me(link.inner.id);
        if T::IS_OBJECT {
            source.get_unmonitored().add_owning_property(link.inner.id);
        }
        link
    }

    /// One-way property over `source` with its own copy of the value.
    pub(crate) fn new_one_way(
        source: &Self,
        kind: PropertyKind,
        subscribe_me: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Self {
        debug_assert!(matches!(kind, PropertyKind::Prop | PropertyKind::SubscribingProp));
        let prop = Self::build(
            &source.inner.ctx,
            kind,
            Backing::OneWay {
                source: RefCell::new(Some(source.clone())),
                cached: RefCell::new(source.get_unmonitored()),
            },
            subscribe_me,
            info,
        );
        source.subscribe_me(prop.inner.id);
        prop
    }

    /// Derive a two-way link whose reads and writes go through this property.
    ///
    /// # Errors
    ///
    /// [`StateError::LinkFromProp`] for one-way props,
    /// [`StateError::Unsupported`] for nested-object properties.
    pub fn create_link(&self, subscribe_me: Option<SubscriberId>, info: Option<&str>) -> Result<Self> {
        match self.inner.kind {
            PropertyKind::State | PropertyKind::Link => Ok(Self::new_link(self, subscribe_me, info)),
            PropertyKind::Prop | PropertyKind::SubscribingProp => Err(StateError::LinkFromProp {
                info: self.info_or_unknown(),
            }),
            PropertyKind::NestedObject => Err(StateError::unsupported(
                self.inner.kind,
                "create_link",
                self.info_or_unknown(),
            )),
        }
    }

    /// Derive a one-way subscribing prop that copies this property's value.
    ///
    /// # Errors
    ///
    /// [`StateError::PropFromObject`] for object-typed properties,
    /// [`StateError::PropFromProp`] for non-subscribing props and
    /// [`StateError::Unsupported`] for nested-object properties.
    pub fn create_prop(&self, subscribe_me: Option<SubscriberId>, info: Option<&str>) -> Result<Self> {
        if T::IS_OBJECT {
            return Err(StateError::PropFromObject {
                info: self.info_or_unknown(),
            });
        }
        match self.inner.kind {
            PropertyKind::State | PropertyKind::Link | PropertyKind::SubscribingProp => Ok(
                Self::new_one_way(self, PropertyKind::SubscribingProp, subscribe_me, info),
            ),
            PropertyKind::Prop => Err(StateError::PropFromProp {
                info: self.info_or_unknown(),
            }),
            PropertyKind::NestedObject => Err(StateError::unsupported(
                self.inner.kind,
                "create_prop",
                self.info_or_unknown(),
            )),
        }
    }

    /// Monitored read: notifies read subscribers and records the element
    /// currently rendering as dependent.
    pub fn get(&self) -> T {
        tracing::trace!(id = %self.inner.id, "ObservedProperty::get");
        self.inner.notify_property_read();
        self.inner.record_dependent_update();
        self.inner.value_unmonitored()
    }

    /// Read without notification or dependency recording.
    pub fn get_unmonitored(&self) -> T {
        self.inner.value_unmonitored()
    }

    /// Assign a new value. No-op when equal to the current value.
    pub fn set(&self, new_value: T) {
        self.inner.set(new_value);
    }

    /// React to a change of the source or of the owned object, as the
    /// registry would on a `has_changed` notification.
    pub fn has_changed(&self, new_value: &T) {
        self.inner.on_value_changed(new_value);
    }

    /// Add `id` to the subscribers (no-op if present).
    pub fn subscribe_me(&self, id: SubscriberId) {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        if !subscribers.contains(&id) {
            subscribers.push(id);
        }
    }

    /// Remove `id` from the subscribers. Returns whether it was subscribed.
    pub fn unlink_subscriber(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.inner.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|s| *s != id);
        subscribers.len() != before
    }

    #[must_use]
    pub fn number_of_subscribers(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> PropertyKind {
        self.inner.kind
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        T::IS_OBJECT
    }

    #[must_use]
    pub fn info(&self) -> Option<String> {
        self.inner.info.borrow().clone()
    }

    pub fn set_info(&self, info: impl Into<String>) {
        *self.inner.info.borrow_mut() = Some(info.into());
    }

    /// Element ids recorded as reading this property, ascending.
    #[must_use]
    pub fn dependent_element_ids(&self) -> Vec<ElementId> {
        self.inner.dependent_elmt_ids.borrow().iter().copied().collect()
    }

    /// Mark every dependent element dirty in `view` if a change happened since
    /// the last call.
    pub fn mark_dependent_elements_dirty(&self, view: &View) {
        if !self.inner.dirty_pending.replace(false) {
            return;
        }
        let ids = self.dependent_element_ids();
        tracing::debug!(
            id = %self.inner.id,
            info = self.inner.info.borrow().as_deref(),
            count = ids.len(),
            "ObservedProperty: mark dependent elements dirty"
        );
        for elmt_id in ids {
            view.mark_element_dirty_by_id(elmt_id);
        }
    }

    /// Forget a retired element id.
    pub fn purge_dependency_on_elmt_id(&self, elmt_id: ElementId) {
        tracing::debug!(id = %self.inner.id, %elmt_id, "ObservedProperty: purge dependency");
        self.inner.dependent_elmt_ids.borrow_mut().remove(&elmt_id);
    }

    /// Unsubscribe from the source, leave the object's owner set and
    /// unregister. Idempotent.
    pub fn about_to_be_deleted(&self) {
        self.inner.release();
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.get()
    }

    #[must_use]
    pub fn context(&self) -> &StateContext {
        &self.inner.ctx
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn info_or_unknown(&self) -> String {
        self.info().unwrap_or_else(|| "unknown".to_owned())
    }
}

impl<S: ObservedClass> ObservedProperty<ObservedObject<S>> {
    /// Create a `State` property over a raw or already wrapped object.
    pub fn new_object(
        ctx: &StateContext,
        value: impl Into<ObjectValue<S>>,
        subscribe_me: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Self {
        Self::new(ctx, ObservedObject::create_new(ctx, value, None), subscribe_me, info)
    }

    /// Assign a raw or already wrapped object. A raw value gets a new
    /// wrapper; a wrapped one keeps its wrapper and gains this property as an
    /// owner.
    pub fn set_object(&self, value: impl Into<ObjectValue<S>>) {
        self.set(ObservedObject::create_new(&self.inner.ctx, value, None));
    }

    /// Create a `NestedObject` property sharing `obj` directly.
    pub fn new_nested(
        ctx: &StateContext,
        obj: &ObservedObject<S>,
        subscribe_me: Option<SubscriberId>,
        info: Option<&str>,
    ) -> Self {
        let prop = Self::build(
            ctx,
            PropertyKind::NestedObject,
            Backing::Owned(RefCell::new(obj.clone())),
            subscribe_me,
            info,
        );
        obj.add_owning_property(prop.inner.id);
        prop
    }
}

impl<T: PropertyValue> PropertyInner<T> {
    fn value_unmonitored(&self) -> T {
        match &self.backing {
            Backing::Owned(slot) => slot.borrow().clone(),
            Backing::TwoWay(source) => source.get_unmonitored(),
            Backing::OneWay { cached, .. } => cached.borrow().clone(),
        }
    }

    fn set(&self, new_value: T) {
        if self.deleted.get() {
            tracing::warn!(id = %self.id, "ObservedProperty::set: property has been deleted, ignoring");
            return;
        }
        match &self.backing {
            Backing::Owned(slot) => {
                if *slot.borrow() == new_value {
                    tracing::debug!(id = %self.id, "ObservedProperty::set: unchanged value, ignoring");
                    return;
                }
                let old = slot.replace(new_value.clone());
                if T::IS_OBJECT {
                    old.remove_owning_property(self.id);
                    new_value.add_owning_property(self.id);
                }
                self.notify_has_changed(&new_value);
            }
            Backing::TwoWay(source) => {
                if source.is_deleted() {
                    tracing::warn!(id = %self.id, source = %source.id(), "ObservedProperty::set: source has been deleted, ignoring");
                    return;
                }
                let current = source.get_unmonitored();
                if current == new_value {
                    tracing::debug!(id = %self.id, "ObservedProperty::set: unchanged value, ignoring");
                    return;
                }
                if T::IS_OBJECT {
                    current.remove_owning_property(self.id);
                }
                self.change_notification_ongoing.set(true);
                source.set(new_value.clone());
                self.change_notification_ongoing.set(false);
                if T::IS_OBJECT {
                    source.get_unmonitored().add_owning_property(self.id);
                }
                self.notify_has_changed(&new_value);
            }
            Backing::OneWay { cached, .. } => {
                if *cached.borrow() == new_value {
                    tracing::debug!(id = %self.id, "ObservedProperty::set: unchanged value, ignoring");
                    return;
                }
                cached.replace(new_value.clone());
                self.notify_has_changed(&new_value);
            }
        }
    }

    fn on_value_changed(&self, new_value: &T) {
        self.on_change_notification(new_value as &dyn Any);
    }

    fn on_change_notification(&self, new_value: &dyn Any) {
        match &self.backing {
            Backing::Owned(slot) => {
                // Only object owners are notified: a field of the held object
                // was written.
                if T::IS_OBJECT {
                    let value = slot.borrow().clone();
                    self.notify_has_changed(&value);
                }
            }
            Backing::TwoWay(source) => {
                if self.change_notification_ongoing.get() {
                    return;
                }
                self.notify_has_changed(&source.get_unmonitored());
            }
            Backing::OneWay { source, cached } => {
                let Some(source) = source.borrow().clone() else {
                    return;
                };
                let fresh = source.get_unmonitored();
                let passed = new_value.downcast_ref::<T>();
                if self.ctx.config().check_prop_consistency && passed != Some(&fresh) {
                    tracing::warn!(
                        id = %self.id,
                        notified = ?passed,
                        source = ?fresh,
                        "ObservedProperty: one-way prop notified with a value that differs from its source"
                    );
                    debug_assert!(
                        passed.is_none(),
                        "one-way prop notified with {passed:?} while source holds {fresh:?}"
                    );
                }
                *cached.borrow_mut() = fresh.clone();
                let value = passed.cloned().unwrap_or(fresh);
                self.notify_has_changed(&value);
            }
        }
    }

    fn notify_has_changed(&self, new_value: &T) {
        let info = self.info.borrow().clone();
        tracing::debug!(id = %self.id, info = info.as_deref(), "ObservedProperty: notify has changed");
        self.dirty_pending.set(true);
        let subscribers = self.subscribers.borrow().clone();
        let registry = self.ctx.registry();
        for sub_id in subscribers {
            let Some(subscriber) = registry.get(sub_id) else {
                tracing::error!(
                    id = %self.id,
                    info = info.as_deref(),
                    subscriber = %sub_id,
                    "ObservedProperty: notify has changed: unknown subscriber"
                );
                continue;
            };
            let caps = subscriber.capabilities();
            if caps.contains(Capabilities::VALUE_CHANGE) {
                subscriber.has_changed(new_value as &dyn Any);
            }
            if caps.contains(Capabilities::VIEW) {
                subscriber.view_property_has_changed(info.as_deref());
            } else if caps.contains(Capabilities::NAMED_CHANGE) {
                subscriber.property_has_changed(info.as_deref());
            }
        }
    }

    fn notify_property_read(&self) {
        let info = self.info.borrow().clone();
        let subscribers = self.subscribers.borrow().clone();
        let registry = self.ctx.registry();
        for subscriber in subscribers.into_iter().filter_map(|id| registry.get(id)) {
            if subscriber.capabilities().contains(Capabilities::READ) {
                subscriber.property_read(info.as_deref());
            }
        }
    }

    fn record_dependent_update(&self) {
        if let Some(elmt_id) = self.ctx.element_id_to_account_for() {
            if self.dependent_elmt_ids.borrow_mut().insert(elmt_id) {
                tracing::debug!(id = %self.id, %elmt_id, "ObservedProperty: record dependent element");
            }
        }
    }

    fn release(&self) {
        if self.deleted.replace(true) {
            return;
        }
        tracing::debug!(id = %self.id, info = self.info.borrow().as_deref(), "ObservedProperty: about to be deleted");
        match &self.backing {
            Backing::Owned(slot) => {
                if T::IS_OBJECT {
                    slot.borrow().remove_owning_property(self.id);
                }
            }
            Backing::TwoWay(source) => {
                source.unlink_subscriber(self.id);
                if T::IS_OBJECT {
                    source.get_unmonitored().remove_owning_property(self.id);
                }
            }
            Backing::OneWay { source, .. } => {
                let taken = source.borrow_mut().take();
                if let Some(source) = taken {
                    source.unlink_subscriber(self.id);
                }
            }
        }
        self.subscribers.borrow_mut().clear();
        self.dependent_elmt_ids.borrow_mut().clear();
        self.ctx.registry().delete(self.id);
    }
}

impl<T: PropertyValue> Subscriber for PropertyInner<T> {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::VALUE_CHANGE
    }

    fn info(&self) -> Option<String> {
        self.info.borrow().clone()
    }

    fn has_changed(&self, new_value: &dyn Any) {
        self.on_change_notification(new_value);
    }
}

impl<T: PropertyValue> Drop for PropertyInner<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Type-erased view of an [`ObservedProperty`], used where properties of
/// different value types are kept together (a view's variables, a store).
pub trait StateVariable {
    fn id(&self) -> SubscriberId;
    fn info(&self) -> Option<String>;
    fn kind(&self) -> PropertyKind;
    fn number_of_subscribers(&self) -> usize;
    fn mark_dependent_elements_dirty(&self, view: &View);
    fn purge_dependency_on_elmt_id(&self, elmt_id: ElementId);
    fn about_to_be_deleted(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T: PropertyValue> StateVariable for ObservedProperty<T> {
    fn id(&self) -> SubscriberId {
        ObservedProperty::id(self)
    }

    fn info(&self) -> Option<String> {
        ObservedProperty::info(self)
    }

    fn kind(&self) -> PropertyKind {
        ObservedProperty::kind(self)
    }

    fn number_of_subscribers(&self) -> usize {
        ObservedProperty::number_of_subscribers(self)
    }

    fn mark_dependent_elements_dirty(&self, view: &View) {
        ObservedProperty::mark_dependent_elements_dirty(self, view);
    }

    fn purge_dependency_on_elmt_id(&self, elmt_id: ElementId) {
        ObservedProperty::purge_dependency_on_elmt_id(self, elmt_id);
    }

    fn about_to_be_deleted(&self) {
        ObservedProperty::about_to_be_deleted(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
