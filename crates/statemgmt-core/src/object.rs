#![forbid(unsafe_code)]

//! Change-detecting wrapper for structured values.
//!
//! [`ObservedObject<S>`] holds a raw record `S` together with the ids of the
//! properties that own it. Reads pass straight through; a field write that
//! changes the field notifies every owner (`has_changed` with the wrapper
//! itself, then `property_has_changed` with the field name).
//!
//! # Design
//!
//! Field interception is explicit: [`write_field`](ObservedObject::write_field)
//! is the single write channel and [`observed_class!`](crate::observed_class)
//! generates a getter/setter pair per field on top of it. Owner bookkeeping
//! goes through [`add_owning_property`](ObservedObject::add_owning_property)
//! and [`remove_owning_property`](ObservedObject::remove_owning_property), two
//! ordinary methods.
//!
//! # Invariants
//!
//! 1. Equality is identity: two wrappers are equal only if they are clones of
//!    the same handle, whatever their field values.
//! 2. Only types implementing [`ObservedClass`] can be wrapped, and
//!    `ObservedObject` never implements it: wrapping a wrapper does not
//!    compile.
//! 3. A write that leaves the field equal to its previous value notifies
//!    nobody.
//!
//! # Failure Modes
//!
//! - **Re-entrant access from `read`**: calling a setter from inside the
//!   closure passed to [`read`](ObservedObject::read) panics on the `RefCell`
//!   borrow. Setters never hold the borrow while notifying, so owners may read
//!   and write freely from their change hooks.
//! - **Values obtained through [`get_raw_object`](ObservedObject::get_raw_object)**
//!   are not tracked; mutations through a clone of them are invisible. The
//!   returned guard holds the borrow, so a field write while it is alive
//!   panics just like one from inside `read`.

use std::any::Any;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::context::StateContext;
use crate::registry::{Capabilities, SubscriberId};

/// Marker for record types that may be wrapped in an [`ObservedObject`].
///
/// Implemented by [`observed_class!`](crate::observed_class), or by hand with
/// an empty impl.
pub trait ObservedClass: fmt::Debug + 'static {}

struct ObjectInner<S> {
    raw: RefCell<S>,
    owners: RefCell<Vec<SubscriberId>>,
    ctx: StateContext,
}

/// Identity-compared, change-detecting handle over a raw record.
pub struct ObservedObject<S: ObservedClass> {
    inner: Rc<ObjectInner<S>>,
}

impl<S: ObservedClass> Clone for ObservedObject<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: ObservedClass> PartialEq for ObservedObject<S> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S: ObservedClass> Eq for ObservedObject<S> {}

impl<S: ObservedClass> fmt::Debug for ObservedObject<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ObservedObject");
        match self.inner.raw.try_borrow() {
            Ok(raw) => out.field("raw", &*raw),
            Err(_) => out.field("raw", &"<borrowed>"),
        };
        out.field("owners", &*self.inner.owners.borrow()).finish()
    }
}

/// Raw-or-wrapped input accepted wherever an object value is stored.
#[derive(Debug)]
pub enum ObjectValue<S: ObservedClass> {
    Raw(S),
    Wrapped(ObservedObject<S>),
}

impl<S: ObservedClass> ObjectValue<S> {
    /// Whether the value already is an [`ObservedObject`].
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        matches!(self, Self::Wrapped(_))
    }
}

impl<S: ObservedClass> From<S> for ObjectValue<S> {
    fn from(raw: S) -> Self {
        Self::Raw(raw)
    }
}

impl<S: ObservedClass> From<ObservedObject<S>> for ObjectValue<S> {
    fn from(obj: ObservedObject<S>) -> Self {
        Self::Wrapped(obj)
    }
}

impl<S: ObservedClass> From<&ObservedObject<S>> for ObjectValue<S> {
    fn from(obj: &ObservedObject<S>) -> Self {
        Self::Wrapped(obj.clone())
    }
}

impl<S: ObservedClass> ObservedObject<S> {
    /// Wrap `raw` with an empty owner set.
    #[must_use]
    pub fn new(ctx: &StateContext, raw: S) -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                raw: RefCell::new(raw),
                owners: RefCell::new(Vec::new()),
                ctx: ctx.clone(),
            }),
        }
    }

    /// Wrap a raw value, or reuse an existing wrapper, and register `owner`.
    ///
    /// An already wrapped value is returned as is with `owner` added to its
    /// owner set, so several properties may own the same object.
    pub fn create_new(
        ctx: &StateContext,
        value: impl Into<ObjectValue<S>>,
        owner: Option<SubscriberId>,
    ) -> Self {
        let obj = match value.into() {
            ObjectValue::Wrapped(obj) => obj,
            ObjectValue::Raw(raw) => Self::new(ctx, raw),
        };
        if let Some(owner) = owner {
            obj.add_owning_property(owner);
        }
        obj
    }

    /// Whether `value` is an `ObservedObject<S>`.
    #[must_use]
    pub fn is_observed_object(value: &dyn Any) -> bool {
        value.is::<Self>()
    }

    /// Pass-through read of the raw value.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.raw.borrow())
    }

    /// Borrow the raw value without change tracking.
    ///
    /// Do not keep clones of it around for comparison with wrapped values.
    ///
    /// # Panics
    ///
    /// Writing a field while the returned guard is alive panics with a
    /// borrow error. Drop the guard first.
    #[must_use]
    pub fn get_raw_object(&self) -> Ref<'_, S> {
        self.inner.raw.borrow()
    }

    /// Write one field and notify the owners if it changed.
    ///
    /// `project` selects the field; `name` is what `property_has_changed`
    /// subscribers receive. Returns whether the field changed.
    pub fn write_field<F: PartialEq>(
        &self,
        name: &str,
        project: impl FnOnce(&mut S) -> &mut F,
        value: F,
    ) -> bool {
        {
            let mut raw = self.inner.raw.borrow_mut();
            let slot = project(&mut *raw);
            if *slot == value {
                return false;
            }
            *slot = value;
        }
        tracing::debug!(field = name, "ObservedObject: field changed");
        self.notify_property_has_changed(name);
        true
    }

    /// Notify every owner that field `name` changed.
    ///
    /// Field writes call this; call it directly after mutating state the
    /// wrapper can not see (e.g. an element of a nested collection).
    pub fn notify_property_has_changed(&self, name: &str) {
        let owners = self.inner.owners.borrow().clone();
        let registry = self.inner.ctx.registry();
        for owner_id in owners {
            let Some(owner) = registry.get(owner_id) else {
                tracing::warn!(
                    id = %owner_id,
                    field = name,
                    "ObservedObject: notify: unknown owning property"
                );
                continue;
            };
            let caps = owner.capabilities();
            if caps.contains(Capabilities::VALUE_CHANGE) {
                owner.has_changed(self as &dyn Any);
            }
            if caps.contains(Capabilities::NAMED_CHANGE) {
                owner.property_has_changed(Some(name));
            }
        }
    }

    /// Add `owner` to the owner set (no-op if present).
    pub fn add_owning_property(&self, owner: SubscriberId) {
        let mut owners = self.inner.owners.borrow_mut();
        if !owners.contains(&owner) {
            owners.push(owner);
        }
    }

    /// Remove `owner` from the owner set. Returns whether it was present.
    pub fn remove_owning_property(&self, owner: SubscriberId) -> bool {
        let mut owners = self.inner.owners.borrow_mut();
        let before = owners.len();
        owners.retain(|id| *id != owner);
        owners.len() != before
    }

    /// Current owner ids in registration order.
    #[must_use]
    pub fn owning_properties(&self) -> Vec<SubscriberId> {
        self.inner.owners.borrow().clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Declare a record type that can live inside an [`ObservedObject`].
///
/// Generates the struct, its [`ObservedClass`] impl, and a trait with one
/// getter and one setter per field implemented for `ObservedObject<Name>`.
/// Setters return whether the value changed.
///
/// ```
/// use statemgmt_core::{observed_class, ObservedObject, StateContext};
///
/// observed_class! {
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Point: PointFields {
///         pub x: i32 => set_x,
///         pub y: i32 => set_y,
///     }
/// }
///
/// let ctx = StateContext::default();
/// let p = ObservedObject::new(&ctx, Point { x: 1, y: 2 });
/// assert!(!p.set_x(1));
/// assert!(p.set_x(5));
/// assert_eq!(p.x(), 5);
/// ```
#[macro_export]
macro_rules! observed_class {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $fields:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty => $setter:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::ObservedClass for $name {}

        $vis trait $fields {
            $(
                fn $field(&self) -> $ty;
                fn $setter(&self, value: $ty) -> bool;
            )*
        }

        impl $fields for $crate::ObservedObject<$name> {
            $(
                fn $field(&self) -> $ty {
                    self.read(|raw| ::std::clone::Clone::clone(&raw.$field))
                }

                fn $setter(&self, value: $ty) -> bool {
                    self.write_field(::std::stringify!($field), |raw| &mut raw.$field, value)
                }
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Subscriber;
    use std::cell::RefCell as StdRefCell;

    crate::observed_class! {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Sample: SampleFields {
            pub x: i32 => set_x,
            pub label: String => set_label,
        }
    }

    #[derive(Default)]
    struct Recorder {
        id: std::cell::Cell<u64>,
        changes: StdRefCell<Vec<bool>>,
        names: StdRefCell<Vec<String>>,
    }

    impl Subscriber for Recorder {
        fn id(&self) -> SubscriberId {
            SubscriberId(self.id.get())
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::VALUE_CHANGE | Capabilities::NAMED_CHANGE
        }

        fn has_changed(&self, new_value: &dyn Any) {
            self.changes
                .borrow_mut()
                .push(ObservedObject::<Sample>::is_observed_object(new_value));
        }

        fn property_has_changed(&self, info: Option<&str>) {
            self.names
                .borrow_mut()
                .push(info.unwrap_or_default().to_string());
        }
    }

    fn recorder(ctx: &StateContext) -> Rc<Recorder> {
        let rec = Rc::new(Recorder::default());
        rec.id.set(ctx.registry().make_id().raw());
        ctx.registry().add(&rec);
        rec
    }

    fn sample(ctx: &StateContext) -> ObservedObject<Sample> {
        ObservedObject::new(
            ctx,
            Sample {
                x: 1,
                label: "a".into(),
            },
        )
    }

    #[test]
    fn unchanged_write_is_silent() {
        let ctx = StateContext::default();
        let rec = recorder(&ctx);
        let obj = ObservedObject::<Sample>::create_new(
            &ctx,
            Sample {
                x: 1,
                label: "a".into(),
            },
            Some(rec.id()),
        );

        assert!(!obj.set_x(1));
        assert!(rec.changes.borrow().is_empty());
    }

    #[test]
    fn changed_write_notifies_with_wrapper_and_field_name() {
        let ctx = StateContext::default();
        let rec = recorder(&ctx);
        let obj = sample(&ctx);
        obj.add_owning_property(rec.id());

        assert!(obj.set_x(2));
        assert_eq!(*rec.changes.borrow(), vec![true]);
        assert_eq!(*rec.names.borrow(), vec!["x".to_string()]);
        assert_eq!(obj.x(), 2);
    }

    #[test]
    fn create_new_reuses_wrapper_and_adds_owner() {
        let ctx = StateContext::default();
        let obj = sample(&ctx);
        let a = ctx.registry().make_id();
        let b = ctx.registry().make_id();
        let first = ObservedObject::<Sample>::create_new(&ctx, obj.clone(), Some(a));
        let second = ObservedObject::<Sample>::create_new(&ctx, &first, Some(b));

        assert!(first.ptr_eq(&obj));
        assert!(second.ptr_eq(&obj));
        assert_eq!(obj.owning_properties(), vec![a, b]);
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn field_write_while_raw_guard_is_alive_panics() {
        let ctx = StateContext::default();
        let obj = sample(&ctx);
        let raw = obj.get_raw_object();
        obj.set_x(raw.x + 1);
    }

    #[test]
    fn equality_is_identity() {
        let ctx = StateContext::default();
        let a = sample(&ctx);
        let b = sample(&ctx);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(*a.get_raw_object(), *b.get_raw_object());
    }

    #[test]
    fn removed_owner_is_not_notified() {
        let ctx = StateContext::default();
        let rec = recorder(&ctx);
        let obj = sample(&ctx);
        obj.add_owning_property(rec.id());
        obj.add_owning_property(rec.id());
        assert_eq!(obj.owning_properties().len(), 1);

        assert!(obj.remove_owning_property(rec.id()));
        assert!(!obj.remove_owning_property(rec.id()));
        obj.set_label("b".into());
        assert!(rec.changes.borrow().is_empty());
    }

    #[test]
    fn unknown_owner_does_not_stop_delivery() {
        let ctx = StateContext::default();
        let obj = sample(&ctx);
        obj.add_owning_property(SubscriberId(9_999));
        let rec = recorder(&ctx);
        obj.add_owning_property(rec.id());

        obj.set_x(3);
        assert_eq!(rec.changes.borrow().len(), 1);
    }

    #[test]
    fn object_value_reports_wrapping() {
        let ctx = StateContext::default();
        let raw: ObjectValue<Sample> = Sample { x: 0, label: String::new() }.into();
        let wrapped: ObjectValue<Sample> = sample(&ctx).into();
        assert!(!raw.is_wrapped());
        assert!(wrapped.is_wrapped());
        assert!(!ObservedObject::<Sample>::is_observed_object(&5_i32));
    }
}
