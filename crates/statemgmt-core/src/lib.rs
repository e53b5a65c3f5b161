#![forbid(unsafe_code)]

//! Observable-property graph and dependency tracking for declarative UI.
//!
//! - [`SubscriberRegistry`]: id → subscriber directory every notification
//!   goes through.
//! - [`ObservedObject`]: change-detecting wrapper for structured values.
//! - [`ObservedProperty`]: a state slot and its synchronized variants
//!   (two-way `Link`, one-way `Prop`, nested object).
//! - [`View`]: a component instance keeping the element id → update function
//!   map and the set of dirty elements.
//! - [`LocalStorage`]: name-indexed properties shared between views.
//!
//! # Architecture
//!
//! Everything is single-threaded and synchronous. Handles are `Rc` based and
//! cheap to clone. Nodes of the graph refer to each other by
//! [`SubscriberId`] and resolve ids through the [`StateContext`] they were
//! created from, so no reference cycles form between properties and views.
//!
//! A value change fans out immediately; re-rendering does not. Properties
//! remember the elements that read them during render and mark them dirty
//! when the host calls [`View::rerender`].

pub mod config;
pub mod context;
pub mod error;
pub mod object;
pub mod property;
pub mod registry;
pub mod store;
pub mod tracker;
pub mod value;
pub mod view;

pub use config::{StateConfig, UPDATE_MODE_ENV, UpdateMode};
pub use context::StateContext;
pub use error::{Result, StateError};
pub use object::{ObjectValue, ObservedClass, ObservedObject};
pub use property::{ObservedProperty, PropertyKind, StateVariable};
pub use registry::{Capabilities, Subscriber, SubscriberId, SubscriberRegistry};
pub use store::LocalStorage;
pub use tracker::{ElementId, ElementTracker, ViewStackProcessor};
pub use value::PropertyValue;
pub use view::{HeadlessNativeView, NativeView, UpdateFunc, View, WatchCallback};
