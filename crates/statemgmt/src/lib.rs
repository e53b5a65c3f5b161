#![forbid(unsafe_code)]

//! Observable state management for declarative views.
//!
//! This crate is the stable surface: the core property and view types are
//! re-exported at the root, the app-level stores live behind the `storage`
//! feature.
//!
//! ```
//! use std::rc::Rc;
//! use statemgmt::prelude::*;
//!
//! let ctx = StateContext::default();
//! let view = View::new(&ctx, "Counter", Rc::new(HeadlessNativeView::new()), None);
//! let count = view.create_state(0, "count");
//! let link = view.create_link(&count, "shown").unwrap();
//!
//! link.set(1);
//! assert_eq!(count.get_unmonitored(), 1);
//! ```

pub use statemgmt_core::*;

#[cfg(feature = "storage")]
pub use statemgmt_storage as storage;

pub mod prelude {
    pub use statemgmt_core::{
        ElementId, HeadlessNativeView, LocalStorage, NativeView, ObservedClass, ObservedObject,
        ObservedProperty, PropertyKind, PropertyValue, StateConfig, StateContext, StateError,
        UpdateMode, View, observed_class,
    };

    #[cfg(feature = "storage")]
    pub use statemgmt_storage::{
        AppStorage, DistributedStorage, Environment, KeyValueBackend, MemoryBackend,
        PersistentStorage, StorageError,
    };
}
