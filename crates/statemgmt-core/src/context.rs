#![forbid(unsafe_code)]

//! The explicitly constructed context every property, object wrapper, view
//! and store is built from.
//!
//! A host creates one `StateContext` at startup and hands clones of it
//! around. Properties created from different contexts never see each other's
//! subscribers.

use std::fmt;
use std::rc::Rc;

use crate::config::StateConfig;
use crate::registry::SubscriberRegistry;
use crate::tracker::{ElementId, ElementTracker, ViewStackProcessor};

struct ContextInner {
    registry: SubscriberRegistry,
    tracker: Rc<dyn ElementTracker>,
    config: StateConfig,
}

/// Shared handle to a registry, element tracker and configuration.
///
/// Cloning is cheap and yields a handle to the same context.
#[derive(Clone)]
pub struct StateContext {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for StateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateContext")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Default for StateContext {
    fn default() -> Self {
        Self::new(Rc::new(ViewStackProcessor::new()), StateConfig::default())
    }
}

impl StateContext {
    #[must_use]
    pub fn new(tracker: Rc<dyn ElementTracker>, config: StateConfig) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                registry: SubscriberRegistry::new(),
                tracker,
                config,
            }),
        }
    }

    /// Context with a fresh [`ViewStackProcessor`] and the given config.
    #[must_use]
    pub fn with_config(config: StateConfig) -> Self {
        Self::new(Rc::new(ViewStackProcessor::new()), config)
    }

    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn tracker(&self) -> &dyn ElementTracker {
        self.inner.tracker.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &StateConfig {
        &self.inner.config
    }

    /// Element whose render function is running, if dependency recording is
    /// enabled for this context.
    #[must_use]
    pub fn element_id_to_account_for(&self) -> Option<ElementId> {
        if self.inner.config.update_mode.records_dependencies() {
            self.inner.tracker.element_id_to_account_for()
        } else {
            None
        }
    }

    /// Whether two handles refer to the same context.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdateMode;

    #[test]
    fn clones_share_registry() {
        let ctx = StateContext::default();
        let other = ctx.clone();
        let id = ctx.registry().make_id();
        assert!(other.registry().make_id() > id);
        assert!(ctx.ptr_eq(&other));
        assert!(!ctx.ptr_eq(&StateContext::default()));
    }

    #[test]
    fn full_update_mode_hides_recording() {
        let vsp = Rc::new(ViewStackProcessor::new());
        let ctx = StateContext::new(
            vsp.clone(),
            StateConfig::default().with_update_mode(UpdateMode::Full),
        );
        vsp.start_get_access_recording_for(ElementId(3));
        assert_eq!(ctx.element_id_to_account_for(), None);
        assert_eq!(ctx.tracker().element_id_to_account_for(), Some(ElementId(3)));
    }
}
