#![forbid(unsafe_code)]

//! Render-output (element) identifiers and the access-recording boundary.
//!
//! The element tree lives outside this crate. What the property graph needs
//! from it is small: a way to allocate ids for new render outputs, and the id
//! of the output currently being produced so a monitored read can be
//! attributed to it. [`ElementTracker`] is that boundary;
//! [`ViewStackProcessor`] is the in-process implementation used by headless
//! hosts and tests.
//!
//! Ids are allocated in increasing order, so an output created while its
//! parent renders always has a larger id than the parent.

use std::cell::{Cell, RefCell};
use std::fmt;

/// Opaque id of one (re)renderable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub u64);

impl ElementId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-side element id allocation and read attribution.
pub trait ElementTracker {
    /// Allocate the id for the next render output.
    fn allocate_element_id(&self) -> ElementId;

    /// The output whose render function is executing right now, if any.
    fn element_id_to_account_for(&self) -> Option<ElementId>;

    /// Attribute subsequent monitored reads to `id`.
    fn start_get_access_recording_for(&self, id: ElementId);

    /// Stop attributing reads to the id passed to the matching start call.
    fn stop_get_access_recording(&self);
}

/// Stack-based [`ElementTracker`]. Nested recordings (a child created while
/// the parent renders) attribute reads to the innermost output.
#[derive(Debug, Default)]
pub struct ViewStackProcessor {
    next_id: Cell<u64>,
    recording: RefCell<Vec<ElementId>>,
}

impl ViewStackProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start allocating at `first`. Useful when several processors must not
    /// hand out overlapping ids.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_id: Cell::new(first),
            recording: RefCell::new(Vec::new()),
        }
    }

    /// Depth of the recording stack.
    #[must_use]
    pub fn recording_depth(&self) -> usize {
        self.recording.borrow().len()
    }
}

impl ElementTracker for ViewStackProcessor {
    fn allocate_element_id(&self) -> ElementId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        ElementId(id)
    }

    fn element_id_to_account_for(&self) -> Option<ElementId> {
        self.recording.borrow().last().copied()
    }

    fn start_get_access_recording_for(&self, id: ElementId) {
        self.recording.borrow_mut().push(id);
    }

    fn stop_get_access_recording(&self) {
        if self.recording.borrow_mut().pop().is_none() {
            tracing::warn!("ViewStackProcessor: stop_get_access_recording without matching start");
        }
    }
}
