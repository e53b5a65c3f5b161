#![forbid(unsafe_code)]

//! Renderable component instances and their dirty-element bookkeeping.
//!
//! # Design
//!
//! A [`View`] subscribes to every state variable it creates. A change reaches
//! it as `view_property_has_changed`: the watch callback for that variable
//! runs and the host is asked once per cycle to schedule an update. The host
//! then calls [`rerender`](View::rerender), which lets every variable mark its
//! dependent elements dirty and re-executes exactly those update functions.
//!
//! The host side of a view (scheduling, instance ids, the global list of
//! removed elements) is the [`NativeView`] trait. [`HeadlessNativeView`]
//! implements it in-process.
//!
//! # Invariants
//!
//! 1. Dirty elements are updated in ascending id order, so a parent runs
//!    before the children created during its render.
//! 2. Elements the host reports as deleted are purged (update function,
//!    variable dependencies, dirty mark) before any update function runs.
//! 3. In [`UpdateMode::Full`](crate::UpdateMode::Full) every change marks
//!    every element of the view dirty.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::config::UpdateMode;
use crate::context::StateContext;
use crate::error::{Result, StateError};
use crate::object::{ObjectValue, ObservedClass, ObservedObject};
use crate::property::{ObservedProperty, PropertyKind, StateVariable};
use crate::registry::{Capabilities, Subscriber, SubscriberId};
use crate::store::LocalStorage;
use crate::tracker::ElementId;
use crate::value::PropertyValue;

/// Update function of one element: `(elmt_id, is_first_render)`.
pub type UpdateFunc = Rc<dyn Fn(ElementId, bool)>;

/// Watch callback, called with the name of the changed variable.
pub type WatchCallback = Rc<dyn Fn(&str)>;

/// Host-side services a view relies on. All methods default to no-ops.
pub trait NativeView {
    /// Ask the host to schedule [`View::rerender`].
    fn mark_need_update(&self) {}

    fn sync_instance_id(&self) {}

    fn restore_instance_id(&self) {}

    /// Element ids removed from the element tree since they were last purged.
    fn get_deleted_elmt_ids(&self) -> Vec<ElementId> {
        Vec::new()
    }

    /// The view has forgotten `purged`.
    fn deleted_elmt_ids_have_been_purged(&self, _purged: &[ElementId]) {}

    /// The update function of `elmt_id` has run.
    fn finish_update_func(&self, _elmt_id: ElementId) {}
}

/// In-process [`NativeView`] that records what the view asked of it.
#[derive(Debug, Default)]
pub struct HeadlessNativeView {
    need_update_requests: Cell<usize>,
    instance_id_syncs: Cell<usize>,
    deleted: RefCell<Vec<ElementId>>,
    purged: RefCell<Vec<ElementId>>,
    finished: RefCell<Vec<ElementId>>,
}

impl HeadlessNativeView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `ids` as removed from the element tree.
    pub fn mark_deleted(&self, ids: impl IntoIterator<Item = ElementId>) {
        self.deleted.borrow_mut().extend(ids);
    }

    #[must_use]
    pub fn need_update_requests(&self) -> usize {
        self.need_update_requests.get()
    }

    #[must_use]
    pub fn instance_id_syncs(&self) -> usize {
        self.instance_id_syncs.get()
    }

    #[must_use]
    pub fn purged_elmt_ids(&self) -> Vec<ElementId> {
        self.purged.borrow().clone()
    }

    /// Elements whose update function finished, in execution order.
    #[must_use]
    pub fn finished_updates(&self) -> Vec<ElementId> {
        self.finished.borrow().clone()
    }
}

impl NativeView for HeadlessNativeView {
    fn mark_need_update(&self) {
        self.need_update_requests.set(self.need_update_requests.get() + 1);
    }

    fn sync_instance_id(&self) {
        self.instance_id_syncs.set(self.instance_id_syncs.get() + 1);
    }

    fn get_deleted_elmt_ids(&self) -> Vec<ElementId> {
        self.deleted.borrow().clone()
    }

    fn deleted_elmt_ids_have_been_purged(&self, purged: &[ElementId]) {
        self.deleted.borrow_mut().retain(|id| !purged.contains(id));
        self.purged.borrow_mut().extend_from_slice(purged);
    }

    fn finish_update_func(&self, elmt_id: ElementId) {
        self.finished.borrow_mut().push(elmt_id);
    }
}

struct ViewInner {
    id: SubscriberId,
    name: String,
    ctx: StateContext,
    native: Rc<dyn NativeView>,
    watched_props: RefCell<AHashMap<String, WatchCallback>>,
    provided_vars: RefCell<AHashMap<String, Rc<dyn StateVariable>>>,
    dirty_elmt_ids: RefCell<BTreeSet<ElementId>>,
    update_funcs: RefCell<BTreeMap<ElementId, UpdateFunc>>,
    variables: RefCell<Vec<Rc<dyn StateVariable>>>,
    local_storage: RefCell<Option<LocalStorage>>,
    need_update_requested: Cell<bool>,
    deleted: Cell<bool>,
}

/// A component instance: owns state variables, subscribes to them and keeps
/// the element id → update function map.
///
/// Cloning yields another handle to the same view.
#[derive(Clone)]
pub struct View {
    inner: Rc<ViewInner>,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("dirty", &*self.inner.dirty_elmt_ids.borrow())
            .field("elements", &self.inner.update_funcs.borrow().len())
            .field("variables", &self.inner.variables.borrow().len())
            .finish()
    }
}

impl View {
    fn build(
        ctx: &StateContext,
        name: &str,
        native: Rc<dyn NativeView>,
        provided_vars: AHashMap<String, Rc<dyn StateVariable>>,
        local_storage: Option<LocalStorage>,
    ) -> Self {
        let inner = Rc::new(ViewInner {
            id: ctx.registry().make_id(),
            name: name.to_owned(),
            ctx: ctx.clone(),
            native,
            watched_props: RefCell::new(AHashMap::new()),
            provided_vars: RefCell::new(provided_vars),
            dirty_elmt_ids: RefCell::new(BTreeSet::new()),
            update_funcs: RefCell::new(BTreeMap::new()),
            variables: RefCell::new(Vec::new()),
            local_storage: RefCell::new(local_storage),
            need_update_requested: Cell::new(false),
            deleted: Cell::new(false),
        });
        ctx.registry().add(&inner);
        tracing::debug!(id = %inner.id, view = name, "View: created");
        Self { inner }
    }

    /// Create a top-level view, optionally with the `LocalStorage` it and
    /// its descendants share.
    pub fn new(
        ctx: &StateContext,
        name: &str,
        native: Rc<dyn NativeView>,
        local_storage: Option<LocalStorage>,
    ) -> Self {
        Self::build(ctx, name, native, AHashMap::new(), local_storage)
    }

    /// Create a child view. It sees every variable provided by `parent` and
    /// its ancestors, and shares their `LocalStorage`.
    pub fn new_child(parent: &View, name: &str, native: Rc<dyn NativeView>) -> Self {
        let provided = parent.inner.provided_vars.borrow().clone();
        Self::build(
            &parent.inner.ctx,
            name,
            native,
            provided,
            Some(parent.local_storage()),
        )
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn context(&self) -> &StateContext {
        &self.inner.ctx
    }

    /// First render of a new element: allocate its id, run `update_func`
    /// with reads attributed to that id, then keep it for later updates.
    pub fn observe_component_creation(&self, update_func: impl Fn(ElementId, bool) + 'static) -> ElementId {
        let tracker = self.inner.ctx.tracker();
        let elmt_id = tracker.allocate_element_id();
        let update_func: UpdateFunc = Rc::new(update_func);
        tracing::debug!(view = %self.inner.name, %elmt_id, "View: first render start");
        tracker.start_get_access_recording_for(elmt_id);
        update_func(elmt_id, true);
        tracker.stop_get_access_recording();
        self.inner.update_funcs.borrow_mut().insert(elmt_id, update_func);
        elmt_id
    }

    /// Add `elmt_id` to the dirty set.
    pub fn mark_element_dirty_by_id(&self, elmt_id: ElementId) {
        let first = {
            let mut dirty = self.inner.dirty_elmt_ids.borrow_mut();
            let was_empty = dirty.is_empty();
            dirty.insert(elmt_id) && was_empty
        };
        if first {
            self.inner.request_update();
        }
    }

    /// Element ids currently marked dirty, ascending.
    #[must_use]
    pub fn dirty_element_ids(&self) -> Vec<ElementId> {
        self.inner.dirty_elmt_ids.borrow().iter().copied().collect()
    }

    /// Element ids with a registered update function, ascending.
    #[must_use]
    pub fn element_ids(&self) -> Vec<ElementId> {
        self.inner.update_funcs.borrow().keys().copied().collect()
    }

    /// A variable of this view changed.
    pub fn view_property_has_changed(&self, var_name: Option<&str>) {
        self.inner.view_property_has_changed(var_name);
    }

    /// Let every variable mark its dependent elements dirty, then update the
    /// dirty elements.
    pub fn rerender(&self) {
        let variables = self.inner.variables.borrow().clone();
        for var in &variables {
            var.mark_dependent_elements_dirty(self);
        }
        self.update_dirty_elements();
    }

    /// Run the update function of every dirty element in ascending id order.
    pub fn update_dirty_elements(&self) {
        self.inner.need_update_requested.set(false);
        if self.inner.dirty_elmt_ids.borrow().is_empty() {
            tracing::debug!(view = %self.inner.name, "View: no dirty elements");
            return;
        }

        let deleted = self.inner.native.get_deleted_elmt_ids();
        self.purge_deleted_elmt_ids(&deleted);

        let dirty = std::mem::take(&mut *self.inner.dirty_elmt_ids.borrow_mut());
        tracing::debug!(view = %self.inner.name, ?dirty, "View: update dirty elements");
        let tracker = self.inner.ctx.tracker();
        for elmt_id in dirty {
            let update_func = self.inner.update_funcs.borrow().get(&elmt_id).cloned();
            let Some(update_func) = update_func else {
                tracing::error!(
                    view = %self.inner.name,
                    %elmt_id,
                    "View: update function of element not found"
                );
                continue;
            };
            tracker.start_get_access_recording_for(elmt_id);
            update_func(elmt_id, false);
            tracker.stop_get_access_recording();
            self.inner.native.finish_update_func(elmt_id);
        }
    }

    /// Forget every element in `rm_elmt_ids` that this view owns: its update
    /// function, its dirty mark and every variable's dependency on it.
    pub fn purge_deleted_elmt_ids(&self, rm_elmt_ids: &[ElementId]) {
        if rm_elmt_ids.is_empty() {
            return;
        }
        let mut removed = Vec::new();
        for &elmt_id in rm_elmt_ids {
            let owned = self.inner.update_funcs.borrow_mut().remove(&elmt_id).is_some();
            if owned {
                self.purge_variable_dependencies_on_elmt_id(elmt_id);
                self.inner.dirty_elmt_ids.borrow_mut().remove(&elmt_id);
                removed.push(elmt_id);
            }
        }
        tracing::debug!(view = %self.inner.name, ?removed, "View: purged deleted elements");
        self.inner.native.deleted_elmt_ids_have_been_purged(&removed);
    }

    pub fn purge_variable_dependencies_on_elmt_id(&self, elmt_id: ElementId) {
        let variables = self.inner.variables.borrow().clone();
        for var in variables {
            var.purge_dependency_on_elmt_id(elmt_id);
        }
    }

    /// Call `callback` whenever variable `var_name` changes.
    pub fn declare_watch(&self, var_name: &str, callback: impl Fn(&str) + 'static) {
        self.inner
            .watched_props
            .borrow_mut()
            .insert(var_name.to_owned(), Rc::new(callback));
    }

    /// Make `prop` available to descendants created after this call.
    ///
    /// # Errors
    ///
    /// [`StateError::DuplicateProvide`] if this view or an ancestor already
    /// provides `name`.
    pub fn add_provided_var<T: PropertyValue>(&self, name: &str, prop: &ObservedProperty<T>) -> Result<()> {
        let mut provided = self.inner.provided_vars.borrow_mut();
        if provided.contains_key(name) {
            return Err(StateError::DuplicateProvide { name: name.to_owned() });
        }
        provided.insert(name.to_owned(), Rc::new(prop.clone()));
        Ok(())
    }

    /// Two-way link to the variable an ancestor provides as `provided_name`.
    ///
    /// # Errors
    ///
    /// [`StateError::MissingProvide`] if nothing is provided under that name,
    /// [`StateError::TypeMismatch`] if it holds another value type.
    pub fn initialize_consume<T: PropertyValue>(
        &self,
        provided_name: &str,
        consume_var_name: &str,
    ) -> Result<ObservedProperty<T>> {
        let provided = self
            .inner
            .provided_vars
            .borrow()
            .get(provided_name)
            .cloned()
            .ok_or_else(|| StateError::MissingProvide {
                name: provided_name.to_owned(),
            })?;
        let source = provided
            .as_any()
            .downcast_ref::<ObservedProperty<T>>()
            .ok_or_else(|| StateError::type_mismatch::<T>(provided_name))?;
        let link = source.create_link(Some(self.inner.id), Some(consume_var_name))?;
        self.register_variable(&link);
        Ok(link)
    }

    /// Track `prop` as a variable of this view: it takes part in
    /// [`rerender`](Self::rerender) and is deleted with the view.
    pub fn register_variable<T: PropertyValue>(&self, prop: &ObservedProperty<T>) {
        self.inner.variables.borrow_mut().push(Rc::new(prop.clone()));
    }

    /// Own a new `State` variable.
    pub fn create_state<T: PropertyValue>(&self, value: T, name: &str) -> ObservedProperty<T> {
        let prop = ObservedProperty::new(&self.inner.ctx, value, Some(self.inner.id), Some(name));
        self.register_variable(&prop);
        prop
    }

    /// Own a new object `State` variable over a raw or wrapped object.
    pub fn create_object_state<S: ObservedClass>(
        &self,
        value: impl Into<ObjectValue<S>>,
        name: &str,
    ) -> ObservedProperty<ObservedObject<S>> {
        let prop = ObservedProperty::new_object(&self.inner.ctx, value, Some(self.inner.id), Some(name));
        self.register_variable(&prop);
        prop
    }

    /// Two-way variable over a parent's property.
    ///
    /// # Errors
    ///
    /// As [`ObservedProperty::create_link`].
    pub fn create_link<T: PropertyValue>(&self, source: &ObservedProperty<T>, name: &str) -> Result<ObservedProperty<T>> {
        let link = source.create_link(Some(self.inner.id), Some(name))?;
        self.register_variable(&link);
        Ok(link)
    }

    /// One-way variable over a parent's property. Unlike
    /// [`ObservedProperty::create_prop`], the source may itself be a plain
    /// `Prop`.
    ///
    /// # Errors
    ///
    /// [`StateError::PropFromObject`] for object-typed sources.
    pub fn create_prop<T: PropertyValue>(&self, source: &ObservedProperty<T>, name: &str) -> Result<ObservedProperty<T>> {
        if T::IS_OBJECT {
            return Err(StateError::PropFromObject { info: name.to_owned() });
        }
        let prop = ObservedProperty::new_one_way(source, PropertyKind::Prop, Some(self.inner.id), Some(name));
        self.register_variable(&prop);
        Ok(prop)
    }

    /// Variable bound directly to an object shared with the parent.
    pub fn create_nested_object<S: ObservedClass>(
        &self,
        obj: &ObservedObject<S>,
        name: &str,
    ) -> ObservedProperty<ObservedObject<S>> {
        let prop = ObservedProperty::new_nested(&self.inner.ctx, obj, Some(self.inner.id), Some(name));
        self.register_variable(&prop);
        prop
    }

    /// Two-way variable over `key` of an app-wide store, created with
    /// `default` if missing.
    ///
    /// # Errors
    ///
    /// As [`LocalStorage::set_and_link`].
    pub fn create_storage_link<T: PropertyValue>(
        &self,
        storage: &LocalStorage,
        key: &str,
        default: T,
        name: &str,
    ) -> Result<ObservedProperty<T>> {
        let link = storage.set_and_link(key, default, Some(self.inner.id), Some(name))?;
        self.register_variable(&link);
        Ok(link)
    }

    /// One-way variable over `key` of an app-wide store.
    ///
    /// # Errors
    ///
    /// As [`LocalStorage::set_and_prop`].
    pub fn create_storage_prop<T: PropertyValue>(
        &self,
        storage: &LocalStorage,
        key: &str,
        default: T,
        name: &str,
    ) -> Result<ObservedProperty<T>> {
        let prop = storage.set_and_prop(key, default, Some(self.inner.id), Some(name))?;
        self.register_variable(&prop);
        Ok(prop)
    }

    /// [`create_storage_link`](Self::create_storage_link) over this view's
    /// `LocalStorage`.
    ///
    /// # Errors
    ///
    /// As [`LocalStorage::set_and_link`].
    pub fn create_local_storage_link<T: PropertyValue>(
        &self,
        key: &str,
        default: T,
        name: &str,
    ) -> Result<ObservedProperty<T>> {
        let storage = self.local_storage();
        self.create_storage_link(&storage, key, default, name)
    }

    /// [`create_storage_prop`](Self::create_storage_prop) over this view's
    /// `LocalStorage`.
    ///
    /// # Errors
    ///
    /// As [`LocalStorage::set_and_prop`].
    pub fn create_local_storage_prop<T: PropertyValue>(
        &self,
        key: &str,
        default: T,
        name: &str,
    ) -> Result<ObservedProperty<T>> {
        let storage = self.local_storage();
        self.create_storage_prop(&storage, key, default, name)
    }

    /// The `LocalStorage` shared with ancestors. A view created without one
    /// gets an empty instance on first access.
    pub fn local_storage(&self) -> LocalStorage {
        let mut slot = self.inner.local_storage.borrow_mut();
        slot.get_or_insert_with(|| {
            tracing::warn!(
                view = %self.inner.name,
                "View: accessing LocalStorage without being provided an instance, creating a default one"
            );
            LocalStorage::new(&self.inner.ctx)
        })
        .clone()
    }

    /// Delete every variable, forget all elements and unregister.
    pub fn about_to_be_deleted(&self) {
        self.inner.release();
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.inner.deleted.get()
    }
}

impl ViewInner {
    fn request_update(&self) {
        if !self.need_update_requested.replace(true) {
            self.native.mark_need_update();
        }
    }

    fn view_property_has_changed(&self, var_name: Option<&str>) {
        tracing::debug!(view = %self.name, var = var_name, "View: property has changed");
        self.native.sync_instance_id();

        if let Some(var_name) = var_name {
            let callback = self.watched_props.borrow().get(var_name).cloned();
            if let Some(callback) = callback {
                tracing::debug!(view = %self.name, var = var_name, "View: calling watch callback");
                callback(var_name);
            }
        }

        if self.ctx.config().update_mode == UpdateMode::Full {
            let all: Vec<ElementId> = self.update_funcs.borrow().keys().copied().collect();
            self.dirty_elmt_ids.borrow_mut().extend(all);
        }
        self.request_update();

        self.native.restore_instance_id();
    }

    fn release(&self) {
        if self.deleted.replace(true) {
            return;
        }
        tracing::debug!(id = %self.id, view = %self.name, "View: about to be deleted");
        let variables = std::mem::take(&mut *self.variables.borrow_mut());
        for var in &variables {
            var.about_to_be_deleted();
        }
        self.update_funcs.borrow_mut().clear();
        self.dirty_elmt_ids.borrow_mut().clear();
        self.watched_props.borrow_mut().clear();
        self.provided_vars.borrow_mut().clear();
        self.ctx.registry().delete(self.id);
    }
}

impl Subscriber for ViewInner {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::VIEW
    }

    fn info(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn view_property_has_changed(&self, info: Option<&str>) {
        ViewInner::view_property_has_changed(self, info);
    }
}

impl Drop for ViewInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Downcast a type-erased variable back to its property handle.
#[must_use]
pub fn downcast_variable<T: PropertyValue>(var: &dyn StateVariable) -> Option<&ObservedProperty<T>> {
    let any: &dyn Any = var.as_any();
    any.downcast_ref::<ObservedProperty<T>>()
}
