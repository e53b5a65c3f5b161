//! End-to-end scenarios: a parent and child view sharing state through
//! links, props, nested objects and provided variables, driven through the
//! host-side rerender cycle.

use std::cell::RefCell;
use std::rc::Rc;

use statemgmt_core::{
    ElementId, HeadlessNativeView, ObservedObject, ObservedProperty, PropertyKind, StateContext,
    StateError, View, observed_class,
};

observed_class! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Todo: TodoFields {
        pub title: String => set_title,
        pub done: bool => set_done,
    }
}

fn headless_view(ctx: &StateContext, name: &str) -> (View, Rc<HeadlessNativeView>) {
    let native = Rc::new(HeadlessNativeView::new());
    (View::new(ctx, name, native.clone(), None), native)
}

/// Records which element ran and with what value.
type Log = Rc<RefCell<Vec<(ElementId, String)>>>;

#[test]
fn parent_state_reaches_child_link_and_prop() {
    let ctx = StateContext::default();
    let (parent, parent_native) = headless_view(&ctx, "Parent");
    let count = parent.create_state(0, "count");

    let child_native = Rc::new(HeadlessNativeView::new());
    let child = View::new_child(&parent, "Child", child_native.clone());
    let link = child.create_link(&count, "count").unwrap();
    let prop = child.create_prop(&count, "initial").unwrap();
    assert_eq!(prop.kind(), PropertyKind::Prop);

    let log: Log = Rc::default();
    let (l, link_in_render) = (log.clone(), link.clone());
    let link_elmt = child.observe_component_creation(move |id, _| {
        l.borrow_mut().push((id, format!("link={}", link_in_render.get())));
    });
    let (l, prop_in_render) = (log.clone(), prop.clone());
    let prop_elmt = child.observe_component_creation(move |id, _| {
        l.borrow_mut().push((id, format!("prop={}", prop_in_render.get())));
    });
    log.borrow_mut().clear();

    // Child writes through the link: parent state changes, prop follows.
    link.set(3);
    assert_eq!(count.get_unmonitored(), 3);
    assert_eq!(prop.get_unmonitored(), 3);
    assert_eq!(parent_native.need_update_requests(), 1);
    assert_eq!(child_native.need_update_requests(), 1);

    child.rerender();
    assert_eq!(
        *log.borrow(),
        vec![
            (link_elmt, "link=3".to_owned()),
            (prop_elmt, "prop=3".to_owned())
        ]
    );

    // Local prop writes stay local.
    log.borrow_mut().clear();
    prop.set(100);
    assert_eq!(count.get_unmonitored(), 3);
    child.rerender();
    assert_eq!(*log.borrow(), vec![(prop_elmt, "prop=100".to_owned())]);
}

#[test]
fn nested_object_field_write_updates_dependent_elements() {
    let ctx = StateContext::default();
    let (parent, _) = headless_view(&ctx, "List");
    let todo = parent.create_object_state::<Todo>(
        Todo {
            title: "write tests".into(),
            done: false,
        },
        "todo",
    );

    let child_native = Rc::new(HeadlessNativeView::new());
    let child = View::new_child(&parent, "Row", child_native.clone());
    let nested = child.create_nested_object(&todo.get_unmonitored(), "item");
    assert!(matches!(
        nested.create_prop(None, None),
        Err(StateError::PropFromObject { .. })
    ));

    let rendered = Rc::new(RefCell::new(Vec::new()));
    let (r, item) = (rendered.clone(), nested.clone());
    let row = child.observe_component_creation(move |_, _| {
        r.borrow_mut().push(item.get().done());
    });

    assert!(todo.get_unmonitored().set_done(true));
    assert!(!todo.get_unmonitored().set_done(true));
    child.rerender();

    assert_eq!(*rendered.borrow(), vec![false, true]);
    assert_eq!(child_native.finished_updates(), vec![row]);
}

#[test]
fn object_link_keeps_ownership_consistent_across_set() {
    let ctx = StateContext::default();
    let (parent, _) = headless_view(&ctx, "Parent");
    let first = ObservedObject::new(
        &ctx,
        Todo {
            title: "a".into(),
            done: false,
        },
    );
    let state = parent.create_object_state::<Todo>(&first, "todo");
    let (child, _) = headless_view(&ctx, "Child");
    let link = child.create_link(&state, "todo").unwrap();
    assert_eq!(first.owning_properties(), vec![state.id(), link.id()]);

    let second = ObservedObject::new(
        &ctx,
        Todo {
            title: "a".into(),
            done: false,
        },
    );
    link.set(second.clone());
    assert!(state.get_unmonitored().ptr_eq(&second));
    assert!(first.owning_properties().is_empty());
    assert_eq!(second.owning_properties(), vec![state.id(), link.id()]);

    link.about_to_be_deleted();
    assert_eq!(second.owning_properties(), vec![state.id()]);
}

#[test]
fn ascending_update_order_parent_before_children() {
    let ctx = StateContext::default();
    let (view, native) = headless_view(&ctx, "Tree");
    let trigger = view.create_state(0, "trigger");

    let child_ids = Rc::new(RefCell::new(Vec::new()));
    let (ids, v, t) = (child_ids.clone(), view.clone(), trigger.clone());
    let root = view.observe_component_creation(move |_, first| {
        let _ = t.get();
        if first {
            for _ in 0..2 {
                let t = t.clone();
                let child = v.observe_component_creation(move |_, _| {
                    let _ = t.get();
                });
                ids.borrow_mut().push(child);
            }
        }
    });
    let children = child_ids.borrow().clone();
    assert!(children.iter().all(|c| *c > root));

    for id in children.iter().rev() {
        view.mark_element_dirty_by_id(*id);
    }
    view.mark_element_dirty_by_id(root);
    view.update_dirty_elements();

    let mut expected = vec![root];
    expected.extend(children);
    assert_eq!(native.finished_updates(), expected);
    view.about_to_be_deleted();
}

#[test]
fn several_sets_before_render_are_batched() {
    let ctx = StateContext::default();
    let (view, native) = headless_view(&ctx, "Batch");
    let a = view.create_state(0, "a");
    let b = view.create_state(0, "b");

    let runs: Log = Rc::default();
    let (r, a_in_render) = (runs.clone(), a.clone());
    let a_elmt = view.observe_component_creation(move |id, _| {
        r.borrow_mut().push((id, format!("a={}", a_in_render.get())));
    });
    let (r, both) = (runs.clone(), (a.clone(), b.clone()));
    let both_elmt = view.observe_component_creation(move |id, _| {
        r.borrow_mut().push((id, format!("a+b={}", both.0.get() + both.1.get())));
    });
    runs.borrow_mut().clear();

    a.set(1);
    a.set(2);
    b.set(10);
    assert_eq!(native.need_update_requests(), 1);
    assert_eq!(view.dirty_element_ids(), Vec::<ElementId>::new());

    view.rerender();
    assert_eq!(
        *runs.borrow(),
        vec![
            (a_elmt, "a=2".to_owned()),
            (both_elmt, "a+b=12".to_owned())
        ]
    );
    assert_eq!(native.finished_updates(), vec![a_elmt, both_elmt]);

    b.set(11);
    assert_eq!(native.need_update_requests(), 2);
    view.about_to_be_deleted();
}

#[test]
fn purged_dependency_is_not_marked_again() {
    let ctx = StateContext::default();
    let (view, native) = headless_view(&ctx, "Purge");
    let value = view.create_state(String::from("a"), "value");
    let v = value.clone();
    let elmt = view.observe_component_creation(move |_, _| {
        let _ = v.get();
    });

    view.purge_variable_dependencies_on_elmt_id(elmt);
    value.set("b".into());
    view.rerender();

    assert!(native.finished_updates().is_empty());
    assert!(value.dependent_element_ids().is_empty());
}

#[test]
fn forty_two_then_seven() {
    let ctx = StateContext::default();
    let (view, native) = headless_view(&ctx, "Answer");
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    view.declare_watch("answer", move |name| s.borrow_mut().push(name.to_owned()));
    let answer = ObservedProperty::new(&ctx, 42, Some(view.id()), Some("answer"));

    answer.set(42);
    assert!(seen.borrow().is_empty());
    assert_eq!(native.need_update_requests(), 0);

    answer.set(7);
    assert_eq!(*seen.borrow(), vec!["answer".to_owned()]);
    assert_eq!(native.need_update_requests(), 1);
    assert_eq!(answer.get_unmonitored(), 7);
}
