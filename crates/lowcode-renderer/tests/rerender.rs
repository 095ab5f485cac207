//! Refreshing render roots from a host document.

use std::rc::Rc;

use lowcode_renderer::config;
use lowcode_renderer::{
    Component, ComponentKind, ComponentRegistry, DocumentHost, MemoryDocument, RenderRoot, RendererProps, Scheduler,
    SchemaNode, TestClock, Value,
};
use serde_json::json;

struct Fixture {
    clock: TestClock,
    scheduler: Scheduler,
    document: MemoryDocument,
    root: RenderRoot,
}

fn fixture() -> Fixture {
    let clock = TestClock::new();
    let scheduler = Scheduler::new(Rc::new(clock.clone()));
    let document = MemoryDocument::from_json(&json!({
        "id": "page",
        "componentName": "Page",
        "props": { "title": "v1" },
        "children": [{
            "id": "button",
            "componentName": "Button",
            "props": { "label": "Save" }
        }]
    }))
    .unwrap();
    let components = ComponentRegistry::new()
        .with(Rc::new(Component::new("Button", ComponentKind::Plain).with_option("__scopeId", Value::text("s"))));
    let root = RenderRoot::mount(
        &scheduler,
        RendererProps::new(document.root(), components).with_get_node(document.get_node_fn()),
    )
    .unwrap();
    Fixture {
        clock,
        scheduler,
        document,
        root,
    }
}

fn title(root: &RenderRoot) -> Value {
    root.with_tree(|tree| tree.unwrap().prop("title").cloned().unwrap_or_default())
}

#[test]
fn rerender_bursts_export_once() {
    let Fixture {
        scheduler,
        document,
        root,
        ..
    } = fixture();
    document.set_prop("page", "title", json!("v2")).unwrap();

    for _ in 0..5 {
        root.rerender();
    }
    scheduler.run_until_quiescent(10);

    assert_eq!(document.exports(), 1);
    assert_eq!(root.refreshes(), 1);
    assert_eq!(root.propagations(), 1);
    assert_eq!(root.renders(), 2);
    assert_eq!(title(&root), Value::text("v2"));
}

#[test]
fn empty_exports_keep_the_last_schema() {
    let Fixture {
        scheduler,
        document,
        root,
        ..
    } = fixture();
    let before = root.schema();
    document.set_export_enabled(false);
    document.set_prop("page", "title", json!("v2")).unwrap();

    root.rerender();
    scheduler.run_until_quiescent(10);

    assert_eq!(document.exports(), 1);
    assert!(Rc::ptr_eq(&root.schema(), &before));
    assert_eq!(root.propagations(), 1);
    assert_eq!(title(&root), Value::text("v1"));
    assert!(root.take_error().is_none());
}

#[test]
fn replacing_the_schema_propagates_without_rerender() {
    let Fixture {
        scheduler,
        document,
        root,
        ..
    } = fixture();
    let mut next = root.schema().as_ref().clone();
    next.props.insert("title".to_string(), json!("local"));
    root.set_schema(next);
    scheduler.run_until_quiescent(10);

    assert_eq!(document.exports(), 0);
    assert_eq!(root.propagations(), 1);
    assert_eq!(title(&root), Value::text("local"));
}

#[test]
fn rerender_waits_for_the_configured_delay() {
    config::set_rerender_delay_ms(50);
    let Fixture {
        clock,
        scheduler,
        document,
        root,
    } = fixture();
    config::set_rerender_delay_ms(0);

    document.set_prop("page", "title", json!("v2")).unwrap();
    root.rerender();
    clock.advance_by(30);
    root.rerender();
    scheduler.run_until_quiescent(10);
    assert_eq!(document.exports(), 0);

    clock.advance_by(30);
    scheduler.run_until_quiescent(10);
    assert_eq!(document.exports(), 0, "the second call re-armed the timer");

    clock.advance_by(20);
    scheduler.run_until_quiescent(10);
    assert_eq!(document.exports(), 1);
    assert_eq!(title(&root), Value::text("v2"));
}

#[test]
fn attached_documents_drive_rerenders_and_receive_instances() {
    let Fixture {
        scheduler,
        document,
        root,
        ..
    } = fixture();
    root.attach_document(Rc::new(document.clone()) as Rc<dyn DocumentHost>);
    root.render().unwrap();
    let button = root.instance("button").unwrap();
    assert_eq!(document.instance("button"), Some(button));

    document.set_prop("button", "label", json!("Saved")).unwrap();
    document.set_prop("page", "title", json!("v2")).unwrap();
    scheduler.run_until_quiescent(10);

    assert_eq!(document.exports(), 1);
    assert_eq!(title(&root), Value::text("v2"));
    root.with_tree(|tree| {
        let label = tree.unwrap().find("button").unwrap().prop("label").cloned();
        assert_eq!(label, Some(Value::text("Saved")));
    });
    assert_eq!(document.instance("button"), Some(button));

    root.detach_document();
    document.set_prop("page", "title", json!("v3")).unwrap();
    scheduler.run_until_quiescent(10);
    assert_eq!(document.exports(), 1);
    assert_eq!(title(&root), Value::text("v2"));
}

#[test]
fn documents_without_ids_resolve_nothing() {
    let scheduler = Scheduler::new(Rc::new(TestClock::new()));
    let root = RenderRoot::mount(
        &scheduler,
        RendererProps::new(
            SchemaNode::from_json(&json!({ "componentName": "Page", "__ctx": { "lceKey": "p" } })).unwrap(),
            ComponentRegistry::new(),
        ),
    )
    .unwrap();
    root.rerender();
    scheduler.run_until_quiescent(10);
    assert_eq!(root.refreshes(), 1);
    assert_eq!(root.propagations(), 1);
    assert_eq!(root.renders(), 2);
}
