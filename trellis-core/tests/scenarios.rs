//! End-to-End Scenarios
//!
//! Mount real component trees into the dict backend and check the backend
//! calls and tree shape that result from each update.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde_json::json;
use trellis_core::reactive::Runtime;
use trellis_core::{
    batch, each, h, slot, text, text_with, App, AppConfig, Attrs, BackendCall, Component, ComponentType, Descriptor,
    DictBackend, EffectOptions, EventLoopKind, FlushMode, Fragment, Instance, Native, ReactiveList, Result, Signal,
    TemplateRef, Value,
};

/// Route engine logs to the test output; `RUST_LOG=trellis_core=debug`
/// shows mounts, branch switches and list reconciliations.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn setup() -> (Rc<DictBackend>, App, Native) {
    init_tracing();
    let backend = Rc::new(DictBackend::new());
    let app = App::new(backend.clone());
    let root = backend.container();
    (backend, app, root)
}

fn tags(backend: &DictBackend, el: &Native) -> Vec<String> {
    backend.children(el).iter().filter_map(|n| backend.type_name(n)).collect()
}

fn id(backend: &DictBackend, el: &Native) -> u64 {
    backend.id(el).unwrap()
}

#[derive(Default)]
struct Counter;

impl Component for Counter {
    fn init(&mut self, cx: &Instance) {
        cx.state().set("count", 0);
    }

    fn render(&self, cx: &Instance) -> Result<Descriptor> {
        let state = cx.state().clone();
        Ok(h(
            "label",
            Attrs::new().bind("text", move || Value::from(format!("Count: {}", state.get("count")))),
            vec![],
        ))
    }
}

/// Scenario 1: one write, one attribute call.
#[test]
fn counter_write_sets_the_label_once() {
    let (backend, app, root) = setup();
    let counter = app.render(&ComponentType::of::<Counter>(), &root, Attrs::new()).unwrap();
    let label = backend.children(&root)[0].clone();
    backend.clear_calls();

    counter.state().set("count", 1);

    assert_eq!(
        backend.calls(),
        vec![BackendCall::SetAttribute {
            el: id(&backend, &label),
            name: "text".into(),
            value: Value::from("Count: 1"),
        }]
    );
}

/// Scenario 2: switching branches replaces `a` with `b` at the same anchor.
#[test]
fn conditional_branch_swaps_in_place() {
    let (backend, app, root) = setup();
    let p = Signal::new(true);
    let p1 = p.clone();
    let desc = h(
        "box",
        Attrs::new(),
        vec![
            h("a", Attrs::new().when(move || p1.get()), vec![]),
            h("b", Attrs::new().otherwise(), vec![]),
            h("tail", Attrs::new(), vec![]),
        ],
    );
    let frag = app.mount(&desc, &root).unwrap();
    let el = frag.native().unwrap();
    let created = |tag: &str| backend.count(|c| matches!(c, BackendCall::CreateElement { type_name, .. } if type_name == tag));

    assert_eq!((created("a"), created("b")), (1, 0));
    let a = backend.children(&el)[0].clone();
    let tail = backend.children(&el)[1].clone();

    p.set(false);

    assert_eq!((created("a"), created("b")), (1, 1));
    assert_eq!(tags(&backend, &el), ["b", "tail"]);
    let b = backend.children(&el)[0].clone();
    let calls = backend.calls();
    assert!(calls.contains(&BackendCall::Remove {
        el: id(&backend, &a),
        parent: id(&backend, &el),
    }));
    assert!(calls.contains(&BackendCall::Insert {
        el: id(&backend, &b),
        parent: id(&backend, &el),
        anchor: Some(id(&backend, &tail)),
    }));
}

fn rows(ids: &[i64]) -> Vec<Value> {
    ids.iter().map(|id| Value::map([("id", *id)])).collect()
}

fn keyed_rows(list: &ReactiveList) -> Descriptor {
    let source = list.clone();
    h(
        "box",
        Attrs::new(),
        vec![each(
            move || Value::List(source.clone()),
            |item| item.get("id"),
            |scope| {
                let s = scope.clone();
                h("row", Attrs::new().bind("id", move || s.get("id")), vec![])
            },
        )],
    )
}

/// Scenario 3: a keyed rotation reuses every fragment and moves two.
#[test]
fn keyed_reorder_moves_without_rebuilding() {
    let (backend, app, root) = setup();
    let items = rows(&[1, 2, 3]);
    let list = ReactiveList::from_vec(items.clone());
    let frag = app.mount(&keyed_rows(&list), &root).unwrap();
    let el = frag.native().unwrap();
    let before = app.stats();
    backend.clear_calls();

    list.replace(vec![items[2].clone(), items[0].clone(), items[1].clone()]);

    let after = app.stats();
    assert_eq!(after.fragments_created, before.fragments_created);
    assert_eq!(after.fragments_disposed, before.fragments_disposed);
    assert_eq!(after.moves - before.moves, 2);
    assert_eq!(backend.count(|c| matches!(c, BackendCall::Insert { .. })), 2);

    let order: Vec<Value> = backend.children(&el).iter().filter_map(|n| backend.attr(n, "id")).collect();
    assert_eq!(order, [Value::Int(3), Value::Int(1), Value::Int(2)]);

    // The fragment order matches the native order.
    let natives: Vec<Native> = frag.children().iter().flat_map(Fragment::natives).collect();
    let placed = backend.children(&el);
    assert_eq!(natives.len(), placed.len());
    assert!(natives.iter().zip(&placed).all(|(a, b)| a.ptr_eq(b)));
}

#[derive(Default)]
struct Row;

impl Component for Row {
    fn render(&self, cx: &Instance) -> Result<Descriptor> {
        let props = cx.props().clone();
        Ok(h("row", Attrs::new().bind("id", move || props.get("id")), vec![]))
    }
}

/// Reused keys keep their component instances.
#[test]
fn reused_keys_keep_their_instances() {
    let (_backend, app, root) = setup();
    let items = rows(&[1, 2, 3, 4]);
    let list = ReactiveList::from_vec(items.clone());
    let source = list.clone();
    let desc = h(
        "box",
        Attrs::new(),
        vec![each(
            move || Value::List(source.clone()),
            |item| item.get("id"),
            |scope| {
                let s = scope.clone();
                h(ComponentType::of::<Row>(), Attrs::new().bind("id", move || s.get("id")), vec![])
            },
        )],
    );
    let frag = app.mount(&desc, &root).unwrap();
    let list_fragment = frag.children()[0].clone();
    let instances = |f: &Fragment| -> Vec<Instance> { f.children().iter().filter_map(Fragment::instance).collect() };
    let old = instances(&list_fragment);

    list.replace(vec![items[3].clone(), items[1].clone(), items[0].clone()]);

    let new = instances(&list_fragment);
    assert_eq!(new.len(), 3);
    assert!(new[0].ptr_eq(&old[3]));
    assert!(new[1].ptr_eq(&old[1]));
    assert!(new[2].ptr_eq(&old[0]));
    assert!(old[2].is_disposed());
}

#[derive(Default)]
struct Picker;

impl Component for Picker {
    fn render(&self, _cx: &Instance) -> Result<Descriptor> {
        Ok(h("picker", Attrs::new(), vec![]))
    }
}

struct PickerHost {
    picked: Rc<RefCell<Vec<Value>>>,
}

impl Component for PickerHost {
    fn init(&mut self, cx: &Instance) {
        cx.state().set("show", true);
    }

    fn render(&self, cx: &Instance) -> Result<Descriptor> {
        let picked = self.picked.clone();
        let state = cx.state().clone();
        let attrs = Attrs::new()
            .node_ref("picker")
            .on("picked", move |args| picked.borrow_mut().extend_from_slice(args))
            .when(move || state.get("show").truthy());
        Ok(h("box", Attrs::new(), vec![h(ComponentType::of::<Picker>(), attrs, vec![])]))
    }
}

/// Scenario 4: emits reach the caller until the emitter unmounts.
#[test]
fn emitted_events_stop_after_unmount() {
    let (_backend, app, root) = setup();
    let picked = Rc::new(RefCell::new(Vec::new()));
    let p = picked.clone();
    let ty = ComponentType::from_fn("PickerHost", move || PickerHost { picked: p.clone() });
    let host = app.render(&ty, &root, Attrs::new()).unwrap();

    let Some(TemplateRef::Component(picker)) = host.template_ref("picker") else {
        panic!("picker ref missing");
    };
    assert!(picker.emit("picked", &[Value::Int(7)]));
    assert_eq!(*picked.borrow(), [Value::Int(7)]);

    host.state().set("show", false);
    assert!(picker.is_disposed());
    assert!(host.template_ref("picker").is_none());
    assert!(!picker.emit("picked", &[Value::Int(8)]));
    assert_eq!(*picked.borrow(), [Value::Int(7)]);
}

/// Scenario 5: an effect over two batched writes runs once and sees both.
#[test]
fn batched_writes_are_seen_together() {
    let (_backend, app, root) = setup();
    let counter = app.render(&ComponentType::of::<Counter>(), &root, Attrs::new()).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (s, state) = (seen.clone(), counter.state().clone());
    let _effect = counter.effect(move || s.borrow_mut().push((state.get("a"), state.get("b"))));
    seen.borrow_mut().clear();

    batch(|| {
        counter.state().set("a", 1);
        counter.state().set("b", 2);
    })
    .unwrap();

    assert_eq!(*seen.borrow(), [(Value::Int(1), Value::Int(2))]);
}

#[derive(Default)]
struct Layout;

impl Component for Layout {
    fn render(&self, _cx: &Instance) -> Result<Descriptor> {
        Ok(h(
            "layout",
            Attrs::new(),
            vec![slot("header", vec![h("label", Attrs::new().set("text", "x"), vec![])])],
        ))
    }
}

#[derive(Default)]
struct Page;

impl Component for Page {
    fn init(&mut self, cx: &Instance) {
        cx.state().set("custom", false);
        cx.state().set("heading", "Welcome");
    }

    fn render(&self, cx: &Instance) -> Result<Descriptor> {
        let (show, heading) = (cx.state().clone(), cx.state().clone());
        let header = h(
            "title",
            Attrs::new()
                .slot("header")
                .when(move || show.get("custom").truthy())
                .bind("text", move || heading.get("heading")),
            vec![],
        );
        Ok(h(ComponentType::of::<Layout>(), Attrs::new(), vec![header]))
    }
}

/// Scenario 6: the fallback shows until the caller supplies content.
#[test]
fn slot_fallback_gives_way_to_caller_content() {
    let (backend, app, root) = setup();
    let page = app.render(&ComponentType::of::<Page>(), &root, Attrs::new()).unwrap();
    let layout = backend.children(&root)[0].clone();
    let fallback = backend.children(&layout)[0].clone();
    assert_eq!(backend.attr(&fallback, "text"), Some(Value::from("x")));
    backend.clear_calls();

    page.state().set("custom", true);

    assert_eq!(tags(&backend, &layout), ["title"]);
    assert_eq!(
        backend.count(|c| matches!(c, BackendCall::CreateElement { type_name, .. } if type_name == "title")),
        1
    );
    assert_eq!(backend.count(|c| matches!(c, BackendCall::Remove { .. })), 1);

    // Caller content binds against the caller's state.
    page.state().set("heading", "Hello");
    let title = backend.children(&layout)[0].clone();
    assert_eq!(backend.attr(&title, "text"), Some(Value::from("Hello")));
}

struct Logged {
    name: &'static str,
    log: Rc<RefCell<Vec<&'static str>>>,
    child: Option<ComponentType>,
}

impl Component for Logged {
    fn init(&mut self, cx: &Instance) {
        cx.state().set("n", 0);
    }

    fn render(&self, cx: &Instance) -> Result<Descriptor> {
        let state = cx.state().clone();
        let mut children = vec![text_with(move || state.get("n"))];
        if let Some(child) = &self.child {
            children.push(h(child.clone(), Attrs::new().node_ref("child"), vec![]));
        }
        Ok(h("box", Attrs::new(), children))
    }

    fn updated(&mut self, _cx: &Instance) {
        self.log.borrow_mut().push(self.name);
    }
}

/// `updated` fires once per flush, children before parents.
#[test]
fn updated_hooks_coalesce_and_bubble() {
    let (_backend, app, root) = setup();
    let log = Rc::new(RefCell::new(Vec::new()));

    let l = log.clone();
    let leaf = ComponentType::from_fn("Leaf", move || Logged {
        name: "leaf",
        log: l.clone(),
        child: None,
    });
    let l = log.clone();
    let parent = ComponentType::from_fn("Parent", move || Logged {
        name: "parent",
        log: l.clone(),
        child: Some(leaf.clone()),
    });

    let outer = app.render(&parent, &root, Attrs::new()).unwrap();
    let Some(TemplateRef::Component(inner)) = outer.template_ref("child") else {
        panic!("child ref missing");
    };
    assert!(log.borrow().is_empty());

    batch(|| {
        inner.state().set("n", 1);
        inner.state().set("n", 2);
    })
    .unwrap();
    assert_eq!(*log.borrow(), ["leaf", "parent"]);

    log.borrow_mut().clear();
    outer.state().set("n", 5);
    assert_eq!(*log.borrow(), ["parent"]);
}

struct Echo {
    updates: Rc<Cell<usize>>,
}

impl Component for Echo {
    fn init(&mut self, cx: &Instance) {
        cx.state().set("a", 0);
        cx.state().set("b", 0);
    }

    fn render(&self, cx: &Instance) -> Result<Descriptor> {
        let (a, b) = (cx.state().clone(), cx.state().clone());
        Ok(h(
            "box",
            Attrs::new(),
            vec![text_with(move || a.get("a")), text_with(move || b.get("b"))],
        ))
    }

    fn mounted(&mut self, cx: &Instance) {
        // Copies `a` into `b` after render, so one write needs two rounds.
        let (source, target) = (cx.state().clone(), cx.state().clone());
        cx.watch(
            move || source.get("a"),
            move |new, _| target.set("b", new.clone()),
            EffectOptions::default().flush(FlushMode::Post),
        );
    }

    fn updated(&mut self, _cx: &Instance) {
        self.updates.set(self.updates.get() + 1);
    }
}

/// A flush that takes several rounds still fires `updated` once.
#[test]
fn updated_fires_once_across_rounds() {
    let (backend, app, root) = setup();
    let updates = Rc::new(Cell::new(0));
    let u = updates.clone();
    let ty = ComponentType::from_fn("Echo", move || Echo { updates: u.clone() });
    let echo = app.render(&ty, &root, Attrs::new()).unwrap();

    echo.state().set("a", 1);

    assert_eq!(updates.get(), 1);
    assert_eq!(echo.state().get_untracked("b"), Value::Int(1));
    let el = backend.children(&root)[0].clone();
    let texts: Vec<String> = backend.children(&el).iter().filter_map(|n| backend.text(n)).collect();
    assert_eq!(texts, ["1", "1"]);
}

/// Live effects match the mounted bindings and drop to zero on unmount.
#[test]
fn unmount_releases_every_effect_and_subscription() {
    let (backend, app, root) = setup();
    let count = Signal::new(0i64);
    let (a, b, c) = (count.clone(), count.clone(), count.clone());
    let desc = h(
        "box",
        Attrs::new().bind("value", move || Value::Int(a.get())),
        vec![
            text_with(move || Value::Int(b.get())),
            h("odd", Attrs::new().when(move || c.get() % 2 == 1), vec![]),
        ],
    );

    let before = Runtime::live_effects();
    let frag = app.mount(&desc, &root).unwrap();
    assert_eq!(frag.effect_count(), 3);
    assert_eq!(Runtime::live_effects() - before, 3);
    assert_eq!(count.subscriber_count(), 3);

    frag.unmount();
    assert_eq!(Runtime::live_effects(), before);
    assert_eq!(count.subscriber_count(), 0);
    assert!(backend.children(&root).is_empty());
}

/// Toggling a branch twice restores the same structure.
#[test]
fn conditional_round_trip_restores_structure() {
    let (backend, app, root) = setup();
    let open = Signal::new(true);
    let o = open.clone();
    let desc = h(
        "box",
        Attrs::new(),
        vec![
            h("panel", Attrs::new().when(move || o.get()), vec![text("body")]),
            h("closed", Attrs::new().otherwise(), vec![]),
        ],
    );
    let frag = app.mount(&desc, &root).unwrap();
    let el = frag.native().unwrap();
    let outline = frag.outline();
    let snapshot = backend.snapshot(&el);

    open.set(false);
    assert_eq!(frag.outline(), "box(control-flow(closed))");
    open.set(true);

    assert_eq!(frag.outline(), outline);
    assert_eq!(backend.snapshot(&el), snapshot);
    assert_eq!(
        snapshot,
        json!({
            "type": "box",
            "children": [
                { "type": "panel", "children": [{ "type": "TEXT_ELEMENT", "text": "body" }] }
            ]
        })
    );
}

/// The cooperative loop defers work to `App::tick`.
#[tokio::test]
async fn cooperative_loop_flushes_on_tick() {
    init_tracing();
    let backend = Rc::new(DictBackend::new());
    let config = AppConfig {
        event_loop: Some(EventLoopKind::Cooperative),
        ..AppConfig::default()
    };
    let app = App::with_config(backend.clone(), config);
    let root = backend.container();
    let counter = app.render(&ComponentType::of::<Counter>(), &root, Attrs::new()).unwrap();
    let label = backend.children(&root)[0].clone();

    // Nothing queued: tick waits.
    assert!(tokio::time::timeout(Duration::from_millis(10), app.tick()).await.is_err());

    counter.state().set("count", 3);
    assert_eq!(backend.attr(&label, "text"), Some(Value::from("Count: 0")));

    app.tick().await.unwrap();
    assert_eq!(backend.attr(&label, "text"), Some(Value::from("Count: 3")));
}
