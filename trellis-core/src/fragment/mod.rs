//! Fragment Graph
//!
//! A fragment is one node of the mount graph. It owns the effects it
//! creates, at most one native element, and its child fragments. Parent
//! edges are weak; ownership flows from the root down.
//!
//! # How Mounting Works
//!
//! 1. A [`Descriptor`](crate::Descriptor) is built into an unmounted
//!    fragment. Static structure (element children, group children) is built
//!    eagerly; everything that depends on reactive state is built on mount.
//!
//! 2. `mount(target, anchor)` creates native resources, installs effects,
//!    mounts children in order and inserts the fragment's natives into
//!    `target` before `anchor` (or at the end).
//!
//! 3. Control flow, lists, slots and dynamic components own one effect
//!    that decides which children exist. When it re-runs, children are
//!    unmounted and new ones are built and mounted at
//!    [`next_anchor`](Fragment::next_anchor): the first native of the
//!    next sibling that has one.
//!
//! 4. `unmount()` cascades: children first (in reverse), then the
//!    fragment's own effects, listeners and native element. Natives below an
//!    element are not removed one by one; removing the element is enough.
//!
//! A failed mount rolls back through the same path, so no effect or native
//! outlives a partial mount.

mod attrs;
mod build;
mod component;
mod control_flow;
mod dynamic;
mod element;
mod list;
mod slot;
mod text;

pub use list::ItemScope;

pub(crate) use build::build;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use crate::backend::{Backend, Native};
use crate::component::{ComponentType, Instance};
use crate::error::Result;
use crate::reactive::{Effect, EffectOptions, FlushMode};

use self::component::ComponentState;
use self::control_flow::ControlFlowState;
use self::dynamic::DynamicState;
use self::element::ElementState;
use self::list::ListState;
use self::slot::SlotState;
use self::text::TextState;

static NEXT_FRAGMENT_ID: AtomicU64 = AtomicU64::new(1);

/// The backend a tree renders into, the app-wide component registry and
/// the counters behind [`Stats`](crate::Stats).
pub(crate) struct Host {
    pub(crate) backend: Rc<dyn Backend>,
    pub(crate) components: RefCell<Vec<ComponentType>>,
    pub(crate) stats: HostStats,
}

impl Host {
    pub(crate) fn new(backend: Rc<dyn Backend>) -> Rc<Self> {
        Rc::new(Self {
            backend,
            components: RefCell::new(Vec::new()),
            stats: HostStats::default(),
        })
    }

    pub(crate) fn resolve(&self, tag: &str) -> Option<ComponentType> {
        self.components.borrow().iter().find(|ty| ty.matches(tag)).cloned()
    }
}

#[derive(Default)]
pub(crate) struct HostStats {
    pub(crate) fragments_created: Cell<usize>,
    pub(crate) fragments_disposed: Cell<usize>,
    pub(crate) natives_created: Cell<usize>,
    pub(crate) moves: Cell<usize>,
}

impl HostStats {
    pub(crate) fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }
}

pub(crate) enum Kind {
    Element(ElementState),
    Text(TextState),
    Group,
    ControlFlow(ControlFlowState),
    List(ListState),
    Component(ComponentState),
    Slot(SlotState),
    Dynamic(DynamicState),
}

/// A node of the mount graph. Clones share the same node.
#[derive(Clone)]
pub struct Fragment(Rc<FragmentNode>);

pub(crate) struct FragmentNode {
    id: u64,
    host: Rc<Host>,
    /// The component instance whose template produced this fragment.
    scope: Option<Instance>,
    parent: RefCell<Weak<FragmentNode>>,
    children: RefCell<Vec<Fragment>>,
    effects: RefCell<Vec<Effect>>,
    /// The backend parent this fragment's natives live in.
    target: RefCell<Option<Native>>,
    mount_anchor: RefCell<Option<Native>>,
    mounted: Cell<bool>,
    disposed: Cell<bool>,
    kind: Kind,
}

/// A non-owning fragment handle, captured by effects.
#[derive(Clone)]
pub(crate) struct WeakFragment(Weak<FragmentNode>);

impl WeakFragment {
    pub(crate) fn upgrade(&self) -> Option<Fragment> {
        self.0.upgrade().map(Fragment)
    }
}

impl Fragment {
    pub(crate) fn new(host: &Rc<Host>, scope: Option<Instance>, kind: Kind) -> Self {
        Self(Rc::new(FragmentNode {
            id: NEXT_FRAGMENT_ID.fetch_add(1, Ordering::Relaxed),
            host: Rc::clone(host),
            scope,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            effects: RefCell::new(Vec::new()),
            target: RefCell::new(None),
            mount_anchor: RefCell::new(None),
            mounted: Cell::new(false),
            disposed: Cell::new(false),
            kind,
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// `element`, `text`, `group`, `control-flow`, `list`, `component`,
    /// `slot` or `dynamic`.
    pub fn kind_name(&self) -> &'static str {
        match &self.0.kind {
            Kind::Element(_) => "element",
            Kind::Text(_) => "text",
            Kind::Group => "group",
            Kind::ControlFlow(_) => "control-flow",
            Kind::List(_) => "list",
            Kind::Component(_) => "component",
            Kind::Slot(_) => "slot",
            Kind::Dynamic(_) => "dynamic",
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    pub fn parent(&self) -> Option<Fragment> {
        self.0.parent.borrow().upgrade().map(Fragment)
    }

    pub fn children(&self) -> Vec<Fragment> {
        self.0.children.borrow().clone()
    }

    /// The native element of an element or text fragment.
    pub fn native(&self) -> Option<Native> {
        match &self.0.kind {
            Kind::Element(state) => state.native(),
            Kind::Text(state) => state.native(),
            _ => None,
        }
    }

    /// The instance hosted by a component fragment.
    pub fn instance(&self) -> Option<Instance> {
        match &self.0.kind {
            Kind::Component(state) => state.instance(),
            _ => None,
        }
    }

    /// Live effects owned by this fragment and its descendants.
    pub fn effect_count(&self) -> usize {
        let own = self.0.effects.borrow().iter().filter(|e| !e.is_disposed()).count();
        own + self.children().iter().map(Fragment::effect_count).sum::<usize>()
    }

    /// The fragment structure as text, e.g. `component(box(text,list))`.
    /// Element fragments show their tag.
    pub fn outline(&self) -> String {
        let name = match &self.0.kind {
            Kind::Element(state) => state.tag().to_string(),
            _ => self.kind_name().to_string(),
        };
        let children = self.children();
        if children.is_empty() {
            return name;
        }
        let inner: Vec<String> = children.iter().map(Fragment::outline).collect();
        format!("{name}({})", inner.join(","))
    }

    pub fn ptr_eq(&self, other: &Fragment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakFragment {
        WeakFragment(Rc::downgrade(&self.0))
    }

    pub(crate) fn host(&self) -> &Rc<Host> {
        &self.0.host
    }

    pub(crate) fn scope(&self) -> Option<&Instance> {
        self.0.scope.as_ref()
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.0.kind
    }

    pub(crate) fn target(&self) -> Option<Native> {
        self.0.target.borrow().clone()
    }

    /// Attach `child` as the last child.
    pub(crate) fn adopt(&self, child: &Fragment) {
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        self.0.children.borrow_mut().push(child.clone());
    }

    pub(crate) fn remove_child(&self, child: &Fragment) {
        self.0.children.borrow_mut().retain(|c| !c.ptr_eq(child));
    }

    /// Replace the child list; used by lists to record display order.
    pub(crate) fn set_children(&self, children: Vec<Fragment>) {
        *self.0.children.borrow_mut() = children;
    }

    /// Unmount and drop every child.
    pub(crate) fn clear_children(&self) {
        let children = std::mem::take(&mut *self.0.children.borrow_mut());
        for child in children.iter().rev() {
            child.unmount();
        }
    }

    /// Create an effect owned by this fragment. Re-runs count towards the
    /// `updated` hook of the fragment's component.
    pub(crate) fn bind_effect<F>(&self, label: &str, flush: FlushMode, run: F) -> Result<()>
    where
        F: FnMut() -> Result<()> + 'static,
    {
        let mut options = EffectOptions::default().flush(flush).label(label);
        if let Some(scope) = &self.0.scope {
            options = options.owner(scope.owner());
        }
        let effect = options.try_effect(run)?;
        self.0.effects.borrow_mut().push(effect);
        Ok(())
    }

    /// Mount into `target`, before `anchor` or at the end.
    pub fn mount(&self, target: &Native, anchor: Option<&Native>) -> Result<()> {
        if self.0.mounted.get() || self.0.disposed.get() {
            return Ok(());
        }
        *self.0.target.borrow_mut() = Some(target.clone());
        *self.0.mount_anchor.borrow_mut() = anchor.cloned();
        HostStats::bump(&self.0.host.stats.fragments_created);

        let result = match &self.0.kind {
            Kind::Element(state) => state.mount(self, target, anchor),
            Kind::Text(state) => state.mount(self, target, anchor),
            Kind::Group => self.mount_children(target, anchor),
            Kind::ControlFlow(state) => state.mount(self),
            Kind::List(state) => state.mount(self),
            Kind::Component(state) => state.mount(self, target, anchor),
            Kind::Slot(state) => state.mount(self),
            Kind::Dynamic(state) => state.mount(self),
        };

        match result {
            Ok(()) => {
                self.0.mounted.set(true);
                trace!(fragment = self.0.id, kind = self.kind_name(), "mounted");
                Ok(())
            }
            Err(err) => {
                debug!(fragment = self.0.id, kind = self.kind_name(), error = %err, "mount failed; rolling back");
                self.teardown(true);
                Err(err)
            }
        }
    }

    pub(crate) fn mount_children(&self, target: &Native, anchor: Option<&Native>) -> Result<()> {
        for child in self.children() {
            child.mount(target, anchor)?;
        }
        Ok(())
    }

    /// Unmount the subtree. Never fails; backend errors are logged.
    pub fn unmount(&self) {
        self.teardown(true);
    }

    /// `detach`: whether this fragment's natives must be removed from their
    /// backend parent. False below an element that is itself being removed.
    fn teardown(&self, detach: bool) {
        if self.0.disposed.replace(true) {
            return;
        }
        if let Kind::Component(state) = &self.0.kind {
            state.before_unmount();
        }

        let below_element = matches!(self.0.kind, Kind::Element(_));
        let children = std::mem::take(&mut *self.0.children.borrow_mut());
        for child in children.iter().rev() {
            child.teardown(detach && !below_element);
        }

        let effects: Vec<Effect> = self.0.effects.borrow_mut().drain(..).collect();
        for effect in effects {
            effect.dispose();
        }

        match &self.0.kind {
            Kind::Element(state) => state.release(self, detach),
            Kind::Text(state) => state.release(self, detach),
            Kind::List(state) => state.clear(),
            Kind::Component(state) => state.release(self),
            Kind::Group | Kind::ControlFlow(_) | Kind::Slot(_) | Kind::Dynamic(_) => {}
        }

        self.0.mounted.set(false);
        if self.0.target.borrow().is_some() {
            HostStats::bump(&self.0.host.stats.fragments_disposed);
        }
        trace!(fragment = self.0.id, kind = self.kind_name(), "unmounted");
    }

    /// First native element this subtree contributes to its backend parent.
    pub fn first_native(&self) -> Option<Native> {
        match &self.0.kind {
            Kind::Element(state) => state.native(),
            Kind::Text(state) => state.native(),
            _ => self.children().iter().find_map(Fragment::first_native),
        }
    }

    /// Last native element this subtree contributes to its backend parent.
    pub fn last_native(&self) -> Option<Native> {
        match &self.0.kind {
            Kind::Element(state) => state.native(),
            Kind::Text(state) => state.native(),
            _ => self.children().iter().rev().find_map(Fragment::last_native),
        }
    }

    /// Every native this subtree contributes to its backend parent, in
    /// order.
    pub fn natives(&self) -> Vec<Native> {
        let mut out = Vec::new();
        self.collect_natives(&mut out);
        out
    }

    fn collect_natives(&self, out: &mut Vec<Native>) {
        match &self.0.kind {
            Kind::Element(state) => out.extend(state.native()),
            Kind::Text(state) => out.extend(state.native()),
            _ => {
                for child in self.children() {
                    child.collect_natives(out);
                }
            }
        }
    }

    /// Re-insert this subtree's natives before `anchor` under the same
    /// backend parent.
    pub(crate) fn move_before(&self, anchor: Option<&Native>) -> Result<()> {
        let Some(target) = self.target() else {
            return Ok(());
        };
        HostStats::bump(&self.0.host.stats.moves);
        for native in self.natives() {
            self.0.host.backend.insert(&native, &target, anchor)?;
        }
        Ok(())
    }

    /// The native new children of this fragment must be inserted before.
    ///
    /// Before the fragment is mounted this is the anchor it is being mounted
    /// at. Afterwards it is the first native of a later sibling, looking
    /// through non-element ancestors; `None` (append) at the end of an
    /// element.
    pub(crate) fn next_anchor(&self) -> Option<Native> {
        if !self.0.mounted.get() {
            return self.0.mount_anchor.borrow().clone();
        }
        let Some(parent) = self.parent() else {
            return self.0.mount_anchor.borrow().clone();
        };

        let siblings = parent.children();
        if let Some(position) = siblings.iter().position(|s| s.ptr_eq(self)) {
            let later = siblings[position + 1..]
                .iter()
                .filter(|s| s.is_mounted())
                .find_map(Fragment::first_native);
            if later.is_some() {
                return later;
            }
        }

        match parent.0.kind {
            Kind::Element(_) => None,
            _ => parent.next_anchor(),
        }
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("id", &self.0.id)
            .field("kind", &self.kind_name())
            .field("mounted", &self.is_mounted())
            .field("children", &self.0.children.borrow().len())
            .finish()
    }
}

/// Log a backend failure during teardown.
pub(crate) fn teardown_failed(fragment: &Fragment, action: &str, err: &crate::error::BackendError) {
    warn!(fragment = fragment.id(), action, error = %err, "backend call failed during unmount");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, DictBackend};
    use crate::reactive::Signal;
    use crate::template::{fragment, h, text, text_with, Attrs};
    use crate::value::Value;

    fn setup() -> (Rc<DictBackend>, Rc<Host>, Native) {
        let backend = Rc::new(DictBackend::new());
        let host = Host::new(backend.clone());
        let root = backend.container();
        (backend, host, root)
    }

    fn tags(backend: &DictBackend, el: &Native) -> Vec<String> {
        backend.children(el).iter().filter_map(|n| backend.type_name(n)).collect()
    }

    #[test]
    fn element_tree_mounts_in_order() {
        let (backend, host, root) = setup();
        let desc = h(
            "box",
            Attrs::new().set("name", "outer"),
            vec![h("a", Attrs::new(), vec![]), h("b", Attrs::new(), vec![])],
        );
        let frag = build(&desc, &host, None).unwrap();
        frag.mount(&root, None).unwrap();

        let outer = frag.native().unwrap();
        assert_eq!(tags(&backend, &root), ["box"]);
        assert_eq!(tags(&backend, &outer), ["a", "b"]);
        assert_eq!(backend.attr(&outer, "name"), Some(Value::from("outer")));
        assert_eq!(frag.outline(), "box(a,b)");
    }

    #[test]
    fn group_children_share_the_anchor() {
        let (backend, host, root) = setup();
        let tail = build(&h("z", Attrs::new(), vec![]), &host, None).unwrap();
        tail.mount(&root, None).unwrap();

        let group = build(
            &fragment(vec![h("a", Attrs::new(), vec![]), h("b", Attrs::new(), vec![])]),
            &host,
            None,
        )
        .unwrap();
        group.mount(&root, tail.first_native().as_ref()).unwrap();

        assert_eq!(tags(&backend, &root), ["a", "b", "z"]);
        assert_eq!(group.natives().len(), 2);
        assert_eq!(group.last_native().and_then(|n| backend.type_name(&n)).as_deref(), Some("b"));
    }

    #[test]
    fn reactive_attribute_updates_and_releases() {
        let (backend, host, root) = setup();
        let label = Signal::new(Value::from("a"));
        let l = label.clone();
        let frag = build(&h("label", Attrs::new().bind("text", move || l.get()), vec![]), &host, None).unwrap();
        frag.mount(&root, None).unwrap();
        let el = frag.native().unwrap();
        backend.clear_calls();

        label.set(Value::from("b"));
        assert_eq!(backend.attr(&el, "text"), Some(Value::from("b")));

        label.set(Value::Unset);
        assert_eq!(backend.attr(&el, "text"), None);
        assert!(backend.calls().contains(&BackendCall::RemoveAttribute {
            el: backend.id(&el).unwrap(),
            name: "text".into(),
            prev: Value::from("b"),
        }));
    }

    #[test]
    fn unmount_releases_effects_and_natives() {
        let (backend, host, root) = setup();
        let count = Signal::new(0i64);
        let c = count.clone();
        let desc = h(
            "box",
            Attrs::new().bind("value", move || Value::Int(c.get())),
            vec![text_with({
                let c = count.clone();
                move || Value::Int(c.get())
            })],
        );
        let frag = build(&desc, &host, None).unwrap();
        frag.mount(&root, None).unwrap();
        assert_eq!(frag.effect_count(), 2);
        assert_eq!(count.subscriber_count(), 2);

        frag.unmount();
        assert!(frag.is_disposed());
        assert_eq!(count.subscriber_count(), 0);
        assert!(backend.children(&root).is_empty());
        // The text node went with its element.
        assert_eq!(backend.count(|c| matches!(c, BackendCall::Remove { .. })), 1);
    }

    #[test]
    fn text_falls_back_to_parent_attribute() {
        let backend = Rc::new(DictBackend::new().without_text_nodes());
        let host = Host::new(backend.clone());
        let root = backend.container();
        let frag = build(&h("label", Attrs::new(), vec![text("hello")]), &host, None).unwrap();
        frag.mount(&root, None).unwrap();

        let label = frag.native().unwrap();
        assert_eq!(backend.attr(&label, "text"), Some(Value::from("hello")));
        assert!(backend.children(&label).is_empty());
    }

    #[test]
    fn invalid_descriptors_fail_to_build() {
        let (_, host, _) = setup();
        let unknown = h("box", Attrs::new(), vec![h("Missing", Attrs::new(), vec![])]);
        assert!(matches!(build(&unknown, &host, None), Err(crate::Error::Render { .. })));

        let orphan = h("box", Attrs::new(), vec![text("x"), h("b", Attrs::new().otherwise(), vec![])]);
        assert!(matches!(build(&orphan, &host, None), Err(crate::Error::Compile(_))));
    }

    #[test]
    fn failed_mount_rolls_back() {
        struct Broken;
        impl crate::Component for Broken {
            fn render(&self, _cx: &Instance) -> Result<crate::Descriptor> {
                Err(crate::Error::binding("x", "boom"))
            }
        }

        let (backend, host, root) = setup();
        let desc = h(
            "box",
            Attrs::new(),
            vec![
                h("a", Attrs::new(), vec![]),
                h(crate::ComponentType::from_fn("Broken", || Broken), Attrs::new(), vec![]),
            ],
        );
        let frag = build(&desc, &host, None).unwrap();
        assert!(matches!(frag.mount(&root, None), Err(crate::Error::Render { .. })));

        assert!(frag.is_disposed());
        assert!(backend.children(&root).is_empty());
        assert_eq!(host.stats.fragments_created.get(), host.stats.fragments_disposed.get());
    }
}
