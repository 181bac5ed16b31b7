//! Components
//!
//! A component is a type implementing [`Component`]; a mounted component is
//! an [`Instance`]. The instance owns everything the component works with:
//! reactive `state`, read-only `props`, the caller's slot content and event
//! handlers, provided values and template refs.
//!
//! # Lifecycle
//!
//! 1. `init` runs right after construction, with props already populated.
//!    It is the place to seed `state`.
//! 2. `created` runs before the first render.
//! 3. `render` returns the descriptor of the instance's root. It runs once;
//!    later changes flow through the effects of the mounted tree.
//! 4. `mounted` runs after every descendant is inserted and every
//!    descendant effect has completed its first run.
//! 5. `updated` runs at most once per flush round in which an effect owned
//!    by the instance's subtree re-ran. Children update before parents.
//! 6. `before_unmount` runs before the subtree is torn down.
//!
//! Hooks are dispatched from one place. A hook that is already running
//! (for instance `mounted` writing state that re-enters `updated` through a
//! `Sync` effect) is skipped with a warning.

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::backend::Native;
use crate::error::{Error, Result};
use crate::fragment::Fragment;
use crate::reactive::{watch, Effect, EffectOptions, ReactiveMap};
use crate::scheduler::EffectOwner;
use crate::template::{Descriptor, SlotContent};
use crate::value::{EventHandler, Value};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// A user component.
pub trait Component: 'static {
    fn init(&mut self, _cx: &Instance) {}

    fn created(&mut self, _cx: &Instance) {}

    fn render(&self, cx: &Instance) -> Result<Descriptor>;

    fn mounted(&mut self, _cx: &Instance) {}

    fn updated(&mut self, _cx: &Instance) {}

    fn before_unmount(&mut self, _cx: &Instance) {}

    /// Components the template refers to by name.
    fn components(&self) -> Vec<ComponentType> {
        Vec::new()
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A component constructor. Two types are equal when their names are.
#[derive(Clone)]
pub struct ComponentType {
    name: Rc<str>,
    factory: Rc<dyn Fn() -> Box<dyn Component>>,
}

impl ComponentType {
    /// The type of a `Default`-constructible component, named after it.
    pub fn of<C: Component + Default>() -> Self {
        Self::from_fn(short_type_name::<C>(), C::default)
    }

    /// A named type built by `factory`.
    pub fn from_fn<C: Component>(name: &str, factory: impl Fn() -> C + 'static) -> Self {
        Self {
            name: name.into(),
            factory: Rc::new(move || Box::new(factory()) as Box<dyn Component>),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a string tag refers to this type: the full name, or the part
    /// after the last `.`.
    pub fn matches(&self, tag: &str) -> bool {
        &*self.name == tag || tag.rsplit('.').next() == Some(&*self.name)
    }

    fn instantiate(&self) -> Box<dyn Component> {
        (self.factory)()
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentType({})", self.name)
    }
}

/// Read-only reactive props.
#[derive(Clone, Default)]
pub struct Props(ReactiveMap);

impl Props {
    /// Tracked read; absent props read as [`Value::Unset`].
    pub fn get(&self, key: &str) -> Value {
        self.0.get(key)
    }

    pub fn get_untracked(&self, key: &str) -> Value {
        self.0.get_untracked(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.keys()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0.entries()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Props belong to the caller. Always refused; nothing changes.
    pub fn set(&self, key: &str, _value: impl Into<Value>) -> Result<()> {
        warn!(prop = key, "write to props refused");
        Err(Error::PropWriteDenied(key.to_string()))
    }

    pub(crate) fn map(&self) -> &ReactiveMap {
        &self.0
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.entries_untracked()).finish()
    }
}

/// A template ref: the element or component registered under `ref="name"`.
#[derive(Clone, Debug)]
pub enum TemplateRef {
    Element(Native),
    Component(Instance),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hook {
    Init,
    Created,
    Mounted,
    Updated,
    BeforeUnmount,
}

/// A live component.
///
/// Clones share the same instance.
#[derive(Clone)]
pub struct Instance(Rc<InstanceInner>);

pub(crate) struct InstanceInner {
    id: u64,
    this: Weak<InstanceInner>,
    ty: ComponentType,
    component: RefCell<Box<dyn Component>>,
    state: ReactiveMap,
    props: Props,
    slots: Rc<IndexMap<String, SlotContent>>,
    parent: Option<Weak<InstanceInner>>,
    depth: usize,
    handlers: RefCell<IndexMap<String, Vec<EventHandler>>>,
    provided: RefCell<IndexMap<String, Value>>,
    refs: RefCell<IndexMap<String, TemplateRef>>,
    root: RefCell<Option<Fragment>>,
    watchers: RefCell<Vec<Effect>>,
    mounted: Cell<bool>,
    disposed: Cell<bool>,
}

impl Instance {
    pub(crate) fn new(ty: &ComponentType, parent: Option<&Instance>, slots: Rc<IndexMap<String, SlotContent>>) -> Self {
        let id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        let depth = parent.map_or(0, |p| p.0.depth + 1);
        trace!(instance = id, component = ty.name(), depth, "creating instance");
        Self(Rc::new_cyclic(|this| InstanceInner {
            id,
            this: this.clone(),
            ty: ty.clone(),
            component: RefCell::new(ty.instantiate()),
            state: ReactiveMap::new(),
            props: Props::default(),
            slots,
            parent: parent.map(|p| Rc::downgrade(&p.0)),
            depth,
            handlers: RefCell::new(IndexMap::new()),
            provided: RefCell::new(IndexMap::new()),
            refs: RefCell::new(IndexMap::new()),
            root: RefCell::new(None),
            watchers: RefCell::new(Vec::new()),
            mounted: Cell::new(false),
            disposed: Cell::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> &str {
        self.0.ty.name()
    }

    pub fn component_type(&self) -> &ComponentType {
        &self.0.ty
    }

    /// Reactive local state.
    pub fn state(&self) -> &ReactiveMap {
        &self.0.state
    }

    pub fn props(&self) -> &Props {
        &self.0.props
    }

    /// The instance whose template created this one.
    pub fn parent(&self) -> Option<Instance> {
        self.0.parent.as_ref().and_then(Weak::upgrade).map(Instance)
    }

    /// Number of component ancestors.
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    /// The root fragment, once rendered.
    pub fn root(&self) -> Option<Fragment> {
        self.0.root.borrow().clone()
    }

    pub fn has_slot(&self, name: &str) -> bool {
        self.0.slots.contains_key(name)
    }

    pub(crate) fn slot_content(&self, name: &str) -> Option<SlotContent> {
        self.0.slots.get(name).cloned()
    }

    /// Invoke the caller's handlers for `event`. Returns whether any handler
    /// was bound; always `false` once the instance is unmounted.
    pub fn emit(&self, event: &str, args: &[Value]) -> bool {
        if self.0.disposed.get() {
            trace!(component = self.name(), event, "emit after unmount dropped");
            return false;
        }
        let handlers = self.0.handlers.borrow().get(event).cloned().unwrap_or_default();
        for handler in &handlers {
            handler.call(args);
        }
        !handlers.is_empty()
    }

    pub(crate) fn add_handler(&self, event: &str, handler: EventHandler) {
        self.0
            .handlers
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Make `value` available to descendants through [`Instance::inject`].
    pub fn provide(&self, key: &str, value: impl Into<Value>) {
        self.0.provided.borrow_mut().insert(key.to_string(), value.into());
    }

    /// The nearest ancestor's provided value for `key`.
    pub fn inject(&self, key: &str) -> Option<Value> {
        let mut current = self.parent();
        while let Some(instance) = current {
            if let Some(value) = instance.0.provided.borrow().get(key) {
                return Some(value.clone());
            }
            current = instance.parent();
        }
        None
    }

    /// The element or component registered under `ref="name"`.
    pub fn template_ref(&self, name: &str) -> Option<TemplateRef> {
        self.0.refs.borrow().get(name).cloned()
    }

    pub(crate) fn set_ref(&self, name: &str, target: TemplateRef) {
        self.0.refs.borrow_mut().insert(name.to_string(), target);
    }

    pub(crate) fn clear_ref(&self, name: &str) {
        self.0.refs.borrow_mut().shift_remove(name);
    }

    /// Watch `source`; the watcher is disposed with the instance.
    pub fn watch<S, C>(&self, source: S, callback: C, options: EffectOptions) -> Effect
    where
        S: Fn() -> Value + 'static,
        C: FnMut(&Value, Option<&Value>) + 'static,
    {
        let watcher = watch(source, callback, options.owner(self.owner()));
        self.0.watchers.borrow_mut().push(watcher.clone());
        watcher
    }

    /// Run `f` as an effect disposed with the instance.
    pub fn effect(&self, f: impl FnMut() + 'static) -> Effect {
        let effect = EffectOptions::default().owner(self.owner()).effect(f);
        self.0.watchers.borrow_mut().push(effect.clone());
        effect
    }

    /// The instance as the owner of effects, for `updated` hooks.
    pub(crate) fn owner(&self) -> Weak<dyn EffectOwner> {
        Rc::downgrade(&self.0) as Weak<dyn EffectOwner>
    }

    /// Resolve a string tag against the component's imports.
    pub(crate) fn resolve(&self, tag: &str) -> Option<ComponentType> {
        let imports = self.0.component.try_borrow().ok()?.components();
        imports.into_iter().find(|ty| ty.matches(tag))
    }

    pub(crate) fn render(&self) -> Result<Descriptor> {
        let component = self
            .0
            .component
            .try_borrow()
            .map_err(|_| Error::render(self.name(), "render re-entered"))?;
        component.render(self).map_err(|err| match err {
            Error::Render { .. } => err,
            other => Error::render(self.name(), other),
        })
    }

    pub(crate) fn set_root(&self, root: Fragment) {
        *self.0.root.borrow_mut() = Some(root);
    }

    pub(crate) fn set_mounted(&self) {
        self.0.mounted.set(true);
    }

    /// Call a lifecycle hook.
    pub(crate) fn call_hook(&self, hook: Hook) {
        if self.0.disposed.get() {
            return;
        }
        let Ok(mut component) = self.0.component.try_borrow_mut() else {
            warn!(component = self.name(), ?hook, "hook re-entered; skipped");
            return;
        };
        trace!(component = self.name(), ?hook, "hook");
        match hook {
            Hook::Init => component.init(self),
            Hook::Created => component.created(self),
            Hook::Mounted => component.mounted(self),
            Hook::Updated => component.updated(self),
            Hook::BeforeUnmount => component.before_unmount(self),
        }
    }

    /// Release everything the instance holds. Emits are dropped from here
    /// on.
    pub(crate) fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }
        debug!(instance = self.0.id, component = self.name(), "instance disposed");
        self.0.mounted.set(false);
        let watchers: Vec<Effect> = self.0.watchers.borrow_mut().drain(..).collect();
        for watcher in watchers {
            watcher.dispose();
        }
        self.0.handlers.borrow_mut().clear();
        self.0.refs.borrow_mut().clear();
        self.0.provided.borrow_mut().clear();
        self.0.root.borrow_mut().take();
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl EffectOwner for InstanceInner {
    fn owner_key(&self) -> (usize, u64) {
        (self.depth, self.id)
    }

    fn owner_parent(&self) -> Option<Rc<dyn EffectOwner>> {
        let parent = self.parent.as_ref()?.upgrade()?;
        Some(parent as Rc<dyn EffectOwner>)
    }

    fn owner_updated(&self) {
        if !self.mounted.get() || self.disposed.get() {
            return;
        }
        if let Some(this) = self.this.upgrade() {
            Instance(this).call_hook(Hook::Updated);
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.0.id)
            .field("component", &self.name())
            .field("mounted", &self.is_mounted())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{h, Attrs};

    #[derive(Default)]
    struct Card;

    impl Component for Card {
        fn render(&self, _cx: &Instance) -> Result<Descriptor> {
            Ok(h("card", Attrs::new(), vec![]))
        }
    }

    fn instance(parent: Option<&Instance>) -> Instance {
        Instance::new(&ComponentType::of::<Card>(), parent, Rc::new(IndexMap::new()))
    }

    #[test]
    fn type_names_are_short() {
        let ty = ComponentType::of::<Card>();
        assert_eq!(ty.name(), "Card");
        assert!(ty.matches("Card"));
        assert!(ty.matches("widgets.Card"));
        assert!(!ty.matches("Cards"));
    }

    #[test]
    fn props_refuse_writes() {
        let cx = instance(None);
        assert_eq!(cx.props().set("x", 1), Err(Error::PropWriteDenied("x".into())));
        assert!(cx.props().is_empty());
    }

    #[test]
    fn inject_walks_up_the_parent_chain() {
        let root = instance(None);
        let middle = instance(Some(&root));
        let leaf = instance(Some(&middle));

        root.provide("theme", "dark");
        assert_eq!(leaf.inject("theme"), Some(Value::from("dark")));
        assert_eq!(root.inject("theme"), None);

        middle.provide("theme", "light");
        assert_eq!(leaf.inject("theme"), Some(Value::from("light")));
        assert_eq!(leaf.depth(), 2);
    }

    #[test]
    fn emit_reaches_handlers_until_disposed() {
        let cx = instance(None);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        cx.add_handler("picked", EventHandler::new(move |args| s.borrow_mut().extend_from_slice(args)));

        assert!(cx.emit("picked", &[Value::Int(7)]));
        assert!(!cx.emit("other", &[]));

        cx.dispose();
        assert!(!cx.emit("picked", &[Value::Int(8)]));
        assert_eq!(*seen.borrow(), vec![Value::Int(7)]);
    }

    #[test]
    fn render_errors_name_the_component() {
        struct Broken;
        impl Component for Broken {
            fn render(&self, _cx: &Instance) -> Result<Descriptor> {
                Err(Error::binding("x", "boom"))
            }
        }
        let ty = ComponentType::from_fn("Broken", || Broken);
        let cx = Instance::new(&ty, None, Rc::new(IndexMap::new()));
        assert!(matches!(cx.render(), Err(Error::Render { component, .. }) if component == "Broken"));
    }
}
