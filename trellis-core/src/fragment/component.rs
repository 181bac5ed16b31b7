//! Component fragments: host one [`Instance`] and its rendered root.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use super::attrs::{self, AttrSink, AttrTable};
use super::element::dispatcher;
use super::{build, Fragment};
use crate::backend::Native;
use crate::component::{ComponentType, Hook, Instance, TemplateRef};
use crate::error::Result;
use crate::reactive::{untrack, FlushMode};
use crate::template::{Attrs, EventItem, SlotContent};

pub(crate) struct ComponentState {
    ty: ComponentType,
    attrs: Rc<Attrs>,
    slots: Rc<IndexMap<String, SlotContent>>,
    instance: RefCell<Option<Instance>>,
}

impl ComponentState {
    pub(crate) fn new(ty: ComponentType, attrs: Rc<Attrs>, slots: Rc<IndexMap<String, SlotContent>>) -> Self {
        Self {
            ty,
            attrs,
            slots,
            instance: RefCell::new(None),
        }
    }

    pub(crate) fn instance(&self) -> Option<Instance> {
        self.instance.borrow().clone()
    }

    pub(crate) fn mount(&self, fragment: &Fragment, target: &Native, anchor: Option<&Native>) -> Result<()> {
        let instance = Instance::new(&self.ty, fragment.scope(), Rc::clone(&self.slots));
        *self.instance.borrow_mut() = Some(instance.clone());

        // Props are projected by `pre` effects so they settle before the
        // child's own render effects run.
        let props = AttrTable::new(AttrSink::Props(instance.props().map().clone()));
        attrs::install(fragment, &props, &self.attrs.items, FlushMode::Pre)?;

        for event in &self.attrs.events {
            match event {
                EventItem::Fixed(name, handler) => instance.add_handler(name, handler.clone()),
                EventItem::Dynamic(name, expr) => instance.add_handler(name, dispatcher(name, expr)),
            }
        }
        if let (Some(name), Some(caller)) = (&self.attrs.node_ref, fragment.scope()) {
            caller.set_ref(name, TemplateRef::Component(instance.clone()));
        }

        untrack(|| {
            instance.call_hook(Hook::Init);
            instance.call_hook(Hook::Created);
        });
        let desc = untrack(|| instance.render())?;
        let root = build(&desc, fragment.host(), Some(&instance))?;
        fragment.adopt(&root);
        instance.set_root(root.clone());
        root.mount(target, anchor)?;

        instance.set_mounted();
        debug!(fragment = fragment.id(), instance = instance.id(), component = instance.name(), "component mounted");
        untrack(|| instance.call_hook(Hook::Mounted));
        Ok(())
    }

    pub(crate) fn before_unmount(&self) {
        if let Some(instance) = self.instance() {
            if instance.is_mounted() {
                untrack(|| instance.call_hook(Hook::BeforeUnmount));
            }
        }
    }

    pub(crate) fn release(&self, fragment: &Fragment) {
        if let (Some(name), Some(caller)) = (&self.attrs.node_ref, fragment.scope()) {
            caller.clear_ref(name);
        }
        if let Some(instance) = self.instance() {
            instance.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::backend::DictBackend;
    use crate::component::{Component, ComponentType, Instance};
    use crate::error::Result;
    use crate::fragment::{build, Host};
    use crate::reactive::Signal;
    use crate::template::{h, text_with, Attrs, Descriptor};
    use crate::value::Value;

    #[derive(Default)]
    struct Label;

    impl Component for Label {
        fn render(&self, cx: &Instance) -> Result<Descriptor> {
            let props = cx.props().clone();
            Ok(h("label", Attrs::new(), vec![text_with(move || props.get("text"))]))
        }
    }

    #[test]
    fn props_flow_from_caller_bindings() {
        let backend = Rc::new(DictBackend::new());
        let host = Host::new(backend.clone());
        let root = backend.container();
        let text = Signal::new(Value::from("one"));

        let t = text.clone();
        let desc = h(ComponentType::of::<Label>(), Attrs::new().bind("text", move || t.get()), vec![]);
        let frag = build(&desc, &host, None).unwrap();
        frag.mount(&root, None).unwrap();

        let label = backend.children(&root)[0].clone();
        let node = backend.children(&label)[0].clone();
        assert_eq!(backend.text(&node).as_deref(), Some("one"));

        text.set(Value::from("two"));
        assert_eq!(backend.text(&node).as_deref(), Some("two"));
        assert_eq!(frag.instance().unwrap().props().get_untracked("text"), Value::from("two"));
    }

    #[test]
    fn hooks_run_in_lifecycle_order() {
        struct Tracked(Rc<RefCell<Vec<&'static str>>>);
        impl Component for Tracked {
            fn init(&mut self, _cx: &Instance) {
                self.0.borrow_mut().push("init");
            }
            fn created(&mut self, _cx: &Instance) {
                self.0.borrow_mut().push("created");
            }
            fn render(&self, _cx: &Instance) -> Result<Descriptor> {
                self.0.borrow_mut().push("render");
                Ok(h("box", Attrs::new(), vec![]))
            }
            fn mounted(&mut self, cx: &Instance) {
                assert!(cx.is_mounted());
                self.0.borrow_mut().push("mounted");
            }
            fn before_unmount(&mut self, _cx: &Instance) {
                self.0.borrow_mut().push("before_unmount");
            }
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let ty = ComponentType::from_fn("Tracked", move || Tracked(l.clone()));

        let backend = Rc::new(DictBackend::new());
        let host = Host::new(backend.clone());
        let root = backend.container();
        let frag = build(&h(ty, Attrs::new(), vec![]), &host, None).unwrap();
        frag.mount(&root, None).unwrap();
        let instance = frag.instance().unwrap();
        frag.unmount();

        assert_eq!(*log.borrow(), ["init", "created", "render", "mounted", "before_unmount"]);
        assert!(instance.is_disposed());
        assert!(backend.children(&root).is_empty());
    }

    #[test]
    fn emitted_events_reach_caller_handlers() {
        #[derive(Default)]
        struct Button;
        impl Component for Button {
            fn render(&self, _cx: &Instance) -> Result<Descriptor> {
                Ok(h("button", Attrs::new(), vec![]))
            }
        }

        let backend = Rc::new(DictBackend::new());
        let host = Host::new(backend.clone());
        let root = backend.container();
        let picked = Rc::new(Cell::new(0i64));
        let p = picked.clone();
        let attrs = Attrs::new().on("picked", move |args| p.set(args[0].as_int().unwrap_or(0)));
        let frag = build(&h(ComponentType::of::<Button>(), attrs, vec![]), &host, None).unwrap();
        frag.mount(&root, None).unwrap();

        let instance = frag.instance().unwrap();
        assert!(instance.emit("picked", &[Value::Int(4)]));
        assert_eq!(picked.get(), 4);

        frag.unmount();
        assert!(!instance.emit("picked", &[Value::Int(5)]));
        assert_eq!(picked.get(), 4);
    }
}
