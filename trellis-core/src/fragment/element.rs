//! Element fragments: one native element, its attribute bindings and event
//! listeners.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{trace, warn};

use super::attrs::{self, AttrSink, AttrTable};
use super::{teardown_failed, Fragment, HostStats};
use crate::backend::Native;
use crate::component::TemplateRef;
use crate::error::Result;
use crate::reactive::{untrack, FlushMode};
use crate::template::{Attrs, EventItem, Expr};
use crate::value::{EventHandler, Value};

pub(crate) struct ElementState {
    tag: Rc<str>,
    attrs: Rc<Attrs>,
    native: RefCell<Option<Native>>,
    table: RefCell<Option<Rc<AttrTable>>>,
    listeners: RefCell<Vec<(String, EventHandler)>>,
    inserted: Cell<bool>,
}

impl ElementState {
    pub(crate) fn new(tag: Rc<str>, attrs: Rc<Attrs>) -> Self {
        Self {
            tag,
            attrs,
            native: RefCell::new(None),
            table: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
            inserted: Cell::new(false),
        }
    }

    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    pub(crate) fn native(&self) -> Option<Native> {
        self.native.borrow().clone()
    }

    pub(crate) fn mount(&self, fragment: &Fragment, target: &Native, anchor: Option<&Native>) -> Result<()> {
        let host = fragment.host();
        let native = host.backend.create_element(&self.tag)?;
        HostStats::bump(&host.stats.natives_created);
        *self.native.borrow_mut() = Some(native.clone());

        let table = AttrTable::new(AttrSink::Element {
            host: Rc::clone(host),
            native: native.clone(),
        });
        *self.table.borrow_mut() = Some(Rc::clone(&table));
        attrs::install(fragment, &table, &self.attrs.items, FlushMode::Main)?;

        for event in &self.attrs.events {
            let (name, handler) = match event {
                EventItem::Fixed(name, handler) => (name, handler.clone()),
                EventItem::Dynamic(name, expr) => (name, dispatcher(name, expr)),
            };
            host.backend.add_event_listener(&native, name, &handler)?;
            self.listeners.borrow_mut().push((name.clone(), handler));
        }

        fragment.mount_children(&native, None)?;
        host.backend.insert(&native, target, anchor)?;
        self.inserted.set(true);

        if let (Some(name), Some(scope)) = (&self.attrs.node_ref, fragment.scope()) {
            scope.set_ref(name, TemplateRef::Element(native));
        }
        trace!(fragment = fragment.id(), tag = %self.tag, "element mounted");
        Ok(())
    }

    /// Remove listeners and, when `detach`, the element itself.
    pub(crate) fn release(&self, fragment: &Fragment, detach: bool) {
        let Some(native) = self.native.borrow_mut().take() else {
            return;
        };
        let backend = &fragment.host().backend;

        let listeners: Vec<(String, EventHandler)> = self.listeners.borrow_mut().drain(..).collect();
        for (event, handler) in listeners {
            if let Err(err) = backend.remove_event_listener(&native, &event, &handler) {
                teardown_failed(fragment, "remove_event_listener", &err);
            }
        }
        self.table.borrow_mut().take();

        if let (Some(name), Some(scope)) = (&self.attrs.node_ref, fragment.scope()) {
            scope.clear_ref(name);
        }

        if detach && self.inserted.replace(false) {
            if let Some(target) = fragment.target() {
                if let Err(err) = backend.remove(&native, &target) {
                    teardown_failed(fragment, "remove", &err);
                }
            }
        }
    }
}

/// A listener that forwards to whatever handler `expr` yields when the event
/// fires. Installed once; the expression is read untracked.
pub(crate) fn dispatcher(event: &str, expr: &Expr) -> EventHandler {
    let expr = Rc::clone(expr);
    let event = event.to_string();
    EventHandler::new(move |args| match untrack(|| expr()) {
        Ok(Value::Handler(handler)) => handler.call(args),
        Ok(Value::Unset | Value::Null) => {}
        Ok(other) => warn!(event = %event, value = ?other, "event binding is not a handler"),
        Err(err) => warn!(event = %event, error = %err, "event binding failed"),
    })
}
