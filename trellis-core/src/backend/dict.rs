//! Dictionary Backend
//!
//! Renders into a tree of plain nodes (`type`, `attrs`, `text`, `children`,
//! `handlers`) and records every call it receives. Used by tests and as the
//! reference implementation of the [`Backend`] contract.
//!
//! Besides the contract it can:
//!
//! - dispatch an event to the handlers registered on a node,
//! - snapshot a subtree to JSON,
//! - refuse text nodes, to exercise the text-attribute fallback,
//! - emulate a host event loop: frame tasks are queued until `run_frames`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::json;

use super::{Backend, FrameTask, Native};
use crate::error::BackendError;
use crate::scheduler::EventLoopKind;
use crate::value::{EventHandler, Value};

/// Type name of text nodes.
pub const TEXT_ELEMENT: &str = "TEXT_ELEMENT";

type NodeRef = Rc<RefCell<DictNode>>;

/// One node of the dictionary tree.
#[derive(Debug, Default)]
pub struct DictNode {
    /// Numeric id, in creation order. Containers get ids too.
    pub id: u64,
    pub type_name: String,
    pub attrs: IndexMap<String, Value>,
    pub text: Option<String>,
    pub children: Vec<NodeRef>,
    pub handlers: IndexMap<String, Vec<EventHandler>>,
    parent: Weak<RefCell<DictNode>>,
}

/// A call received by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CreateElement { el: u64, type_name: String },
    CreateText { el: u64 },
    Insert { el: u64, parent: u64, anchor: Option<u64> },
    Remove { el: u64, parent: u64 },
    SetAttribute { el: u64, name: String, value: Value },
    RemoveAttribute { el: u64, name: String, prev: Value },
    AddListener { el: u64, event: String },
    RemoveListener { el: u64, event: String },
    SetText { el: u64, text: String },
}

/// The dictionary backend.
pub struct DictBackend {
    next_id: Cell<u64>,
    calls: RefCell<Vec<BackendCall>>,
    text_nodes: bool,
    event_loop: EventLoopKind,
    frames: RefCell<VecDeque<FrameTask>>,
}

impl DictBackend {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(0),
            calls: RefCell::new(Vec::new()),
            text_nodes: true,
            event_loop: EventLoopKind::None,
            frames: RefCell::new(VecDeque::new()),
        }
    }

    /// A backend whose `create_text_element` is unsupported.
    pub fn without_text_nodes(mut self) -> Self {
        self.text_nodes = false;
        self
    }

    /// Report `kind` from `preferred_event_loop`.
    pub fn with_event_loop(mut self, kind: EventLoopKind) -> Self {
        self.event_loop = kind;
        self
    }

    fn node(&self, type_name: &str) -> NodeRef {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Rc::new(RefCell::new(DictNode {
            id,
            type_name: type_name.to_string(),
            ..DictNode::default()
        }))
    }

    /// A container to render into. Not recorded as a call.
    pub fn container(&self) -> Native {
        Native::from_rc(self.node("root"))
    }

    fn resolve(el: &Native) -> Result<NodeRef, BackendError> {
        el.downcast::<RefCell<DictNode>>()
            .ok_or_else(|| BackendError::Failed("foreign element handle".into()))
    }

    fn id_of(el: &Native) -> u64 {
        el.downcast::<RefCell<DictNode>>()
            .map(|node| node.borrow().id)
            .unwrap_or(u64::MAX)
    }

    fn record(&self, call: BackendCall) {
        self.calls.borrow_mut().push(call);
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    /// Node id behind a handle.
    pub fn id(&self, el: &Native) -> Option<u64> {
        Self::resolve(el).ok().map(|node| node.borrow().id)
    }

    pub fn type_name(&self, el: &Native) -> Option<String> {
        Self::resolve(el).ok().map(|node| node.borrow().type_name.clone())
    }

    pub fn attr(&self, el: &Native, name: &str) -> Option<Value> {
        Self::resolve(el).ok()?.borrow().attrs.get(name).cloned()
    }

    pub fn text(&self, el: &Native) -> Option<String> {
        Self::resolve(el).ok()?.borrow().text.clone()
    }

    /// Direct children of `el`, in order.
    pub fn children(&self, el: &Native) -> Vec<Native> {
        Self::resolve(el)
            .map(|node| node.borrow().children.iter().cloned().map(Native::from_rc).collect())
            .unwrap_or_default()
    }

    /// Depth-first search below `el` for nodes of `type_name`.
    pub fn find_all(&self, el: &Native, type_name: &str) -> Vec<Native> {
        let mut found = Vec::new();
        if let Ok(node) = Self::resolve(el) {
            Self::walk(&node, &mut |n| {
                if n.borrow().type_name == type_name {
                    found.push(Native::from_rc(Rc::clone(n)));
                }
            });
        }
        found
    }

    fn walk(node: &NodeRef, f: &mut impl FnMut(&NodeRef)) {
        let children: Vec<NodeRef> = node.borrow().children.clone();
        for child in &children {
            f(child);
            Self::walk(child, f);
        }
    }

    /// Call every handler registered for `event` on `el`. Returns how many
    /// ran.
    pub fn dispatch(&self, el: &Native, event: &str, args: &[Value]) -> usize {
        let handlers: Vec<EventHandler> = match Self::resolve(el) {
            Ok(node) => node.borrow().handlers.get(event).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for handler in &handlers {
            handler.call(args);
        }
        handlers.len()
    }

    /// JSON snapshot of `el` and its subtree.
    pub fn snapshot(&self, el: &Native) -> serde_json::Value {
        match Self::resolve(el) {
            Ok(node) => Self::snapshot_node(&node),
            Err(_) => serde_json::Value::Null,
        }
    }

    fn snapshot_node(node: &NodeRef) -> serde_json::Value {
        let node = node.borrow();
        let mut out = serde_json::Map::new();
        out.insert("type".into(), json!(node.type_name));
        if !node.attrs.is_empty() {
            let attrs = node.attrs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
            out.insert("attrs".into(), serde_json::Value::Object(attrs));
        }
        if let Some(text) = &node.text {
            out.insert("text".into(), json!(text));
        }
        if !node.children.is_empty() {
            let children = node.children.iter().map(Self::snapshot_node).collect();
            out.insert("children".into(), serde_json::Value::Array(children));
        }
        serde_json::Value::Object(out)
    }

    /// Run queued frame tasks, including ones queued while running. Returns
    /// how many ran.
    pub fn run_frames(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.frames.borrow_mut().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.borrow().len()
    }

    fn detach(node: &NodeRef) {
        let parent = node.borrow().parent.upgrade();
        if let Some(parent) = parent {
            parent.borrow_mut().children.retain(|c| !Rc::ptr_eq(c, node));
        }
        node.borrow_mut().parent = Weak::new();
    }
}

impl Default for DictBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for DictBackend {
    fn create_element(&self, type_name: &str) -> Result<Native, BackendError> {
        let node = self.node(type_name);
        self.record(BackendCall::CreateElement {
            el: node.borrow().id,
            type_name: type_name.to_string(),
        });
        Ok(Native::from_rc(node))
    }

    fn create_text_element(&self) -> Result<Native, BackendError> {
        if !self.text_nodes {
            return Err(BackendError::Unsupported);
        }
        let node = self.node(TEXT_ELEMENT);
        self.record(BackendCall::CreateText { el: node.borrow().id });
        Ok(Native::from_rc(node))
    }

    fn insert(&self, el: &Native, parent: &Native, anchor: Option<&Native>) -> Result<(), BackendError> {
        let node = Self::resolve(el)?;
        let parent_node = Self::resolve(parent)?;
        Self::detach(&node);

        {
            let mut p = parent_node.borrow_mut();
            let index = match anchor {
                Some(anchor) => {
                    let anchor = Self::resolve(anchor)?;
                    p.children
                        .iter()
                        .position(|c| Rc::ptr_eq(c, &anchor))
                        .ok_or_else(|| BackendError::Failed("anchor is not a child of parent".into()))?
                }
                None => p.children.len(),
            };
            p.children.insert(index, Rc::clone(&node));
        }
        node.borrow_mut().parent = Rc::downgrade(&parent_node);

        self.record(BackendCall::Insert {
            el: Self::id_of(el),
            parent: Self::id_of(parent),
            anchor: anchor.map(Self::id_of),
        });
        Ok(())
    }

    fn remove(&self, el: &Native, parent: &Native) -> Result<(), BackendError> {
        let node = Self::resolve(el)?;
        let parent_node = Self::resolve(parent)?;
        let present = parent_node.borrow().children.iter().any(|c| Rc::ptr_eq(c, &node));
        if !present {
            return Err(BackendError::Failed("element is not a child of parent".into()));
        }
        Self::detach(&node);
        self.record(BackendCall::Remove {
            el: Self::id_of(el),
            parent: Self::id_of(parent),
        });
        Ok(())
    }

    fn set_attribute(&self, el: &Native, name: &str, value: &Value) -> Result<(), BackendError> {
        let node = Self::resolve(el)?;
        node.borrow_mut().attrs.insert(name.to_string(), value.clone());
        self.record(BackendCall::SetAttribute {
            el: Self::id_of(el),
            name: name.to_string(),
            value: value.clone(),
        });
        Ok(())
    }

    fn remove_attribute(&self, el: &Native, name: &str, prev: &Value) -> Result<(), BackendError> {
        let node = Self::resolve(el)?;
        node.borrow_mut().attrs.shift_remove(name);
        self.record(BackendCall::RemoveAttribute {
            el: Self::id_of(el),
            name: name.to_string(),
            prev: prev.clone(),
        });
        Ok(())
    }

    fn add_event_listener(&self, el: &Native, event: &str, handler: &EventHandler) -> Result<(), BackendError> {
        let node = Self::resolve(el)?;
        node.borrow_mut()
            .handlers
            .entry(event.to_string())
            .or_default()
            .push(handler.clone());
        self.record(BackendCall::AddListener {
            el: Self::id_of(el),
            event: event.to_string(),
        });
        Ok(())
    }

    fn remove_event_listener(&self, el: &Native, event: &str, handler: &EventHandler) -> Result<(), BackendError> {
        let node = Self::resolve(el)?;
        if let Some(handlers) = node.borrow_mut().handlers.get_mut(event) {
            handlers.retain(|h| !h.ptr_eq(handler));
        }
        self.record(BackendCall::RemoveListener {
            el: Self::id_of(el),
            event: event.to_string(),
        });
        Ok(())
    }

    fn set_element_text(&self, el: &Native, text: &str) -> Result<(), BackendError> {
        let node = Self::resolve(el)?;
        node.borrow_mut().text = Some(text.to_string());
        self.record(BackendCall::SetText {
            el: Self::id_of(el),
            text: text.to_string(),
        });
        Ok(())
    }

    fn preferred_event_loop(&self) -> EventLoopKind {
        self.event_loop
    }

    fn request_frame(&self, task: FrameTask) -> Result<(), BackendError> {
        self.frames.borrow_mut().push_back(task);
        Ok(())
    }
}
