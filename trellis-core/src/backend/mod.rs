//! Backend Interface
//!
//! A backend produces and mutates native elements: GUI widgets, scene-graph
//! nodes, or the nested dictionaries of [`DictBackend`]. The engine never
//! looks inside a [`Native`] handle; everything goes through this trait.
//!
//! # Contract
//!
//! - `insert(el, parent, anchor)` places `el` before `anchor` under
//!   `parent`, or appends when `anchor` is `None`. Inserting an element that
//!   is already in `parent` moves it.
//! - `remove_attribute` receives the value being removed so the backend can
//!   restore a default.
//! - Type names and event names are passed through verbatim; a backend may
//!   normalize them.
//! - Backends without text nodes return [`BackendError::Unsupported`] from
//!   `create_text_element`; the engine then writes text to the parent's
//!   `text` attribute.

mod dict;

pub use dict::{BackendCall, DictBackend, DictNode, TEXT_ELEMENT};

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::BackendError;
use crate::scheduler::EventLoopKind;
use crate::value::{EventHandler, Value};

/// An opaque native element handle. Compares by identity.
#[derive(Clone)]
pub struct Native(Rc<dyn Any>);

impl Native {
    /// Wrap a backend-owned value.
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Wrap an existing shared value; the handle is identical to the `Rc`.
    pub fn from_rc<T: Any>(rc: Rc<T>) -> Self {
        Self(rc)
    }

    /// Recover the backend's own type.
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.0).downcast::<T>().ok()
    }

    pub fn ptr_eq(&self, other: &Native) -> bool {
        self.addr() == other.addr()
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Native {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Native {}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native@{:x}", self.addr())
    }
}

/// A task handed to the host loop.
pub type FrameTask = Box<dyn FnOnce()>;

/// The narrow contract every backend implements.
pub trait Backend {
    fn create_element(&self, type_name: &str) -> Result<Native, BackendError>;

    /// Optional; the default has no text nodes.
    fn create_text_element(&self) -> Result<Native, BackendError> {
        Err(BackendError::Unsupported)
    }

    fn insert(&self, el: &Native, parent: &Native, anchor: Option<&Native>) -> Result<(), BackendError>;

    fn remove(&self, el: &Native, parent: &Native) -> Result<(), BackendError>;

    fn set_attribute(&self, el: &Native, name: &str, value: &Value) -> Result<(), BackendError>;

    fn remove_attribute(&self, el: &Native, name: &str, prev: &Value) -> Result<(), BackendError>;

    fn add_event_listener(&self, el: &Native, event: &str, handler: &EventHandler) -> Result<(), BackendError>;

    fn remove_event_listener(&self, el: &Native, event: &str, handler: &EventHandler) -> Result<(), BackendError>;

    fn set_element_text(&self, el: &Native, text: &str) -> Result<(), BackendError>;

    fn preferred_event_loop(&self) -> EventLoopKind {
        EventLoopKind::None
    }

    /// Schedule `task` on the host loop. Needed by backends preferring
    /// [`EventLoopKind::Host`].
    fn request_frame(&self, task: FrameTask) -> Result<(), BackendError> {
        drop(task);
        Err(BackendError::Unsupported)
    }
}
