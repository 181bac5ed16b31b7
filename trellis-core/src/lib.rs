//! Trellis Core
//!
//! This crate provides the update engine of the Trellis reactive UI runtime.
//! It implements:
//!
//! - Reactive primitives (signals, computed values, effects, containers)
//! - An update scheduler with batching and ordered flushes
//! - The fragment graph that keeps a native widget tree in sync with
//!   component templates
//! - Components, props, slots and lifecycle hooks
//!
//! Rendering goes through a narrow [`Backend`] trait. [`DictBackend`] is an
//! in-memory implementation used by tests.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `scheduler`: Effect queues, flush rounds and `updated` hooks
//! - `template`: The `h` API that describes fragments
//! - `fragment`: Mounting, control flow and keyed list reconciliation
//! - `component`: Component instances and their lifecycle
//! - `backend`: The backend contract and the dict backend
//!
//! # Example
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use trellis_core::{h, App, Attrs, Component, ComponentType, DictBackend, Descriptor, Instance, Result};
//!
//! #[derive(Default)]
//! struct Counter;
//!
//! impl Component for Counter {
//!     fn init(&mut self, cx: &Instance) {
//!         cx.state().set("count", 0);
//!     }
//!
//!     fn render(&self, cx: &Instance) -> Result<Descriptor> {
//!         let state = cx.state().clone();
//!         Ok(h("label", Attrs::new().bind("text", move || state.get("count")), vec![]))
//!     }
//! }
//!
//! let backend = Rc::new(DictBackend::new());
//! let app = App::new(backend.clone());
//! let counter = app.render(&ComponentType::of::<Counter>(), &backend.container(), Attrs::new())?;
//!
//! // The label updates when the write's batch closes.
//! counter.state().set("count", 1);
//! # Ok::<(), trellis_core::Error>(())
//! ```

pub mod backend;
pub mod reactive;
pub mod scheduler;

mod app;
mod component;
mod error;
mod fragment;
mod template;
mod value;

pub use app::{App, AppConfig, Stats};
pub use backend::{Backend, BackendCall, DictBackend, DictNode, FrameTask, Native, TEXT_ELEMENT};
pub use component::{Component, ComponentType, Instance, Props, TemplateRef};
pub use error::{BackendError, Error, Result};
pub use fragment::{Fragment, ItemScope};
pub use reactive::{
    effect, reactive, try_effect, untrack, watch, Computed, Effect, EffectOptions, FlushMode, ReactiveList,
    ReactiveMap, ReactiveSet, Signal,
};
pub use scheduler::{batch, EventLoopKind, Scheduler};
pub use template::{dynamic, each, each_indexed, fragment, h, slot, text, text_with, AttrValue, Attrs, Descriptor, Tag};
pub use value::{EventHandler, Value};
