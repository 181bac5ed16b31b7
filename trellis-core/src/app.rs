//! Application Entry Point
//!
//! An [`App`] binds a backend to the scheduler and mounts root components.
//!
//! # How Flushes Are Driven
//!
//! 1. The event loop comes from [`AppConfig::event_loop`], or the backend's
//!    preference when unset.
//!
//! 2. `None`: every write flushes synchronously when its outermost batch
//!    closes. Nothing else to do.
//!
//! 3. `Host`: the first write after an idle period asks the backend for a
//!    frame; the frame task flushes. A backend that cannot schedule frames
//!    leaves the flush to [`App::flush`].
//!
//! 4. `Cooperative`: the first write after an idle period wakes
//!    [`App::tick`], which flushes on the current tokio task.
//!
//! The scheduler is per thread, so apps on one thread share its
//! configuration: the most recently created app wins, and dropping an app
//! restores synchronous flushing.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, Native};
use crate::component::{ComponentType, Instance};
use crate::error::{Error, Result};
use crate::fragment::{build, Fragment, Host};
use crate::reactive::Runtime;
use crate::scheduler::{batch, EventLoopKind, Scheduler, DEFAULT_MAX_FLUSH_ROUNDS};
use crate::template::{h, Attrs, Descriptor};

/// App settings. Every field has a default, so any subset may be given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Overrides the backend's preferred event loop.
    pub event_loop: Option<EventLoopKind>,
    /// Rounds a flush may take before it halts.
    pub max_flush_rounds: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            event_loop: None,
            max_flush_rounds: DEFAULT_MAX_FLUSH_ROUNDS,
        }
    }
}

impl AppConfig {
    /// Parse a JSON config, e.g. `{"event_loop": "cooperative"}`.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Counters for the app's trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Stats {
    pub fragments_created: usize,
    pub fragments_disposed: usize,
    pub natives_created: usize,
    pub moves: usize,
    /// Effects alive on this thread, across apps.
    pub live_effects: usize,
}

pub struct App {
    host: Rc<Host>,
    event_loop: EventLoopKind,
    notify: Rc<Notify>,
    roots: RefCell<Vec<Fragment>>,
}

impl App {
    pub fn new(backend: Rc<dyn Backend>) -> Self {
        Self::with_config(backend, AppConfig::default())
    }

    pub fn with_config(backend: Rc<dyn Backend>, config: AppConfig) -> Self {
        let event_loop = config.event_loop.unwrap_or_else(|| backend.preferred_event_loop());
        let notify = Rc::new(Notify::new());

        let waker: Option<Rc<dyn Fn()>> = match event_loop {
            EventLoopKind::None => None,
            EventLoopKind::Host => {
                let backend = Rc::downgrade(&backend);
                Some(Rc::new(move || {
                    let Some(backend) = backend.upgrade() else {
                        return;
                    };
                    let task = Box::new(|| {
                        if let Err(err) = Scheduler::flush() {
                            error!(error = %err, "frame flush failed");
                        }
                    });
                    if let Err(err) = backend.request_frame(task) {
                        warn!(error = %err, "backend cannot schedule frames; waiting for App::flush");
                    }
                }))
            }
            EventLoopKind::Cooperative => {
                let notify = Rc::clone(&notify);
                Some(Rc::new(move || notify.notify_one()))
            }
        };
        Scheduler::configure(event_loop, config.max_flush_rounds, waker);
        info!(?event_loop, max_flush_rounds = config.max_flush_rounds, "app created");

        Self {
            host: Host::new(backend),
            event_loop,
            notify,
            roots: RefCell::new(Vec::new()),
        }
    }

    /// Make `ty` resolvable by name from every template of this app.
    pub fn register(&self, ty: ComponentType) -> &Self {
        self.host.components.borrow_mut().push(ty);
        self
    }

    /// Mount `ty` as a root component in `container`.
    pub fn render(&self, ty: &ComponentType, container: &Native, attrs: Attrs) -> Result<Instance> {
        let root = self.mount(&h(ty.clone(), attrs, vec![]), container)?;
        root.instance()
            .ok_or_else(|| Error::render(ty.name(), "root did not produce an instance"))
    }

    /// Mount any descriptor as a root in `container`.
    pub fn mount(&self, desc: &Descriptor, container: &Native) -> Result<Fragment> {
        let root = build(desc, &self.host, None)?;
        let flushed = batch(|| root.mount(container, None));
        if root.is_mounted() {
            self.roots.borrow_mut().push(root.clone());
        }
        flushed??;
        debug!(fragment = root.id(), kind = root.kind_name(), "root mounted");
        Ok(root)
    }

    /// Unmount a root component. Returns whether `instance` was one.
    pub fn unmount(&self, instance: &Instance) -> bool {
        let position = self
            .roots
            .borrow()
            .iter()
            .position(|root| root.instance().is_some_and(|i| i.ptr_eq(instance)));
        let Some(position) = position else {
            return false;
        };
        let root = self.roots.borrow_mut().remove(position);
        root.unmount();
        true
    }

    /// Run pending work now.
    pub fn flush(&self) -> Result<()> {
        Scheduler::flush()
    }

    /// Wait until work is queued, then flush. For the cooperative loop.
    pub async fn tick(&self) -> Result<()> {
        if Scheduler::pending() == 0 {
            self.notify.notified().await;
        }
        Scheduler::flush()
    }

    /// The error of the most recent failed flush.
    pub fn take_error(&self) -> Option<Error> {
        Scheduler::take_error()
    }

    /// Resume after a flush overflow.
    pub fn reset_halt(&self) {
        Scheduler::reset_halt();
    }

    pub fn event_loop(&self) -> EventLoopKind {
        self.event_loop
    }

    pub fn backend(&self) -> &Rc<dyn Backend> {
        &self.host.backend
    }

    pub fn stats(&self) -> Stats {
        let stats = &self.host.stats;
        Stats {
            fragments_created: stats.fragments_created.get(),
            fragments_disposed: stats.fragments_disposed.get(),
            natives_created: stats.natives_created.get(),
            moves: stats.moves.get(),
            live_effects: Runtime::live_effects(),
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        let roots = std::mem::take(&mut *self.roots.borrow_mut());
        for root in roots.iter().rev() {
            root.unmount();
        }
        Scheduler::configure(EventLoopKind::None, DEFAULT_MAX_FLUSH_ROUNDS, None);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
