//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects reactive sources
//! (signals, container keys, computed values) with their subscribers
//! (computed values and effects).
//!
//! # How It Works
//!
//! 1. Every subscriber registers with the runtime and receives a handle
//!    that unregisters it again when dropped.
//!
//! 2. Every source owns a [`Dep`]: the ordered set of subscriber ids that
//!    read it during their last run. Reads go through
//!    [`ReactiveContext::track`](super::ReactiveContext), which adds the
//!    forward edge here and the reverse edge on the subscriber.
//!
//! 3. When a source changes, the runtime:
//!    a. Finds all subscribers in the dep
//!    b. Marks them dirty
//!    c. Computed values propagate "maybe dirty" to their own dependents
//!    d. Effects are queued with the scheduler
//!
//! All of this happens inside an implicit batch, so a single write never
//! lets a dependent observe a half-propagated state.
//!
//! # Threading
//!
//! The engine is single-threaded. The registry lives in a thread-local, the
//! same as the tracking context; reactive values must not cross threads.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use super::context::ReactiveContext;
use super::subscriber::{DirtyState, SubscriberId};
use crate::error::Error;
use crate::scheduler::Scheduler;

/// A trait for types that can be notified when dependencies change.
pub(crate) trait Reactive {
    /// Raise the dirty state and, for effects, schedule a re-run.
    ///
    /// `source` is the id of the dep that changed.
    fn notify(&self, state: DirtyState, source: u64);

    /// Raise the dirty state to `Dirty` without scheduling anything.
    ///
    /// Used when an upstream computed value confirmed that its output
    /// changed while the subscriber was already waiting in a queue.
    fn mark_dirty(&self);

    /// Bring a computed value up to date. Returns whether its output changed.
    ///
    /// Effects are never sources, so the default does nothing.
    fn refresh(&self) -> Result<bool, Error> {
        Ok(false)
    }

    /// Check if this reactive value is an effect (eager) or computed (lazy).
    fn is_eager(&self) -> bool;
}

/// Handle to a registered reactive value.
///
/// Dropping this handle unregisters the reactive value from the runtime.
pub(crate) struct ReactiveHandle {
    subscriber_id: SubscriberId,
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id);
    }
}

// ----------------------------------------------------------------------------
// Dep
// ----------------------------------------------------------------------------

fn next_dep_id() -> u64 {
    thread_local! {
        static COUNTER: Cell<u64> = const { Cell::new(0) };
    }
    COUNTER.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    })
}

/// The subscriber set of one reactive source.
///
/// Insertion order is subscription order.
pub(crate) struct Dep {
    id: u64,
    subscribers: RefCell<IndexSet<SubscriberId>>,
    /// The computed value this dep belongs to, if any. Subscribers that were
    /// only marked "maybe dirty" ask it to refresh before deciding to run.
    source: Option<Weak<dyn Reactive>>,
}

impl Dep {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id: next_dep_id(),
            subscribers: RefCell::new(IndexSet::new()),
            source: None,
        })
    }

    /// A dep owned by a computed value.
    pub fn with_source(source: Weak<dyn Reactive>) -> Rc<Self> {
        Rc::new(Self {
            id: next_dep_id(),
            subscribers: RefCell::new(IndexSet::new()),
            source: Some(source),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record a read of this source by the current computation.
    pub fn track(self: &Rc<Self>) {
        ReactiveContext::track(self);
    }

    /// Notify every subscriber that this source changed.
    pub fn trigger(&self) {
        Runtime::trigger(self, DirtyState::Dirty);
    }

    pub fn add_subscriber(&self, id: SubscriberId) {
        self.subscribers.borrow_mut().insert(id);
    }

    pub fn remove_subscriber(&self, id: SubscriberId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    #[cfg(test)]
    pub fn has_subscriber(&self, id: SubscriberId) -> bool {
        self.subscribers.borrow().contains(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn subscribers(&self) -> Vec<SubscriberId> {
        self.subscribers.borrow().iter().copied().collect()
    }

    /// The computed value behind this dep, if it is still alive.
    pub fn source(&self) -> Option<Rc<dyn Reactive>> {
        self.source.as_ref().and_then(Weak::upgrade)
    }
}

// ----------------------------------------------------------------------------
// Runtime
// ----------------------------------------------------------------------------

thread_local! {
    // Maps subscriber IDs to weak references to avoid preventing cleanup.
    static REGISTRY: RefCell<HashMap<SubscriberId, Weak<dyn Reactive>>> = RefCell::new(HashMap::new());
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Register a reactive value with the runtime.
    ///
    /// Returns a handle that unregisters the value when dropped.
    pub(crate) fn register(reactive: Weak<dyn Reactive>, id: SubscriberId) -> ReactiveHandle {
        REGISTRY.with(|registry| {
            registry.borrow_mut().insert(id, reactive);
        });

        ReactiveHandle { subscriber_id: id }
    }

    /// Unregister a reactive value.
    fn unregister(id: SubscriberId) {
        let _ = REGISTRY.try_with(|registry| {
            registry.borrow_mut().remove(&id);
        });
    }

    /// Look up a live subscriber.
    pub(crate) fn lookup(id: SubscriberId) -> Option<Rc<dyn Reactive>> {
        REGISTRY.with(|registry| registry.borrow().get(&id).and_then(Weak::upgrade))
    }

    /// Notify all subscribers of `dep`.
    ///
    /// This is the core update propagation mechanism. The notification runs
    /// inside an implicit batch; the outermost batch decides when to flush.
    pub(crate) fn trigger(dep: &Dep, state: DirtyState) {
        let subscribers: Vec<Rc<dyn Reactive>> = dep
            .subscribers()
            .into_iter()
            .filter_map(Self::lookup)
            .collect();

        if subscribers.is_empty() {
            return;
        }

        Scheduler::begin_batch();
        for subscriber in subscribers {
            subscriber.notify(state, dep.id());
        }
        // Errors are recorded by the scheduler and surfaced through
        // `App::take_error`; a bare write has no caller to return them to.
        let _ = Scheduler::end_batch();
    }

    /// Upgrade every subscriber of `dep` to dirty without scheduling.
    pub(crate) fn confirm_change(dep: &Dep) {
        for subscriber in dep.subscribers().into_iter().filter_map(Self::lookup) {
            subscriber.mark_dirty();
        }
    }

    /// Number of live effects registered on this thread.
    pub fn live_effects() -> usize {
        REGISTRY.with(|registry| {
            registry
                .borrow()
                .values()
                .filter_map(Weak::upgrade)
                .filter(|reactive| reactive.is_eager())
                .count()
        })
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a tracking context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}
