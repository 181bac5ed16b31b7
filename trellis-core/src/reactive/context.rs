//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a reactive value is read,
//! we register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When entering a reactive context (running a computed or effect), we push
//! the subscriber onto the stack. When the computation completes, we pop it
//! and hand the collected dependencies back to the subscriber so it can
//! record the reverse edges used for cleanup on the next run.
//!
//! Untracked sections push an entry without a subscriber, which masks the
//! computation below it: reads inside are tracking-free.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;

use super::effect::{DebugEvent, DebugHook};
use super::runtime::Dep;
use super::{SubscriberId, SubscriberKind};
use crate::error::Error;

/// Dependencies collected during one run of a computation.
pub(crate) type DepList = SmallVec<[Rc<Dep>; 4]>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The running computation; `None` for untracked sections.
    subscriber: Option<(SubscriberId, SubscriberKind)>,
    /// Dependencies read during this run, in first-read order.
    dependencies: DepList,
    /// First fault raised while this entry was on top.
    fault: Option<Error>,
    /// Debug hook fired for every newly tracked dependency.
    on_track: Option<DebugHook>,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub struct ReactiveContext {
    subscriber: Option<SubscriberId>,
    finished: Cell<bool>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is active, any reactive value that is read will
    /// register the subscriber as a dependent.
    pub fn enter(subscriber_id: SubscriberId, kind: SubscriberKind) -> Self {
        Self::push(Some((subscriber_id, kind)), None)
    }

    /// Enter a context that reports every new dependency to `on_track`.
    pub(crate) fn enter_with_hook(
        subscriber_id: SubscriberId,
        kind: SubscriberKind,
        on_track: Option<DebugHook>,
    ) -> Self {
        Self::push(Some((subscriber_id, kind)), on_track)
    }

    /// Enter an untracked section. Reads inside record nothing.
    pub fn untracked() -> Self {
        Self::push(None, None)
    }

    fn push(subscriber: Option<(SubscriberId, SubscriberKind)>, on_track: Option<DebugHook>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber,
                dependencies: SmallVec::new(),
                fault: None,
                on_track,
            });
        });

        Self {
            subscriber: subscriber.map(|(id, _)| id),
            finished: Cell::new(false),
        }
    }

    /// Pop this context and return what it collected.
    pub(crate) fn finish(self) -> (DepList, Option<Error>) {
        self.finished.set(true);
        CONTEXT_STACK.with(|stack| {
            let entry = stack.borrow_mut().pop();
            match entry {
                Some(entry) => {
                    debug_assert_eq!(
                        entry.subscriber.map(|(id, _)| id),
                        self.subscriber,
                        "ReactiveContext mismatch"
                    );
                    (entry.dependencies, entry.fault)
                }
                None => (SmallVec::new(), None),
            }
        })
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the current subscriber ID, if reads are being tracked.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .and_then(|entry| entry.subscriber.map(|(id, _)| id))
        })
    }

    /// Record a dependency on `dep` for the current computation.
    ///
    /// This is called by every reactive value when it is read.
    pub(crate) fn track(dep: &Rc<Dep>) {
        let hook = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let entry = stack.last_mut()?;
            let (subscriber_id, _) = entry.subscriber?;

            dep.add_subscriber(subscriber_id);
            if entry.dependencies.iter().any(|d| Rc::ptr_eq(d, dep)) {
                return None;
            }
            entry.dependencies.push(Rc::clone(dep));
            entry
                .on_track
                .clone()
                .map(|hook| (hook, DebugEvent { subscriber: subscriber_id, source: dep.id() }))
        });

        if let Some((hook, event)) = hook {
            hook(&event);
        }
    }

    /// The nearest tracked computation's kind, skipping untracked sections.
    fn nearest_kind() -> Option<SubscriberKind> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find_map(|entry| entry.subscriber.map(|(_, kind)| kind))
        })
    }

    /// Record a fault on the innermost tracked computation. Only the first
    /// fault is kept.
    pub(crate) fn raise(error: Error) {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(entry) = stack.iter_mut().rev().find(|entry| entry.subscriber.is_some()) {
                entry.fault.get_or_insert(error);
            }
        });
    }

    /// Reject reactive writes while a computed value is evaluating.
    pub(crate) fn guard_write() -> Result<(), Error> {
        if Self::nearest_kind() == Some(SubscriberKind::Computed) {
            Self::raise(Error::WriteDuringComputed);
            return Err(Error::WriteDuringComputed);
        }
        Ok(())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if self.finished.get() {
            return;
        }
        // Unwinding path: keep the stack balanced. `try_with` because the
        // thread-local may already be gone during thread teardown.
        let _ = CONTEXT_STACK.try_with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` with dependency tracking suspended.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let ctx = ReactiveContext::untracked();
    let result = f();
    let _ = ctx.finish();
    result
}
