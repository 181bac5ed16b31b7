//! Subscriber types for the reactive system.
//!
//! A subscriber is any computation that depends on reactive values: computed
//! values and effects (attribute bindings, control-flow predicates, list
//! sources, user watchers).

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Ids are handed out in creation order. The scheduler relies on this: within
/// a queue, effects run in ascending id order, which puts a parent fragment's
/// effects before the effects of the children it mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of computation a subscriber is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberKind {
    /// A lazy derived value. Writes are forbidden while it computes.
    Computed,
    /// An eager side effect.
    Effect,
}

/// Dirty state of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyState {
    /// Up to date.
    Clean,

    /// A computed value this subscriber reads was invalidated, but it is
    /// not yet known whether its output actually changed.
    MaybeDirty,

    /// A direct dependency changed; the subscriber must re-run.
    Dirty,
}

impl DirtyState {
    /// Raise the state to `other` if `other` is stronger.
    pub fn raise(self, other: DirtyState) -> DirtyState {
        self.max(other)
    }
}
