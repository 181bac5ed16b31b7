//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computed
//! values, effects and reactive containers. These primitives form the
//! foundation of Trellis's fine-grained updates; every attribute binding,
//! conditional and list in a mounted tree is an effect over them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed value or effect), the signal
//! automatically registers that context as a dependent. When the signal's
//! value changes, all dependents are notified.
//!
//! ## Computed values
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes, and only when someone reads it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are queued with the [scheduler](crate::scheduler)
//! and run in consistent flushes rather than inside the write.
//!
//! ## Containers
//!
//! [`ReactiveMap`], [`ReactiveList`] and [`ReactiveSet`] notify on mutation
//! rather than on reassignment. [`reactive`] turns plain data into them.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a value is read, we check if there is an active
//! tracking context and, if so, register the dependency in both directions.
//! Everything is single-threaded: handles are `Rc`, not `Arc`.

mod collections;
mod computed;
mod context;
mod effect;
mod runtime;
mod signal;
mod subscriber;

pub use collections::{reactive, ReactiveList, ReactiveMap, ReactiveSet};
pub use computed::Computed;
pub use context::{untrack, ReactiveContext};
pub use effect::{
    effect, try_effect, watch, DebugEvent, DebugHook, Effect, EffectOptions, EffectScheduler,
    FlushMode,
};
pub use runtime::Runtime;
pub use signal::Signal;
pub use subscriber::{DirtyState, SubscriberId, SubscriberKind};
