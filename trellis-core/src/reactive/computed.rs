//! Computed Values
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Values Work
//!
//! 1. On first access, the computed runs its function and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns the cache.
//!
//! 3. When a direct dependency changes, the computed is marked "dirty" and
//!    its own dependents are marked "maybe dirty".
//!
//! 4. On next access a dirty computed recomputes. A maybe-dirty one first
//!    refreshes the computed values it reads; only if one of them produced a
//!    new value does it recompute.
//!
//! 5. A recomputation whose result compares equal to the cache (by
//!    `PartialEq`, or by a custom comparator) does not dirty dependents.
//!
//! # Failures
//!
//! - Reading a computed while it is computing raises
//!   [`Error::CyclicDependency`].
//! - Writing any reactive value while a computed is evaluating raises
//!   [`Error::WriteDuringComputed`].
//!
//! Both faults are recorded on the enclosing computation as well, so they
//! surface from the outermost `get` even when intermediate code discards
//! the `Result`.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use tracing::error;

use super::context::{DepList, ReactiveContext};
use super::runtime::{Dep, Reactive, ReactiveHandle, Runtime};
use super::subscriber::{DirtyState, SubscriberId, SubscriberKind};
use crate::error::Error;

type ComputeFn<T> = Box<dyn Fn() -> Result<T, Error>>;
type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

/// A lazy, memoized derivation of reactive reads.
///
/// Clones share the same cache.
///
/// # Example
///
/// ```rust,ignore
/// let first = Signal::new("Ada".to_string());
/// let f = first.clone();
/// let greeting = Computed::new(move || format!("Hello, {}", f.get()));
///
/// assert_eq!(greeting.get()?, "Hello, Ada");
/// ```
pub struct Computed<T>
where
    T: Clone + 'static,
{
    inner: Rc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    id: SubscriberId,
    compute: ComputeFn<T>,
    equals: EqualsFn<T>,
    value: RefCell<Option<T>>,
    state: Cell<DirtyState>,
    computing: Cell<bool>,
    notifying: Cell<bool>,
    /// Sources read during the last computation.
    deps: RefCell<DepList>,
    /// Our own subscribers.
    dep: Rc<Dep>,
    handle: RefCell<Option<ReactiveHandle>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a computed value from an infallible function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::with_comparator(move || Ok(compute()), T::eq)
    }

    /// Create a computed value from a fallible function.
    pub fn try_new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T, Error> + 'static,
    {
        Self::with_comparator(compute, T::eq)
    }
}

impl<T> Computed<T>
where
    T: Clone + 'static,
{
    /// Create a computed value that uses `equals` to decide whether a new
    /// result counts as a change.
    pub fn with_comparator<F, E>(compute: F, equals: E) -> Self
    where
        F: Fn() -> Result<T, Error> + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        let id = SubscriberId::new();
        let inner = Rc::new_cyclic(|this: &Weak<ComputedInner<T>>| {
            let source: Weak<dyn Reactive> = this.clone();
            ComputedInner {
                id,
                compute: Box::new(compute),
                equals: Box::new(equals),
                value: RefCell::new(None),
                state: Cell::new(DirtyState::Dirty),
                computing: Cell::new(false),
                notifying: Cell::new(false),
                deps: RefCell::new(DepList::new()),
                dep: Dep::with_source(source),
                handle: RefCell::new(None),
            }
        });

        let weak: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        *inner.handle.borrow_mut() = Some(Runtime::register(weak, id));

        Self { inner }
    }

    /// Get the subscriber ID for this computed.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Id of the dep other computations subscribe to.
    pub fn id(&self) -> u64 {
        self.inner.dep.id()
    }

    /// Get the current value, recomputing if necessary, and record a
    /// dependency on it.
    pub fn get(&self) -> Result<T, Error> {
        let value = self.get_untracked();
        self.inner.dep.track();
        value
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> Result<T, Error> {
        if let Err(err) = self.inner.refresh() {
            ReactiveContext::raise(err.clone());
            return Err(err);
        }
        self.inner
            .value
            .borrow()
            .clone()
            .ok_or(Error::CyclicDependency)
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DirtyState {
        self.inner.state.get()
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Get the number of dependents.
    pub fn subscriber_count(&self) -> usize {
        self.inner.dep.subscriber_count()
    }
}

impl<T> ComputedInner<T> {
    /// Bring the cache up to date. Returns whether the value changed.
    fn refresh(&self) -> Result<bool, Error> {
        if self.computing.get() {
            error!(computed = self.id.raw(), "cyclic dependency");
            return Err(Error::CyclicDependency);
        }

        match self.state.get() {
            DirtyState::Clean => Ok(false),
            DirtyState::MaybeDirty => {
                let deps: Vec<_> = self.deps.borrow().iter().cloned().collect();
                for dep in deps {
                    if let Some(source) = dep.source() {
                        source.refresh()?;
                        if self.state.get() == DirtyState::Dirty {
                            break;
                        }
                    }
                }
                if self.state.get() == DirtyState::Dirty {
                    self.recompute()
                } else {
                    self.state.set(DirtyState::Clean);
                    Ok(false)
                }
            }
            DirtyState::Dirty => self.recompute(),
        }
    }

    fn recompute(&self) -> Result<bool, Error> {
        self.computing.set(true);
        let ctx = ReactiveContext::enter(self.id, SubscriberKind::Computed);
        let outcome = (self.compute)();
        let (deps, fault) = ctx.finish();
        self.computing.set(false);

        let old = std::mem::replace(&mut *self.deps.borrow_mut(), deps);
        {
            let current = self.deps.borrow();
            for dep in old {
                if !current.iter().any(|d| Rc::ptr_eq(d, &dep)) {
                    dep.remove_subscriber(self.id);
                }
            }
        }

        let next = match (outcome, fault) {
            (Err(err), _) | (Ok(_), Some(err)) => {
                // Stay dirty so the next read tries again.
                self.state.set(DirtyState::Dirty);
                return Err(err);
            }
            (Ok(next), None) => next,
        };

        let changed = match self.value.borrow().as_ref() {
            Some(prev) => !(self.equals)(prev, &next),
            None => true,
        };
        if changed {
            *self.value.borrow_mut() = Some(next);
        }
        self.state.set(DirtyState::Clean);

        if changed {
            Runtime::confirm_change(&self.dep);
        }
        Ok(changed)
    }
}

impl<T> Reactive for ComputedInner<T> {
    fn notify(&self, state: DirtyState, _source: u64) {
        self.state.set(self.state.get().raise(state));
        if self.notifying.replace(true) {
            return;
        }
        Runtime::trigger(&self.dep, DirtyState::MaybeDirty);
        self.notifying.set(false);
    }

    fn mark_dirty(&self) {
        if self.state.get() != DirtyState::Clean {
            self.state.set(DirtyState::Dirty);
        }
    }

    fn refresh(&self) -> Result<bool, Error> {
        ComputedInner::refresh(self)
    }

    fn is_eager(&self) -> bool {
        false
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().drain(..) {
            dep.remove_subscriber(self.id);
        }
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("value", &self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
