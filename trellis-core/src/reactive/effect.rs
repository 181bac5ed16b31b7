//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless it is `lazy`).
//!
//! 2. When any dependency changes, the effect is queued with the scheduler
//!    under its [`FlushMode`]. `Sync` effects run on the spot instead.
//!
//! 3. An effect that was only marked "maybe dirty" (a computed value it reads
//!    was invalidated) first asks those computed values to refresh. If none
//!    of them actually produced a new value, the run is skipped.
//!
//! 4. After each run, dependencies that were not read again are dropped, so a
//!    source only ever holds subscribers that read it last time.
//!
//! # Failures
//!
//! An effect function returns `Result<(), Error>`. Localized errors (a
//! binding that failed to evaluate) are logged and mark the effect as
//! faulted; whatever the effect wrote last stays in place. Structural errors
//! are returned to the scheduler and stop the flush.
//!
//! # Ownership
//!
//! Effects are owned by a fragment or a component instance, which disposes
//! them on unmount. Disposal removes the effect from every dependency set and
//! from the scheduler's queues; an effect that was about to run is skipped.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{error, trace, warn};

use super::context::{untrack, DepList, ReactiveContext};
use super::runtime::{Reactive, ReactiveHandle, Runtime};
use super::subscriber::{DirtyState, SubscriberId, SubscriberKind};
use crate::error::Error;
use crate::scheduler::{EffectOwner, Job, Scheduler};
use crate::value::Value;

/// Which queue an effect is flushed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlushMode {
    /// Before render updates. Used for input projections such as props.
    #[default]
    Pre,
    /// Render updates: attribute bindings, control flow, lists, slots.
    Main,
    /// After render updates.
    Post,
    /// Immediately, inside the write that triggered it.
    Sync,
}

/// Passed to the `on_track` and `on_trigger` debug hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugEvent {
    /// The effect being tracked or triggered.
    pub subscriber: SubscriberId,
    /// Id of the reactive source involved.
    pub source: u64,
}

/// A debug callback.
pub type DebugHook = Rc<dyn Fn(&DebugEvent)>;

/// A custom scheduler: receives the effect instead of it being queued.
pub type EffectScheduler = Rc<dyn Fn(&Effect)>;

/// Options for [`Effect`] and [`watch`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// `watch` only: fire the callback with the initial value.
    pub immediate: bool,
    /// Do not run on creation; wait for an explicit [`Effect::run`].
    pub lazy: bool,
    /// `watch` only: traverse the source value and fire on nested mutation.
    pub deep: bool,
    /// Queue the effect is flushed from.
    pub flush: FlushMode,
    /// Called for every dependency recorded during a run.
    pub on_track: Option<DebugHook>,
    /// Called whenever a dependency change reaches this effect.
    pub on_trigger: Option<DebugHook>,
    /// Replaces queueing; the callback decides when to call [`Effect::run`].
    pub scheduler: Option<EffectScheduler>,
    /// The component whose `updated` hook re-runs of this effect count
    /// towards.
    pub owner: Option<Weak<dyn EffectOwner>>,
    /// Name used in log output.
    pub label: Option<Rc<str>>,
}

impl EffectOptions {
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn flush(mut self, mode: FlushMode) -> Self {
        self.flush = mode;
        self
    }

    pub fn on_track(mut self, hook: impl Fn(&DebugEvent) + 'static) -> Self {
        self.on_track = Some(Rc::new(hook));
        self
    }

    pub fn on_trigger(mut self, hook: impl Fn(&DebugEvent) + 'static) -> Self {
        self.on_trigger = Some(Rc::new(hook));
        self
    }

    pub fn scheduler(mut self, scheduler: impl Fn(&Effect) + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }

    pub fn owner(mut self, owner: Weak<dyn EffectOwner>) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn label(mut self, label: impl Into<Rc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Create an effect from an infallible function.
    pub fn effect<F>(self, mut run: F) -> Effect
    where
        F: FnMut() + 'static,
    {
        let effect = Effect::create(
            self,
            Box::new(move || {
                run();
                Ok(())
            }),
        );
        if let Err(err) = effect.start() {
            Scheduler::record_error(err);
        }
        effect
    }

    /// Create an effect from a fallible function.
    ///
    /// A structural error from the first run is returned and the effect is
    /// disposed.
    pub fn try_effect<F>(self, run: F) -> Result<Effect, Error>
    where
        F: FnMut() -> Result<(), Error> + 'static,
    {
        let effect = Effect::create(self, Box::new(run));
        if let Err(err) = effect.start() {
            effect.dispose();
            return Err(err);
        }
        Ok(effect)
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("immediate", &self.immediate)
            .field("lazy", &self.lazy)
            .field("deep", &self.deep)
            .field("flush", &self.flush)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

type RunFn = Box<dyn FnMut() -> Result<(), Error>>;

/// A side-effecting computation that runs when dependencies change.
///
/// Clones share the same effect.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let c = count.clone();
/// let effect = effect(move || {
///     println!("Count is: {}", c.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Effect(Rc<EffectInner>);

struct EffectInner {
    id: SubscriberId,
    this: Weak<EffectInner>,
    run: RefCell<RunFn>,
    deps: RefCell<DepList>,
    state: Cell<DirtyState>,
    running: Cell<bool>,
    disposed: Cell<bool>,
    faulted: Cell<bool>,
    run_count: Cell<usize>,
    options: EffectOptions,
    handle: RefCell<Option<ReactiveHandle>>,
}

impl Effect {
    fn create(options: EffectOptions, run: RunFn) -> Self {
        let id = SubscriberId::new();
        let inner = Rc::new_cyclic(|this| EffectInner {
            id,
            this: this.clone(),
            run: RefCell::new(run),
            deps: RefCell::new(DepList::new()),
            state: Cell::new(DirtyState::Clean),
            running: Cell::new(false),
            disposed: Cell::new(false),
            faulted: Cell::new(false),
            run_count: Cell::new(0),
            options,
            handle: RefCell::new(None),
        });

        let weak: Weak<dyn Reactive> = Rc::downgrade(&inner) as Weak<dyn Reactive>;
        *inner.handle.borrow_mut() = Some(Runtime::register(weak, id));

        Self(inner)
    }

    fn start(&self) -> Result<(), Error> {
        if self.0.options.lazy {
            return Ok(());
        }
        self.0.execute()
    }

    /// The effect's subscriber id. Ids grow in creation order.
    pub fn id(&self) -> SubscriberId {
        self.0.id
    }

    /// Run the effect now, whatever its dirty state.
    pub fn run(&self) -> Result<(), Error> {
        self.0.execute()
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again and no source holds it.
    pub fn dispose(&self) {
        self.0.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    /// Whether the last run ended in a localized error.
    pub fn is_faulted(&self) -> bool {
        self.0.faulted.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.0.run_count.get()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.0.deps.borrow().len()
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.0.options.flush
    }

    pub fn ptr_eq(&self, other: &Effect) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl EffectInner {
    fn label(&self) -> &str {
        self.options.label.as_deref().unwrap_or("effect")
    }

    /// Run the function inside a tracking context and swap in the new
    /// dependency set.
    fn execute(&self) -> Result<(), Error> {
        if self.disposed.get() {
            return Ok(());
        }
        // Already running further up the stack.
        let Ok(mut run) = self.run.try_borrow_mut() else {
            return Ok(());
        };

        let first = self.run_count.get() == 0;
        self.running.set(true);
        trace!(effect = self.id.raw(), label = self.label(), "running effect");

        let ctx = ReactiveContext::enter_with_hook(
            self.id,
            SubscriberKind::Effect,
            self.options.on_track.clone(),
        );
        let outcome = run();
        let (deps, fault) = ctx.finish();
        drop(run);

        self.running.set(false);
        self.state.set(DirtyState::Clean);
        self.run_count.set(self.run_count.get() + 1);
        self.swap_deps(deps);

        let outcome = match (outcome, fault) {
            (Err(err), _) | (Ok(()), Some(err)) => Err(err),
            (Ok(()), None) => Ok(()),
        };

        match outcome {
            Ok(()) => {
                self.faulted.set(false);
                if !first && !self.disposed.get() {
                    self.notify_owner();
                }
                Ok(())
            }
            Err(err) if !err.is_structural() => {
                warn!(
                    effect = self.id.raw(),
                    label = self.label(),
                    error = %err,
                    "binding failed; previous value retained"
                );
                self.faulted.set(true);
                Ok(())
            }
            Err(err) => {
                error!(effect = self.id.raw(), label = self.label(), error = %err, "effect failed");
                self.faulted.set(true);
                Err(err)
            }
        }
    }

    /// Replace the dependency list, unsubscribing from sources that were not
    /// read this time.
    fn swap_deps(&self, deps: DepList) {
        let old = std::mem::replace(&mut *self.deps.borrow_mut(), deps);
        if self.disposed.get() {
            // Disposed while running: nothing may keep us.
            for dep in self.deps.borrow_mut().drain(..) {
                dep.remove_subscriber(self.id);
            }
        }
        let current = self.deps.borrow();
        for dep in old {
            if !current.iter().any(|d| Rc::ptr_eq(d, &dep)) {
                dep.remove_subscriber(self.id);
            }
        }
    }

    /// For a maybe-dirty effect: refresh the computed values it reads and
    /// report whether any of them actually changed.
    fn confirm_dirty(&self) -> bool {
        let deps: Vec<_> = self.deps.borrow().iter().cloned().collect();
        for dep in deps {
            if let Some(source) = dep.source() {
                // A failing computed must be observed by running the effect.
                if source.refresh().is_err() {
                    return true;
                }
                if self.state.get() == DirtyState::Dirty {
                    return true;
                }
            }
        }
        self.state.get() == DirtyState::Dirty
    }

    fn notify_owner(&self) {
        if let Some(owner) = self.options.owner.as_ref().and_then(Weak::upgrade) {
            Scheduler::mark_updated(&owner);
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        trace!(effect = self.id.raw(), label = self.label(), "disposing effect");

        Scheduler::dequeue(self.id);
        if !self.running.get() {
            for dep in self.deps.borrow_mut().drain(..) {
                dep.remove_subscriber(self.id);
            }
            // Release whatever the closure captured.
            if let Ok(mut run) = self.run.try_borrow_mut() {
                *run = Box::new(|| Ok(()));
            }
        }
        self.state.set(DirtyState::Clean);
        self.handle.borrow_mut().take();
    }
}

impl Reactive for EffectInner {
    fn notify(&self, state: DirtyState, source: u64) {
        // Writes an effect makes to its own dependencies are ignored.
        if self.disposed.get() || self.running.get() {
            return;
        }
        self.state.set(self.state.get().raise(state));

        if let Some(hook) = &self.options.on_trigger {
            hook(&DebugEvent { subscriber: self.id, source });
        }

        let Some(this) = self.this.upgrade() else {
            return;
        };

        if let Some(scheduler) = &self.options.scheduler {
            scheduler(&Effect(this));
            return;
        }

        match self.options.flush {
            FlushMode::Sync => {
                if let Err(err) = this.run_job() {
                    Scheduler::record_error(err);
                }
            }
            mode => {
                let job: Weak<dyn Job> = Rc::downgrade(&this) as Weak<dyn Job>;
                Scheduler::enqueue(mode, self.id, job);
            }
        }
    }

    fn mark_dirty(&self) {
        if !self.running.get() && self.state.get() != DirtyState::Clean {
            self.state.set(DirtyState::Dirty);
        }
    }

    fn is_eager(&self) -> bool {
        !self.disposed.get()
    }
}

impl Job for EffectInner {
    fn run_job(&self) -> Result<(), Error> {
        if self.disposed.get() || self.running.get() {
            return Ok(());
        }
        match self.state.get() {
            DirtyState::Clean => Ok(()),
            DirtyState::MaybeDirty if !self.confirm_dirty() => {
                self.state.set(DirtyState::Clean);
                Ok(())
            }
            _ => self.execute(),
        }
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().drain(..) {
            dep.remove_subscriber(self.id);
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("label", &self.0.options.label)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Create an effect with default options.
pub fn effect<F>(run: F) -> Effect
where
    F: FnMut() + 'static,
{
    EffectOptions::default().effect(run)
}

/// Create an effect from a fallible function with default options.
pub fn try_effect<F>(run: F) -> Result<Effect, Error>
where
    F: FnMut() -> Result<(), Error> + 'static,
{
    EffectOptions::default().try_effect(run)
}

/// Watch a reactive source and call `callback(new, old)` when it changes.
///
/// The source is tracked; the callback is not. Without `deep`, the callback
/// only fires when the source yields a value that is not identity-equal to
/// the previous one. With `deep`, every nested container is read and any
/// mutation fires the callback, even when the top-level value is the same.
/// With `immediate`, the callback fires once on creation with `old = None`.
pub fn watch<S, C>(source: S, mut callback: C, options: EffectOptions) -> Effect
where
    S: Fn() -> Value + 'static,
    C: FnMut(&Value, Option<&Value>) + 'static,
{
    let deep = options.deep;
    let immediate = options.immediate;
    let previous: RefCell<Option<Value>> = RefCell::new(None);
    let first = Cell::new(true);

    options.effect(move || {
        let next = source();
        if deep {
            next.track_deep();
        }
        let prev = previous.borrow_mut().replace(next.clone());

        if first.replace(false) {
            if !immediate {
                return;
            }
        } else if !deep && prev.as_ref() == Some(&next) {
            return;
        }

        untrack(|| callback(&next, prev.as_ref()));
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computed, ReactiveMap, Signal};
    use crate::scheduler::batch;

    fn counter() -> (Rc<Cell<i32>>, Rc<Cell<i32>>) {
        let c = Rc::new(Cell::new(0));
        (c.clone(), c)
    }

    #[test]
    fn effect_runs_on_creation() {
        let (runs, r) = counter();
        let _effect = effect(move || r.set(r.get() + 1));

        // Effect should have run once on creation
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let (runs, r) = counter();
        let effect = EffectOptions::default().lazy().effect(move || r.set(r.get() + 1));

        assert_eq!(runs.get(), 0);
        assert_eq!(effect.run_count(), 0);

        // Manually execute
        effect.run().unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let (runs, r) = counter();

        let s = signal.clone();
        let effect = effect(move || {
            s.get();
            r.set(r.get() + 1);
        });
        assert_eq!(signal.subscriber_count(), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(signal.subscriber_count(), 0);

        signal.set(1);
        effect.run().unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn effect_drops_stale_dependencies() {
        let flag = Signal::new(true);
        let a = Signal::new(1);
        let b = Signal::new(2);

        let (f, x, y) = (flag.clone(), a.clone(), b.clone());
        let effect = effect(move || {
            if f.get() {
                x.get();
            } else {
                y.get();
            }
        });
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 0);

        flag.set(false);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);
        assert_eq!(effect.dependency_count(), 2);
    }

    #[test]
    fn effect_ignores_its_own_writes() {
        let signal = Signal::new(0);
        let s = signal.clone();
        let effect = effect(move || {
            let v = s.get();
            s.set(v + 1);
        });

        assert_eq!(effect.run_count(), 1);
        assert_eq!(signal.get_untracked(), 1);
    }

    #[test]
    fn maybe_dirty_effect_skips_when_computed_is_unchanged() {
        let n = Signal::new(2);
        let n2 = n.clone();
        let parity = Computed::new(move || n2.get() % 2 == 0);

        let (runs, r) = counter();
        let p = parity.clone();
        let _effect = effect(move || {
            let _ = p.get();
            r.set(r.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        n.set(4); // still even
        assert_eq!(runs.get(), 1);

        n.set(5);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn localized_error_marks_faulted() {
        let signal = Signal::new(0);
        let s = signal.clone();
        let effect = try_effect(move || {
            if s.get() > 0 {
                return Err(Error::binding("value", "too big"));
            }
            Ok(())
        })
        .unwrap();
        assert!(!effect.is_faulted());

        signal.set(1);
        assert!(effect.is_faulted());

        signal.set(0);
        assert!(!effect.is_faulted());
    }

    #[test]
    fn structural_error_on_first_run_is_returned() {
        let result = try_effect(|| Err(Error::DuplicateKey("1".into())));
        assert_eq!(result.err(), Some(Error::DuplicateKey("1".into())));
    }

    #[test]
    fn on_track_and_on_trigger_fire() {
        let signal = Signal::new(0);
        let tracked = Rc::new(Cell::new(0));
        let triggered = Rc::new(Cell::new(0));

        let (t1, t2) = (tracked.clone(), triggered.clone());
        let s = signal.clone();
        let _effect = EffectOptions::default()
            .on_track(move |_| t1.set(t1.get() + 1))
            .on_trigger(move |event| {
                assert_eq!(event.source, s.id());
                t2.set(t2.get() + 1);
            })
            .effect({
                let s = signal.clone();
                move || {
                    s.get();
                }
            });

        assert_eq!(tracked.get(), 1);
        signal.set(1);
        assert_eq!(triggered.get(), 1);
        assert_eq!(tracked.get(), 2);
    }

    #[test]
    fn custom_scheduler_receives_effect() {
        let signal = Signal::new(0);
        let pending: Rc<RefCell<Vec<Effect>>> = Rc::new(RefCell::new(Vec::new()));

        let p = pending.clone();
        let s = signal.clone();
        let effect = EffectOptions::default()
            .scheduler(move |e| p.borrow_mut().push(e.clone()))
            .effect(move || {
                s.get();
            });

        signal.set(1);
        assert_eq!(effect.run_count(), 1);
        assert_eq!(pending.borrow().len(), 1);

        pending.borrow()[0].run().unwrap();
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn sync_effect_runs_inside_batch() {
        let signal = Signal::new(0);
        let (runs, r) = counter();
        let s = signal.clone();
        let _effect = EffectOptions::default().flush(FlushMode::Sync).effect(move || {
            s.get();
            r.set(r.get() + 1);
        });

        batch(|| {
            signal.set(1);
            assert_eq!(runs.get(), 2);
        })
        .unwrap();
    }

    #[test]
    fn watch_reports_old_and_new() {
        let signal = Signal::new(Value::Int(1));
        let seen: Rc<RefCell<Vec<(Value, Option<Value>)>>> = Rc::new(RefCell::new(Vec::new()));

        let s = signal.clone();
        let log = seen.clone();
        let _watcher = watch(
            move || s.get(),
            move |new, old| log.borrow_mut().push((new.clone(), old.cloned())),
            EffectOptions::default().immediate(),
        );

        signal.set(Value::Int(2));
        signal.set(Value::Int(2));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (Value::Int(1), None));
        assert_eq!(seen[1], (Value::Int(2), Some(Value::Int(1))));
    }

    #[test]
    fn deep_watch_fires_on_nested_mutation() {
        let map = ReactiveMap::new();
        map.set("inner", Value::from(ReactiveMap::new()));
        let (runs, r) = counter();

        let m = map.clone();
        let _watcher = watch(
            move || Value::Map(m.clone()),
            move |_, _| r.set(r.get() + 1),
            EffectOptions::default().deep(),
        );

        if let Value::Map(inner) = map.get_untracked("inner") {
            inner.set("x", Value::Int(1));
        }
        assert_eq!(runs.get(), 1);
    }
}
