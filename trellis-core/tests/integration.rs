//! Integration Tests for the Reactive System
//!
//! These tests verify that signals, computed values, effects and the
//! scheduler work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_core::reactive::Runtime;
use trellis_core::{
    batch, effect, untrack, watch, Computed, EffectOptions, Error, FlushMode, ReactiveList, ReactiveMap, Scheduler,
    Signal, Value,
};

/// Test that a computed value tracks signal dependencies.
#[test]
fn computed_tracks_signal_dependency() {
    let signal = Signal::new(10);

    let signal_clone = signal.clone();
    let doubled = Computed::new(move || signal_clone.get() * 2);
    assert_eq!(doubled.get(), Ok(20));

    signal.set(5);
    assert_eq!(doubled.get(), Ok(10));
}

/// Test that an effect re-runs after its dependency changes.
#[test]
fn effect_tracks_signal_dependency() {
    let signal = Signal::new(0);
    let observed = Rc::new(Cell::new(-1));
    let observed_clone = observed.clone();

    let signal_clone = signal.clone();
    let _effect = effect(move || observed_clone.set(signal_clone.get()));

    // Effect runs on creation, captures initial value
    assert_eq!(observed.get(), 0);

    signal.set(42);
    assert_eq!(observed.get(), 42);
}

/// Test that computed values cache their result.
#[test]
fn computed_caches_expensive_computation() {
    let computations = Rc::new(Cell::new(0));
    let computations_clone = computations.clone();

    let value = Computed::new(move || {
        computations_clone.set(computations_clone.get() + 1);
        42
    });

    assert_eq!(value.get(), Ok(42));
    assert_eq!(value.get(), Ok(42));
    assert_eq!(value.get(), Ok(42));
    assert_eq!(computations.get(), 1);
}

/// Test a diamond: an effect over two computed values sharing one source
/// runs once per write.
#[test]
fn diamond_dependencies_run_once() {
    let source = Signal::new(1);
    let (a, b) = (source.clone(), source.clone());
    let left = Computed::new(move || a.get() + 1);
    let right = Computed::new(move || b.get() * 10);

    let runs = Rc::new(Cell::new(0));
    let seen = Rc::new(Cell::new(0));
    let (r, s) = (runs.clone(), seen.clone());
    let _effect = effect(move || {
        r.set(r.get() + 1);
        s.set(left.get().unwrap_or(0) + right.get().unwrap_or(0));
    });

    source.set(2);
    assert_eq!(runs.get(), 2);
    assert_eq!(seen.get(), 23);
}

/// Writing the value a key already holds notifies nobody.
#[test]
fn idempotent_writes_run_nothing() {
    let state = ReactiveMap::new();
    state.set("k", 1);

    let runs = Rc::new(Cell::new(0));
    let (r, s) = (runs.clone(), state.clone());
    let _effect = effect(move || {
        s.get("k");
        r.set(r.get() + 1);
    });

    state.set("k", state.get_untracked("k"));
    assert_eq!(runs.get(), 1);
}

/// Writes inside a batch are observed together.
#[test]
fn batch_runs_each_dependent_once() {
    let state = ReactiveMap::new();
    let runs = Rc::new(RefCell::new(Vec::new()));

    let (r, s) = (runs.clone(), state.clone());
    let _effect = effect(move || r.borrow_mut().push((s.get("a"), s.get("b"))));

    batch(|| {
        state.set("a", 1);
        state.set("b", 2);
    })
    .unwrap();

    assert_eq!(
        *runs.borrow(),
        vec![(Value::Unset, Value::Unset), (Value::Int(1), Value::Int(2))]
    );
}

/// Pre effects run before main effects, main before post.
#[test]
fn queues_drain_in_order() {
    let signal = Signal::new(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    let mut effects = Vec::new();
    for (mode, name) in [(FlushMode::Post, "post"), (FlushMode::Main, "main"), (FlushMode::Pre, "pre")] {
        let (l, s) = (log.clone(), signal.clone());
        effects.push(EffectOptions::default().flush(mode).effect(move || {
            s.get();
            l.borrow_mut().push(name);
        }));
    }
    log.borrow_mut().clear();

    signal.set(1);
    assert_eq!(*log.borrow(), ["pre", "main", "post"]);
}

/// A watcher sees old and new values and does not track its callback.
#[test]
fn watch_reports_old_and_new() {
    let source = Signal::new(Value::Int(1));
    let other = Signal::new(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (src, o, s) = (source.clone(), other.clone(), seen.clone());
    let _watcher = watch(
        move || src.get(),
        move |new, old| {
            o.get();
            s.borrow_mut().push((new.clone(), old.cloned()));
        },
        EffectOptions::default(),
    );

    source.set(Value::Int(2));
    other.set(1);
    assert_eq!(*seen.borrow(), vec![(Value::Int(2), Some(Value::Int(1)))]);
}

/// Deep watchers fire on nested mutation.
#[test]
fn deep_watch_sees_nested_writes() {
    let inner = ReactiveList::new();
    let outer = Value::map([("items", Value::List(inner.clone()))]);
    let fired = Rc::new(Cell::new(0));

    let (o, f) = (outer.clone(), fired.clone());
    let _watcher = watch(move || o.clone(), move |_, _| f.set(f.get() + 1), EffectOptions::default().deep());

    inner.push(1);
    assert_eq!(fired.get(), 1);
}

/// Untracked reads do not subscribe.
#[test]
fn untracked_reads_do_not_subscribe() {
    let signal = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let (s, r) = (signal.clone(), runs.clone());
    let _effect = effect(move || {
        untrack(|| s.get());
        r.set(r.get() + 1);
    });

    signal.set(1);
    assert_eq!(runs.get(), 1);
    assert_eq!(signal.subscriber_count(), 0);
}

/// A write inside a computed value is refused.
#[test]
fn computed_refuses_writes() {
    let target = Signal::new(0);
    let t = target.clone();
    let bad = Computed::try_new(move || {
        t.try_set(1)?;
        Ok(0)
    });

    assert_eq!(bad.get(), Err(Error::WriteDuringComputed));
    assert_eq!(target.get_untracked(), 0);
}

/// Two effects that keep re-triggering each other overflow the flush and
/// halt the scheduler.
#[test]
fn runaway_flush_halts() {
    let a = Signal::new(0i64);
    let b = Signal::new(0i64);
    let effects = RefCell::new(Vec::new());

    let result = batch(|| {
        let (a1, b1) = (a.clone(), b.clone());
        effects.borrow_mut().push(effect(move || b1.set(a1.get() + 1)));
        let (a2, b2) = (a.clone(), b.clone());
        effects.borrow_mut().push(effect(move || a2.set(b2.get() + 1)));
    });

    assert_eq!(result, Err(Error::FlushOverflow(1000)));
    assert_eq!(Scheduler::take_error(), Some(Error::FlushOverflow(1000)));
    assert_eq!(Scheduler::flush(), Err(Error::Halted));

    Scheduler::reset_halt();
    assert_eq!(Scheduler::flush(), Ok(()));
}

/// Disposing an effect releases its subscriptions.
#[test]
fn disposed_effects_release_subscriptions() {
    let before = Runtime::live_effects();
    let signal = Signal::new(0);
    let s = signal.clone();
    let e = effect(move || {
        s.get();
    });
    assert_eq!(signal.subscriber_count(), 1);
    assert_eq!(Runtime::live_effects(), before + 1);

    e.dispose();
    assert_eq!(signal.subscriber_count(), 0);
    assert_eq!(Runtime::live_effects(), before);
}
