//! Reactive Containers
//!
//! Signals notify on reassignment. The containers here notify on mutation,
//! with finer granularity where it pays off:
//!
//! - [`ReactiveMap`] keeps one dep per key plus one for its key set. Reading
//!   `get("a")` subscribes to `"a"` only; iterating subscribes to the key
//!   set. Changing the value under an existing key does not disturb
//!   iteration-only readers, adding or removing a key does.
//! - [`ReactiveList`] and [`ReactiveSet`] keep a single dep: any mutation
//!   notifies every reader.
//!
//! Every mutation is guarded against writes inside a computed value and
//! runs inside one batch, so a mutation that touches several deps re-runs
//! each dependent once.
//!
//! Handles are cheap clones of one shared container. [`reactive`] converts
//! plain data into containers and passes existing containers through
//! unchanged, so wrapping twice yields the same container.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use super::context::ReactiveContext;
use super::runtime::Dep;
use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::value::Value;

/// Convert plain data into deep reactive data.
///
/// Containers are returned as they are; a second call on the result yields
/// the same container.
pub fn reactive(value: impl Into<Value>) -> Value {
    value.into()
}

/// Trigger several deps as one change.
fn trigger_all(deps: &[Rc<Dep>]) {
    Scheduler::begin_batch();
    for dep in deps {
        dep.trigger();
    }
    let _ = Scheduler::end_batch();
}

// ----------------------------------------------------------------------------
// ReactiveMap
// ----------------------------------------------------------------------------

/// An insertion-ordered string-keyed map with per-key tracking.
#[derive(Clone)]
pub struct ReactiveMap(Rc<MapInner>);

struct MapInner {
    entries: RefCell<IndexMap<String, Value>>,
    key_deps: RefCell<HashMap<String, Rc<Dep>>>,
    /// Table size that triggers the next sweep of unsubscribed key deps.
    sweep_at: Cell<usize>,
    keys_dep: Rc<Dep>,
}

const MIN_SWEEP: usize = 16;

impl ReactiveMap {
    pub fn new() -> Self {
        Self::from_entries(IndexMap::new())
    }

    fn from_entries(entries: IndexMap<String, Value>) -> Self {
        Self(Rc::new(MapInner {
            entries: RefCell::new(entries),
            key_deps: RefCell::new(HashMap::new()),
            sweep_at: Cell::new(MIN_SWEEP),
            keys_dep: Dep::new(),
        }))
    }

    /// Unique container id.
    pub fn id(&self) -> u64 {
        self.0.keys_dep.id()
    }

    pub fn ptr_eq(&self, other: &ReactiveMap) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Record a read of `key` by the running computation.
    ///
    /// Key deps exist only while something subscribes to them, so untracked
    /// reads and lookups of absent keys leave the table alone.
    fn track_key(&self, key: &str) {
        if !ReactiveContext::is_active() {
            return;
        }
        let dep = {
            let mut deps = self.0.key_deps.borrow_mut();
            match deps.get(key) {
                Some(dep) => Rc::clone(dep),
                None => {
                    if deps.len() >= self.0.sweep_at.get() {
                        deps.retain(|_, dep| dep.subscriber_count() > 0);
                        self.0.sweep_at.set((deps.len() * 2).max(MIN_SWEEP));
                    }
                    let dep = Dep::new();
                    deps.insert(key.to_string(), Rc::clone(&dep));
                    dep
                }
            }
        };
        dep.track();
    }

    /// Drop the dep of `key` once nothing subscribes to it.
    fn release_key(&self, key: &str) {
        let mut deps = self.0.key_deps.borrow_mut();
        if deps.get(key).is_some_and(|dep| dep.subscriber_count() == 0) {
            deps.remove(key);
        }
    }

    #[cfg(test)]
    fn key_dep_count(&self) -> usize {
        self.0.key_deps.borrow().len()
    }

    /// Tracked read. Absent keys read as [`Value::Unset`].
    pub fn get(&self, key: &str) -> Value {
        self.track_key(key);
        self.get_untracked(key)
    }

    pub fn get_untracked(&self, key: &str) -> Value {
        self.0.entries.borrow().get(key).cloned().unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.track_key(key);
        self.0.entries.borrow().contains_key(key)
    }

    /// Insert or replace. A refused write is recorded on the enclosing
    /// computed value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let _ = self.try_set(key, value);
    }

    /// Insert or replace, reporting a refused write.
    pub fn try_set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), Error> {
        ReactiveContext::guard_write()?;
        self.write(key.into(), value.into());
        Ok(())
    }

    /// Unguarded write; the caller has already decided it is allowed.
    pub(crate) fn write(&self, key: String, value: Value) {
        let added = {
            let mut entries = self.0.entries.borrow_mut();
            match entries.get_mut(&key) {
                Some(current) if *current == value => return,
                Some(current) => {
                    *current = value;
                    false
                }
                None => {
                    entries.insert(key.clone(), value);
                    true
                }
            }
        };
        self.changed(&key, added);
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        ReactiveContext::guard_write().ok()?;
        self.delete(key)
    }

    pub(crate) fn delete(&self, key: &str) -> Option<Value> {
        let removed = self.0.entries.borrow_mut().shift_remove(key)?;
        self.changed(key, true);
        self.release_key(key);
        Some(removed)
    }

    fn changed(&self, key: &str, keys_changed: bool) {
        let mut deps = Vec::with_capacity(2);
        if let Some(dep) = self.0.key_deps.borrow().get(key) {
            deps.push(Rc::clone(dep));
        }
        if keys_changed {
            deps.push(Rc::clone(&self.0.keys_dep));
        }
        trigger_all(&deps);
    }

    /// Tracked key list.
    pub fn keys(&self) -> Vec<String> {
        self.0.keys_dep.track();
        self.0.entries.borrow().keys().cloned().collect()
    }

    /// Tracked entry list: depends on the key set and on every value.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0.keys_dep.track();
        let entries = self.entries_untracked();
        for (key, _) in &entries {
            self.track_key(key);
        }
        entries
    }

    pub fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.0
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.keys_dep.track();
        self.0.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReactiveMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(String, Value)> for ReactiveMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::from_entries(iter.into_iter().collect())
    }
}

impl fmt::Debug for ReactiveMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveMap")
            .field("id", &self.id())
            .field("len", &self.0.entries.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// ReactiveList
// ----------------------------------------------------------------------------

/// An ordered sequence. Any mutation notifies every reader.
#[derive(Clone)]
pub struct ReactiveList(Rc<ListInner>);

struct ListInner {
    items: RefCell<Vec<Value>>,
    dep: Rc<Dep>,
}

impl ReactiveList {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(ListInner {
            items: RefCell::new(items),
            dep: Dep::new(),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.dep.id()
    }

    pub fn ptr_eq(&self, other: &ReactiveList) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Tracked element read; out of range reads as [`Value::Unset`].
    pub fn get(&self, index: usize) -> Value {
        self.0.dep.track();
        self.0.items.borrow().get(index).cloned().unwrap_or_default()
    }

    /// Tracked snapshot of all elements.
    pub fn items(&self) -> Vec<Value> {
        self.0.dep.track();
        self.items_untracked()
    }

    pub fn items_untracked(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.dep.track();
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` and notify readers when it reports a change.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> (R, bool)) -> Option<R> {
        ReactiveContext::guard_write().ok()?;
        let (result, changed) = f(&mut self.0.items.borrow_mut());
        if changed {
            self.0.dep.trigger();
        }
        Some(result)
    }

    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.mutate(|items| {
            items.push(value);
            ((), true)
        });
    }

    pub fn pop(&self) -> Option<Value> {
        self.mutate(|items| {
            let popped = items.pop();
            let changed = popped.is_some();
            (popped, changed)
        })
        .flatten()
    }

    /// Insert at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.mutate(|items| {
            let at = index.min(items.len());
            items.insert(at, value);
            ((), true)
        });
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        self.mutate(|items| {
            if index < items.len() {
                (Some(items.remove(index)), true)
            } else {
                (None, false)
            }
        })
        .flatten()
    }

    /// Replace the element at `index`. Out of range is ignored.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.mutate(|items| match items.get_mut(index) {
            Some(current) if *current != value => {
                *current = value;
                ((), true)
            }
            _ => ((), false),
        });
    }

    /// Replace all elements at once.
    pub fn replace(&self, values: Vec<Value>) {
        self.mutate(|items| {
            let changed = *items != values;
            *items = values;
            ((), changed)
        });
    }

    pub fn swap(&self, a: usize, b: usize) {
        self.mutate(|items| {
            if a < items.len() && b < items.len() && a != b {
                items.swap(a, b);
                ((), true)
            } else {
                ((), false)
            }
        });
    }

    pub fn reverse(&self) {
        self.mutate(|items| {
            items.reverse();
            ((), items.len() > 1)
        });
    }

    pub fn clear(&self) {
        self.mutate(|items| {
            let changed = !items.is_empty();
            items.clear();
            ((), changed)
        });
    }
}

impl Default for ReactiveList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveList")
            .field("id", &self.id())
            .field("len", &self.0.items.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// ReactiveSet
// ----------------------------------------------------------------------------

/// An insertion-ordered set of values.
#[derive(Clone)]
pub struct ReactiveSet(Rc<SetInner>);

struct SetInner {
    items: RefCell<IndexSet<Value>>,
    dep: Rc<Dep>,
}

impl ReactiveSet {
    pub fn new() -> Self {
        Self(Rc::new(SetInner {
            items: RefCell::new(IndexSet::new()),
            dep: Dep::new(),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.dep.id()
    }

    pub fn ptr_eq(&self, other: &ReactiveSet) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.0.dep.track();
        self.0.items.borrow().contains(value)
    }

    pub fn items(&self) -> Vec<Value> {
        self.0.dep.track();
        self.items_untracked()
    }

    pub fn items_untracked(&self) -> Vec<Value> {
        self.0.items.borrow().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.dep.track();
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the value was new.
    pub fn insert(&self, value: impl Into<Value>) -> bool {
        if ReactiveContext::guard_write().is_err() {
            return false;
        }
        let added = self.0.items.borrow_mut().insert(value.into());
        if added {
            self.0.dep.trigger();
        }
        added
    }

    /// Returns whether the value was present.
    pub fn remove(&self, value: &Value) -> bool {
        if ReactiveContext::guard_write().is_err() {
            return false;
        }
        let removed = self.0.items.borrow_mut().shift_remove(value);
        if removed {
            self.0.dep.trigger();
        }
        removed
    }

    pub fn clear(&self) {
        if ReactiveContext::guard_write().is_err() {
            return;
        }
        let had_items = {
            let mut items = self.0.items.borrow_mut();
            let had = !items.is_empty();
            items.clear();
            had
        };
        if had_items {
            self.0.dep.trigger();
        }
    }
}

impl Default for ReactiveSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Value> for ReactiveSet {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let set = Self::new();
        set.0.items.borrow_mut().extend(iter);
        set
    }
}

impl fmt::Debug for ReactiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveSet")
            .field("id", &self.id())
            .field("len", &self.0.items.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{effect, Computed, Effect};

    fn runs_of(f: impl Fn() + 'static) -> (Rc<Cell<usize>>, Effect) {
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let e = effect(move || {
            f();
            r.set(r.get() + 1);
        });
        (runs, e)
    }

    #[test]
    fn map_tracks_per_key() {
        let map = ReactiveMap::new();
        map.set("a", 1);
        map.set("b", 2);

        let m = map.clone();
        let (a_runs, _effect) = runs_of(move || {
            m.get("a");
        });

        map.set("b", 3);
        assert_eq!(a_runs.get(), 1);

        map.set("a", 4);
        assert_eq!(a_runs.get(), 2);
    }

    #[test]
    fn idempotent_write_is_silent() {
        let map = ReactiveMap::new();
        map.set("k", "v");
        let m = map.clone();
        let (runs, _effect) = runs_of(move || {
            m.get("k");
        });

        let current = map.get_untracked("k");
        map.set("k", current);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn iteration_sees_added_keys_but_not_value_changes() {
        let map = ReactiveMap::new();
        map.set("a", 1);
        let m = map.clone();
        let (runs, _effect) = runs_of(move || {
            m.keys();
        });

        map.set("a", 2);
        assert_eq!(runs.get(), 1);

        map.set("b", 1);
        assert_eq!(runs.get(), 2);

        map.remove("a");
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn adding_a_read_key_runs_dependent_once() {
        let map = ReactiveMap::new();
        let m = map.clone();
        let (runs, _effect) = runs_of(move || {
            m.get("x");
            m.len();
        });

        map.set("x", 1);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn untracked_access_keeps_no_key_deps() {
        let map = ReactiveMap::new();
        for i in 0..10_000 {
            let key = format!("k{i}");
            map.set(key.as_str(), i);
            assert_eq!(map.get(&key), Value::Int(i));
            assert!(map.contains_key(&key));
            assert!(!map.contains_key("missing"));
            map.remove(&key);
        }
        assert!(map.is_empty());
        assert_eq!(map.key_dep_count(), 0);
    }

    #[test]
    fn key_deps_are_dropped_once_unsubscribed() {
        let map = ReactiveMap::new();
        let reading = Rc::new(Cell::new(true));
        let (m, r) = (map.clone(), reading.clone());
        let (runs, effect) = runs_of(move || {
            if r.get() {
                m.get("a");
            }
            m.get("b");
        });
        assert_eq!(map.key_dep_count(), 2);

        // Subscribed keys keep their dep across removal.
        map.set("a", 1);
        map.remove("a");
        assert_eq!(runs.get(), 3);
        assert_eq!(map.key_dep_count(), 2);

        reading.set(false);
        map.set("a", 2);
        assert_eq!(runs.get(), 4);
        map.remove("a");
        assert_eq!(runs.get(), 4);
        assert_eq!(map.key_dep_count(), 1);

        effect.dispose();
        for i in 0..100 {
            let m = map.clone();
            let key = format!("k{i}");
            crate::reactive::effect(move || {
                m.get(&key);
            })
            .dispose();
        }
        assert!(map.key_dep_count() <= MIN_SWEEP);
    }

    #[test]
    fn list_mutations_notify() {
        let list = ReactiveList::new();
        let l = list.clone();
        let (runs, _effect) = runs_of(move || {
            l.len();
        });

        list.push(1);
        list.push(2);
        list.swap(0, 1);
        assert_eq!(runs.get(), 4);
        assert_eq!(list.items_untracked(), vec![Value::Int(2), Value::Int(1)]);

        // No-ops stay silent.
        list.remove(9);
        list.set(0, 2);
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn set_membership() {
        let set = ReactiveSet::new();
        let s = set.clone();
        let seen = Rc::new(Cell::new(false));
        let sn = seen.clone();
        let _e = effect(move || sn.set(s.contains(&Value::from("x"))));

        assert!(set.insert("x"));
        assert!(seen.get());
        assert!(!set.insert("x"));
        assert!(set.remove(&Value::from("x")));
        assert!(!seen.get());
    }

    #[test]
    fn reactive_is_identity_stable() {
        let wrapped = reactive(serde_json::json!({"a": [1, 2]}));
        let again = reactive(wrapped.clone());
        assert_eq!(wrapped, again);
    }

    #[test]
    fn mutation_inside_computed_is_refused() {
        let list = ReactiveList::new();
        let l = list.clone();
        let computed = Computed::new(move || {
            l.push(1);
            0
        });
        assert_eq!(computed.get(), Err(Error::WriteDuringComputed));
        assert!(list.items_untracked().is_empty());
    }
}
