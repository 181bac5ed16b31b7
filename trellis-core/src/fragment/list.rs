//! Keyed Lists
//!
//! A list fragment keeps one child per key. Each child gets an
//! [`ItemScope`] holding its item and index as signals, so a reused child is
//! updated in place rather than rebuilt.
//!
//! # How Reconciliation Works
//!
//! 1. Keys are computed for the new items (the index when unkeyed). A
//!    repeated key aborts the update before anything is touched.
//!
//! 2. Children whose key disappeared are unmounted.
//!
//! 3. The new order is walked back to front with a running anchor, starting
//!    at the native after the list. New keys are built and mounted at the
//!    anchor. Reused keys have their item and index signals updated, and are
//!    moved before the anchor unless they already sit there: a stack of the
//!    surviving old keys, in old order, tells which child currently
//!    precedes the anchor.
//!
//! 4. Each placed child's first native becomes the anchor for the next one.
//!
//! Children that keep their relative order are never moved, so rotating
//! `[1, 2, 3]` into `[3, 1, 2]` moves exactly two of them.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, error};

use super::{build, Fragment, Kind};
use crate::error::{Error, Result};
use crate::reactive::{untrack, FlushMode, Signal};
use crate::template::ListSpec;
use crate::value::Value;

/// What a list item's template sees: the item, its position and its key.
#[derive(Clone)]
pub struct ItemScope {
    item: Signal<Value>,
    index: Signal<usize>,
    key: Value,
}

impl ItemScope {
    /// The item, read tracked.
    pub fn item(&self) -> Value {
        self.item.get()
    }

    /// The position in the list, read tracked.
    pub fn index(&self) -> usize {
        self.index.get()
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    /// A field of the item, read tracked.
    pub fn get(&self, field: &str) -> Value {
        self.item.get().get(field)
    }

    pub fn item_signal(&self) -> &Signal<Value> {
        &self.item
    }
}

struct Entry {
    fragment: Fragment,
    scope: ItemScope,
}

pub(crate) struct ListState {
    spec: Rc<ListSpec>,
    entries: RefCell<IndexMap<Value, Entry>>,
}

impl ListState {
    pub(crate) fn new(spec: Rc<ListSpec>) -> Self {
        Self {
            spec,
            entries: RefCell::new(IndexMap::new()),
        }
    }

    pub(crate) fn mount(&self, fragment: &Fragment) -> Result<()> {
        let weak = fragment.downgrade();
        let spec = Rc::clone(&self.spec);
        fragment.bind_effect("v-for", FlushMode::Main, move || {
            let items = (spec.source)()?.items();
            let keys: Vec<Value> = match &spec.key {
                Some(key) => items.iter().map(|item| key(item)).collect(),
                None => (0..items.len()).map(|i| Value::Int(i as i64)).collect(),
            };
            let Some(fragment) = weak.upgrade() else {
                return Ok(());
            };
            let Kind::List(state) = fragment.kind() else {
                return Ok(());
            };
            untrack(|| state.reconcile(&fragment, items, keys))
        })
    }

    /// Forget every entry; their fragments are torn down by the caller.
    pub(crate) fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn reconcile(&self, fragment: &Fragment, items: Vec<Value>, keys: Vec<Value>) -> Result<()> {
        let mut seen: HashSet<&Value> = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(key) {
                error!(fragment = fragment.id(), key = %key, "duplicate key in list");
                return Err(Error::DuplicateKey(key.to_string()));
            }
        }
        let Some(target) = fragment.target() else {
            return Ok(());
        };

        let mut old = std::mem::take(&mut *self.entries.borrow_mut());
        let removed: Vec<Value> = old.keys().filter(|key| !seen.contains(key)).cloned().collect();
        for key in &removed {
            if let Some(entry) = old.shift_remove(key) {
                entry.fragment.unmount();
            }
        }

        let mut pending: Vec<Value> = old.keys().cloned().collect();
        let mut processed: HashSet<Value> = HashSet::with_capacity(keys.len());
        let mut placed: Vec<(Value, Entry)> = Vec::with_capacity(keys.len());
        let mut anchor = fragment.next_anchor();
        let mut first_error = None;
        let (mut created, mut moved) = (0usize, 0usize);

        for (index, (item, key)) in items.into_iter().zip(keys).enumerate().rev() {
            while pending.last().is_some_and(|top| processed.contains(top)) {
                pending.pop();
            }

            let entry = match old.shift_remove(&key) {
                Some(entry) => {
                    entry.scope.item.set(item);
                    entry.scope.index.set(index);
                    if pending.last() == Some(&key) {
                        pending.pop();
                    } else {
                        moved += 1;
                        if let Err(err) = entry.fragment.move_before(anchor.as_ref()) {
                            first_error.get_or_insert(err);
                        }
                    }
                    entry
                }
                None => {
                    let scope = ItemScope {
                        item: Signal::new(item),
                        index: Signal::new(index),
                        key: key.clone(),
                    };
                    let desc = (self.spec.factory)(&scope);
                    let child = match build(&desc, fragment.host(), fragment.scope()) {
                        Ok(child) => child,
                        Err(err) => {
                            first_error.get_or_insert(err);
                            continue;
                        }
                    };
                    fragment.adopt(&child);
                    if let Err(err) = child.mount(&target, anchor.as_ref()) {
                        fragment.remove_child(&child);
                        first_error.get_or_insert(err);
                        continue;
                    }
                    created += 1;
                    Entry { fragment: child, scope }
                }
            };

            processed.insert(key.clone());
            if let Some(native) = entry.fragment.first_native() {
                anchor = Some(native);
            }
            placed.push((key, entry));
        }

        placed.reverse();
        fragment.set_children(placed.iter().map(|(_, entry)| entry.fragment.clone()).collect());
        *self.entries.borrow_mut() = placed.into_iter().collect();

        debug!(
            fragment = fragment.id(),
            len = self.entries.borrow().len(),
            created,
            moved,
            removed = removed.len(),
            "list reconciled"
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
