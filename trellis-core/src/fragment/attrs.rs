//! Attribute Tables
//!
//! Several sources can write the same attribute: a static value, a reactive
//! binding and any number of spreads. Each source claims the attribute at
//! its position in the attribute map; the claim with the highest position
//! wins. Releasing a claim (a binding evaluating to `Unset`, a key leaving a
//! spread) falls back to the next claim, or removes the attribute.
//!
//! The sink is called only when the winning value changes, so an effect that
//! re-runs with the same result makes no backend call.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{Fragment, Host};
use crate::backend::Native;
use crate::error::{Error, Result};
use crate::reactive::{FlushMode, ReactiveMap};
use crate::template::AttrItem;
use crate::value::Value;

/// Where effective values go.
pub(crate) enum AttrSink {
    Element { host: Rc<Host>, native: Native },
    /// A component's props.
    Props(ReactiveMap),
}

impl AttrSink {
    fn set(&self, name: &str, value: &Value) -> Result<()> {
        match self {
            AttrSink::Element { host, native } => host.backend.set_attribute(native, name, value)?,
            AttrSink::Props(map) => map.write(name.to_string(), value.clone()),
        }
        Ok(())
    }

    fn remove(&self, name: &str, previous: &Value) -> Result<()> {
        match self {
            AttrSink::Element { host, native } => host.backend.remove_attribute(native, name, previous)?,
            AttrSink::Props(map) => {
                map.delete(name);
            }
        }
        Ok(())
    }
}

pub(crate) struct AttrTable {
    sink: AttrSink,
    claims: RefCell<IndexMap<String, BTreeMap<usize, Value>>>,
    applied: RefCell<IndexMap<String, Value>>,
}

impl AttrTable {
    pub(crate) fn new(sink: AttrSink) -> Rc<Self> {
        Rc::new(Self {
            sink,
            claims: RefCell::new(IndexMap::new()),
            applied: RefCell::new(IndexMap::new()),
        })
    }

    /// Claim `name` for the source at `position`. `Unset` releases.
    pub(crate) fn claim(&self, name: &str, position: usize, value: Value) -> Result<()> {
        {
            let mut claims = self.claims.borrow_mut();
            let entry = claims.entry(name.to_string()).or_default();
            if value.is_unset() {
                entry.remove(&position);
            } else {
                entry.insert(position, value);
            }
        }
        self.apply(name)
    }

    pub(crate) fn release(&self, name: &str, position: usize) -> Result<()> {
        self.claim(name, position, Value::Unset)
    }

    /// The value currently applied for `name`.
    pub(crate) fn applied(&self, name: &str) -> Value {
        self.applied.borrow().get(name).cloned().unwrap_or_default()
    }

    fn apply(&self, name: &str) -> Result<()> {
        let winner = self
            .claims
            .borrow()
            .get(name)
            .and_then(|claims| claims.last_key_value().map(|(_, v)| v.clone()))
            .unwrap_or_default();
        let previous = self.applied(name);
        if winner == previous {
            return Ok(());
        }

        if winner.is_unset() {
            self.sink.remove(name, &previous)?;
            self.applied.borrow_mut().shift_remove(name);
        } else {
            self.sink.set(name, &winner)?;
            self.applied.borrow_mut().insert(name.to_string(), winner);
        }
        Ok(())
    }
}

/// Install `items` onto `table`: static claims now, one effect per reactive
/// binding and per spread.
pub(crate) fn install(fragment: &Fragment, table: &Rc<AttrTable>, items: &[AttrItem], flush: FlushMode) -> Result<()> {
    for (position, item) in items.iter().enumerate() {
        match item {
            AttrItem::Static(name, value) => table.claim(name, position, value.clone())?,
            AttrItem::Reactive(name, expr) => {
                let table = Rc::clone(table);
                let expr = Rc::clone(expr);
                let key = name.clone();
                fragment.bind_effect(name, flush, move || {
                    let value = expr()?;
                    table.claim(&key, position, value)
                })?;
            }
            AttrItem::Spread(expr) => {
                let table = Rc::clone(table);
                let expr = Rc::clone(expr);
                let claimed: RefCell<Vec<String>> = RefCell::new(Vec::new());
                fragment.bind_effect("v-bind", flush, move || {
                    let entries = match expr()? {
                        Value::Map(map) => map.entries(),
                        Value::Unset | Value::Null => Vec::new(),
                        other => return Err(Error::binding("v-bind", format!("expected a mapping, got {other:?}"))),
                    };
                    let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
                    let stale: Vec<String> = claimed.borrow().iter().filter(|k| !keys.contains(*k)).cloned().collect();
                    for key in stale {
                        table.release(&key, position)?;
                    }
                    for (key, value) in entries {
                        table.claim(&key, position, value)?;
                    }
                    *claimed.borrow_mut() = keys;
                    Ok(())
                })?;
            }
        }
    }
    Ok(())
}
