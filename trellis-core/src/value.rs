//! Dynamic Values
//!
//! [`Value`] is what flows through attribute bindings, props, component
//! state and list items. Scalars compare by value; containers and handlers
//! compare by identity. That identity rule is what "a write of the same
//! value does not trigger" means for containers: putting the same map back
//! is a no-op, mutating the map is not.
//!
//! `Value::Unset` is the absence marker. A binding that evaluates to `Unset`
//! releases its attribute (the backend gets `remove_attribute` with the
//! previous value); every other failure is an error.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde::{Serialize, Serializer};
use serde_json::json;

use crate::reactive::{ReactiveList, ReactiveMap, ReactiveSet};

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// No value. Releases attributes and props.
    #[default]
    Unset,
    Null,
    Bool(bool),
    Int(i64),
    /// Compared by bit pattern, so `NaN == NaN` and `0.0 != -0.0`.
    Float(f64),
    Str(Rc<str>),
    List(ReactiveList),
    Map(ReactiveMap),
    Set(ReactiveSet),
    Handler(EventHandler),
}

impl Value {
    /// Build a reactive map from key/value pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Build a reactive list.
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Value {
        Value::List(ReactiveList::from_vec(items.into_iter().map(Into::into).collect()))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ReactiveMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ReactiveList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&ReactiveSet> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handler(&self) -> Option<&EventHandler> {
        match self {
            Value::Handler(h) => Some(h),
            _ => None,
        }
    }

    /// Truthiness used by conditional predicates built from values.
    ///
    /// Container lengths are read tracked.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Unset | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Set(s) => !s.is_empty(),
            Value::Handler(_) => true,
        }
    }

    /// Tracked field read on a map; `Unset` for anything else.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Map(m) => m.get(key),
            _ => Value::Unset,
        }
    }

    /// Tracked element read on a list; `Unset` for anything else.
    pub fn at(&self, index: usize) -> Value {
        match self {
            Value::List(l) => l.get(index),
            _ => Value::Unset,
        }
    }

    /// The elements a `v-for` iterates over, read tracked.
    ///
    /// Lists and sets yield their elements, maps their keys, integers
    /// `0..n`, strings their characters. `Null` and `Unset` yield nothing.
    pub fn items(&self) -> Vec<Value> {
        match self {
            Value::List(l) => l.items(),
            Value::Set(s) => s.items(),
            Value::Map(m) => m.keys().into_iter().map(Value::from).collect(),
            Value::Int(n) => (0..(*n).max(0)).map(Value::Int).collect(),
            Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
            _ => Vec::new(),
        }
    }

    /// Read every nested container so the current computation depends on
    /// all of them.
    pub fn track_deep(&self) {
        let mut seen = HashSet::new();
        self.track_deep_inner(&mut seen);
    }

    fn track_deep_inner(&self, seen: &mut HashSet<u64>) {
        match self {
            Value::List(l) => {
                if seen.insert(l.id()) {
                    for item in l.items() {
                        item.track_deep_inner(seen);
                    }
                }
            }
            Value::Map(m) => {
                if seen.insert(m.id()) {
                    for (_, value) in m.entries() {
                        value.track_deep_inner(seen);
                    }
                }
            }
            Value::Set(s) => {
                if seen.insert(s.id()) {
                    for item in s.items() {
                        item.track_deep_inner(seen);
                    }
                }
            }
            _ => {}
        }
    }

    /// Untracked JSON snapshot. Handlers and `Unset` become `null`; a
    /// container that contains itself is cut off with `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut HashSet<u64>) -> serde_json::Value {
        match self {
            Value::Unset | Value::Null | Value::Handler(_) => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(n) => json!(n),
            Value::Float(f) => json!(f),
            Value::Str(s) => json!(&**s),
            Value::List(l) => {
                if !seen.insert(l.id()) {
                    return serde_json::Value::Null;
                }
                let out = l.items_untracked().iter().map(|v| v.to_json_inner(seen)).collect();
                seen.remove(&l.id());
                serde_json::Value::Array(out)
            }
            Value::Set(s) => {
                if !seen.insert(s.id()) {
                    return serde_json::Value::Null;
                }
                let out = s.items_untracked().iter().map(|v| v.to_json_inner(seen)).collect();
                seen.remove(&s.id());
                serde_json::Value::Array(out)
            }
            Value::Map(m) => {
                if !seen.insert(m.id()) {
                    return serde_json::Value::Null;
                }
                let out = m
                    .entries_untracked()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json_inner(seen)))
                    .collect();
                seen.remove(&m.id());
                serde_json::Value::Object(out)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unset, Value::Unset) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Set(a), Value::Set(b)) => a.ptr_eq(b),
            (Value::Handler(a), Value::Handler(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Unset | Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::List(l) => l.id().hash(state),
            Value::Map(m) => m.id().hash(state),
            Value::Set(s) => s.id().hash(state),
            Value::Handler(h) => h.addr().hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unset => write!(f, "Unset"),
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(l) => write!(f, "List#{}{}", l.id(), self.to_json()),
            Value::Map(m) => write!(f, "Map#{}{}", m.id(), self.to_json()),
            Value::Set(s) => write!(f, "Set#{}{}", s.id(), self.to_json()),
            Value::Handler(h) => write!(f, "Handler@{:x}", h.addr()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unset | Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::List(_) | Value::Map(_) | Value::Set(_) => write!(f, "{}", self.to_json()),
            Value::Handler(_) => f.write_str("<handler>"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<ReactiveList> for Value {
    fn from(l: ReactiveList) -> Self {
        Value::List(l)
    }
}

impl From<ReactiveMap> for Value {
    fn from(m: ReactiveMap) -> Self {
        Value::Map(m)
    }
}

impl From<ReactiveSet> for Value {
    fn from(s: ReactiveSet) -> Self {
        Value::Set(s)
    }
}

impl From<EventHandler> for Value {
    fn from(h: EventHandler) -> Self {
        Value::Handler(h)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(ReactiveList::from_vec(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Plain JSON becomes deep reactive data.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::List(ReactiveList::from_vec(items.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(entries) => {
                Value::Map(entries.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// EventHandler
// ----------------------------------------------------------------------------

/// A callable event handler. Compares by identity.
#[derive(Clone)]
pub struct EventHandler(Rc<dyn Fn(&[Value])>);

impl EventHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) + 'static,
    {
        Self(Rc::new(f))
    }

    /// Invoke the handler.
    pub fn call(&self, args: &[Value]) {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &EventHandler) -> bool {
        self.addr() == other.addr()
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHandler@{:x}", self.addr())
    }
}
