//! Template Runtime
//!
//! The API a template compiler targets. [`h`] turns a tag, an attribute map
//! and children into a [`Descriptor`]; the engine builds and mounts fragments
//! from descriptors. Descriptors are inert: building the same descriptor
//! twice yields two independent fragments, which is how conditional
//! branches, slot content and list items are re-created.
//!
//! # Directive vocabulary
//!
//! [`Attrs::insert`] interprets keys the way compiled templates spell them:
//!
//! | key            | meaning                                          |
//! |----------------|--------------------------------------------------|
//! | `name`         | static attribute or literal prop                 |
//! | `:name`        | reactive attribute (closure wrapped in an effect)|
//! | `@event`       | event handler (fixed or reactive)                |
//! | `v-if` etc.    | conditional chain among siblings                 |
//! | `v-bind`       | spread mapping, merged in source order           |
//! | `v-slot:name`  | names the slot the element is content for        |
//! | `#name`        | short form of `v-slot:name`                      |
//! | `ref`          | registers a template ref                         |
//!
//! The builder methods on [`Attrs`] (`set`, `bind`, `on`, `when`, ...) are
//! the typed equivalents.
//!
//! # Tags
//!
//! A string tag containing `.` or starting with an uppercase letter names a
//! component, resolved against the enclosing component's
//! [`components`](crate::Component::components). Every other string is an
//! element type passed verbatim to the backend, except `template`, which
//! groups its children without producing an element.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::warn;

use crate::component::ComponentType;
use crate::error::Result;
use crate::fragment::ItemScope;
use crate::value::{EventHandler, Value};

/// A reactive expression.
pub type Expr = Rc<dyn Fn() -> Result<Value>>;

/// A conditional predicate.
pub type PredicateFn = Rc<dyn Fn() -> Result<bool>>;

/// Extracts a list item's key.
pub type KeyFn = Rc<dyn Fn(&Value) -> Value>;

/// Builds the descriptor for one list item.
pub type ItemFactory = Rc<dyn Fn(&ItemScope) -> Descriptor>;

/// Yields the tag of a dynamic component.
pub type TagFn = Rc<dyn Fn() -> Result<Tag>>;

/// What `h` builds: an element, a component by name, or a component type.
#[derive(Clone)]
pub enum Tag {
    Element(Rc<str>),
    Named(Rc<str>),
    Component(ComponentType),
}

impl Tag {
    /// Classify a string tag.
    pub fn parse(tag: &str) -> Tag {
        let is_component = tag.contains('.') || tag.chars().next().is_some_and(char::is_uppercase);
        if is_component {
            Tag::Named(tag.into())
        } else {
            Tag::Element(tag.into())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Tag::Element(name) | Tag::Named(name) => name,
            Tag::Component(ty) => ty.name(),
        }
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Tag::Element(a), Tag::Element(b)) | (Tag::Named(a), Tag::Named(b)) => a == b,
            (Tag::Component(a), Tag::Component(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Element(name) => write!(f, "<{name}>"),
            Tag::Named(name) => write!(f, "<{name}/?>"),
            Tag::Component(ty) => write!(f, "<{}/>", ty.name()),
        }
    }
}

impl From<&str> for Tag {
    fn from(tag: &str) -> Self {
        Tag::parse(tag)
    }
}

impl From<String> for Tag {
    fn from(tag: String) -> Self {
        Tag::parse(&tag)
    }
}

impl From<ComponentType> for Tag {
    fn from(ty: ComponentType) -> Self {
        Tag::Component(ty)
    }
}

impl From<&ComponentType> for Tag {
    fn from(ty: &ComponentType) -> Self {
        Tag::Component(ty.clone())
    }
}

// ----------------------------------------------------------------------------
// Attributes
// ----------------------------------------------------------------------------

/// The value half of an attribute map entry.
#[derive(Clone)]
pub enum AttrValue {
    Static(Value),
    Reactive(Expr),
    Handler(EventHandler),
    Spread(Expr),
    Predicate(PredicateFn),
}

impl AttrValue {
    pub fn value(value: impl Into<Value>) -> Self {
        AttrValue::Static(value.into())
    }

    pub fn reactive(f: impl Fn() -> Value + 'static) -> Self {
        AttrValue::Reactive(Rc::new(move || Ok(f())))
    }

    pub fn handler(f: impl Fn(&[Value]) + 'static) -> Self {
        AttrValue::Handler(EventHandler::new(f))
    }

    pub fn spread(f: impl Fn() -> Value + 'static) -> Self {
        AttrValue::Spread(Rc::new(move || Ok(f())))
    }

    pub fn predicate(f: impl Fn() -> bool + 'static) -> Self {
        AttrValue::Predicate(Rc::new(move || Ok(f())))
    }

    fn kind(&self) -> &'static str {
        match self {
            AttrValue::Static(_) => "static",
            AttrValue::Reactive(_) => "reactive",
            AttrValue::Handler(_) => "handler",
            AttrValue::Spread(_) => "spread",
            AttrValue::Predicate(_) => "predicate",
        }
    }

    /// Turn the value into a predicate: truthiness for values and
    /// expressions.
    fn into_predicate(self) -> Option<PredicateFn> {
        match self {
            AttrValue::Predicate(p) => Some(p),
            AttrValue::Reactive(e) => Some(Rc::new(move || e().map(|v| v.truthy()))),
            AttrValue::Static(v) => {
                let truth = v.truthy();
                Some(Rc::new(move || Ok(truth)))
            }
            AttrValue::Handler(_) | AttrValue::Spread(_) => None,
        }
    }
}

impl fmt::Debug for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Static(v) => write!(f, "Static({v:?})"),
            other => f.write_str(other.kind()),
        }
    }
}

/// One attribute or prop entry, in source order.
#[derive(Clone)]
pub(crate) enum AttrItem {
    Static(String, Value),
    Reactive(String, Expr),
    Spread(Expr),
}

/// One event binding.
#[derive(Clone)]
pub(crate) enum EventItem {
    Fixed(String, EventHandler),
    /// Dispatches to whatever handler the expression yields at event time.
    Dynamic(String, Expr),
}

#[derive(Clone)]
pub(crate) enum CondMarker {
    If(PredicateFn),
    ElseIf(PredicateFn),
    Else,
}

/// The attribute map passed to [`h`].
#[derive(Clone, Default)]
pub struct Attrs {
    pub(crate) items: Vec<AttrItem>,
    pub(crate) events: Vec<EventItem>,
    pub(crate) cond: Option<CondMarker>,
    pub(crate) slot: Option<String>,
    pub(crate) node_ref: Option<String>,
    pub(crate) invalid: Option<String>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, interpreting directive prefixes in `key`.
    pub fn insert(mut self, key: &str, value: AttrValue) -> Self {
        match key {
            "v-if" => self.set_cond(key, value, CondMarker::If),
            "v-else-if" => self.set_cond(key, value, CondMarker::ElseIf),
            "v-else" => self.cond = Some(CondMarker::Else),
            "v-bind" => match value {
                AttrValue::Spread(e) | AttrValue::Reactive(e) => self.items.push(AttrItem::Spread(e)),
                AttrValue::Static(v) => self.items.push(AttrItem::Spread(Rc::new(move || Ok(v.clone())))),
                other => self.reject(key, &other),
            },
            "ref" => match value {
                AttrValue::Static(Value::Str(name)) => self.node_ref = Some(name.to_string()),
                other => self.reject(key, &other),
            },
            _ => {
                if let Some(name) = key.strip_prefix("v-slot:").or_else(|| key.strip_prefix('#')) {
                    self.slot = Some(name.to_string());
                } else if let Some(event) = key.strip_prefix('@') {
                    self.insert_event(event, value);
                } else if let Some(name) = key.strip_prefix(':') {
                    self.insert_attr(name, value);
                } else {
                    self.insert_attr(key, value);
                }
            }
        }
        self
    }

    fn set_cond(&mut self, key: &str, value: AttrValue, marker: fn(PredicateFn) -> CondMarker) {
        let kind = value.kind();
        match value.into_predicate() {
            Some(p) => self.cond = Some(marker(p)),
            None => self.invalid = Some(format!("`{key}` expects a predicate, got {kind}")),
        }
    }

    fn insert_attr(&mut self, name: &str, value: AttrValue) {
        let item = match value {
            AttrValue::Static(v) => AttrItem::Static(name.to_string(), v),
            AttrValue::Reactive(e) => AttrItem::Reactive(name.to_string(), e),
            AttrValue::Handler(h) => AttrItem::Static(name.to_string(), Value::Handler(h)),
            other => return self.reject(name, &other),
        };
        self.items.push(item);
    }

    fn insert_event(&mut self, event: &str, value: AttrValue) {
        let item = match value {
            AttrValue::Handler(h) | AttrValue::Static(Value::Handler(h)) => EventItem::Fixed(event.to_string(), h),
            AttrValue::Reactive(e) => EventItem::Dynamic(event.to_string(), e),
            other => return self.reject(event, &other),
        };
        self.events.push(item);
    }

    fn reject(&mut self, key: &str, value: &AttrValue) {
        warn!(key, kind = value.kind(), "attribute value does not fit its key");
        self.invalid = Some(format!("`{key}` cannot take a {} value", value.kind()));
    }

    /// Static attribute or literal prop.
    pub fn set(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.items.push(AttrItem::Static(name.to_string(), value.into()));
        self
    }

    /// Reactive attribute. Returning [`Value::Unset`] removes it.
    pub fn bind(self, name: &str, f: impl Fn() -> Value + 'static) -> Self {
        self.try_bind(name, move || Ok(f()))
    }

    /// Reactive attribute whose evaluation may fail. A failure keeps the
    /// previous value.
    pub fn try_bind(mut self, name: &str, f: impl Fn() -> Result<Value> + 'static) -> Self {
        self.items.push(AttrItem::Reactive(name.to_string(), Rc::new(f)));
        self
    }

    pub fn on(self, event: &str, f: impl Fn(&[Value]) + 'static) -> Self {
        self.on_handler(event, EventHandler::new(f))
    }

    pub fn on_handler(mut self, event: &str, handler: EventHandler) -> Self {
        self.events.push(EventItem::Fixed(event.to_string(), handler));
        self
    }

    /// Handler chosen at event time: `f` yields a [`Value::Handler`].
    pub fn on_dynamic(mut self, event: &str, f: impl Fn() -> Value + 'static) -> Self {
        self.events.push(EventItem::Dynamic(event.to_string(), Rc::new(move || Ok(f()))));
        self
    }

    /// Spread a mapping. Keys added later in source order win.
    pub fn spread(mut self, f: impl Fn() -> Value + 'static) -> Self {
        self.items.push(AttrItem::Spread(Rc::new(move || Ok(f()))));
        self
    }

    pub fn when(self, f: impl Fn() -> bool + 'static) -> Self {
        self.try_when(move || Ok(f()))
    }

    pub fn try_when(mut self, f: impl Fn() -> Result<bool> + 'static) -> Self {
        self.cond = Some(CondMarker::If(Rc::new(f)));
        self
    }

    pub fn else_when(mut self, f: impl Fn() -> bool + 'static) -> Self {
        self.cond = Some(CondMarker::ElseIf(Rc::new(move || Ok(f()))));
        self
    }

    pub fn otherwise(mut self) -> Self {
        self.cond = Some(CondMarker::Else);
        self
    }

    /// Mark the element as content for the caller's slot `name`.
    pub fn slot(mut self, name: &str) -> Self {
        self.slot = Some(name.to_string());
        self
    }

    pub fn node_ref(mut self, name: &str) -> Self {
        self.node_ref = Some(name.to_string());
        self
    }
}

impl fmt::Debug for Attrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attrs")
            .field("items", &self.items.len())
            .field("events", &self.events.len())
            .field("slot", &self.slot)
            .field("node_ref", &self.node_ref)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Descriptors
// ----------------------------------------------------------------------------

/// A fragment description produced by [`h`] and friends.
#[derive(Clone)]
pub struct Descriptor {
    pub(crate) kind: DescriptorKind,
    pub(crate) cond: Option<CondMarker>,
    pub(crate) slot: Option<String>,
}

#[derive(Clone)]
pub(crate) enum DescriptorKind {
    Element {
        tag: Rc<str>,
        attrs: Rc<Attrs>,
        children: Rc<[Descriptor]>,
    },
    Component {
        target: ComponentRef,
        attrs: Rc<Attrs>,
        slots: Rc<IndexMap<String, SlotContent>>,
    },
    Text(TextSource),
    Group(Rc<[Descriptor]>),
    ControlFlow(Rc<[Branch]>),
    List(Rc<ListSpec>),
    Slot {
        name: String,
        fallback: Rc<[Descriptor]>,
    },
    Dynamic {
        is: TagFn,
        attrs: Rc<Attrs>,
        children: Rc<[Descriptor]>,
    },
    Invalid(String),
}

#[derive(Clone)]
pub(crate) enum ComponentRef {
    Type(ComponentType),
    Named(Rc<str>),
}

#[derive(Clone)]
pub(crate) enum TextSource {
    Static(Rc<str>),
    Reactive(Expr),
}

/// One `(predicate, branch)` entry; `None` is the `else` branch.
#[derive(Clone)]
pub(crate) struct Branch {
    pub(crate) predicate: Option<PredicateFn>,
    pub(crate) body: Descriptor,
}

pub(crate) struct ListSpec {
    pub(crate) source: Expr,
    pub(crate) key: Option<KeyFn>,
    pub(crate) factory: ItemFactory,
}

/// Caller-supplied content for one slot.
#[derive(Clone)]
pub(crate) struct SlotContent {
    pub(crate) body: Rc<[Descriptor]>,
    /// Content shows only while this holds.
    pub(crate) when: Option<PredicateFn>,
}

impl Descriptor {
    fn new(kind: DescriptorKind) -> Self {
        Self {
            kind,
            cond: None,
            slot: None,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::new(DescriptorKind::Invalid(message.into()))
    }

    pub(crate) fn control_flow(branches: Vec<Branch>) -> Self {
        Self::new(DescriptorKind::ControlFlow(branches.into()))
    }

    pub(crate) fn group(children: Vec<Descriptor>) -> Self {
        Self::new(DescriptorKind::Group(children.into()))
    }

    /// Conditional: shown while `f` holds.
    pub fn when(mut self, f: impl Fn() -> bool + 'static) -> Self {
        self.cond = Some(CondMarker::If(Rc::new(move || Ok(f()))));
        self
    }

    pub fn else_when(mut self, f: impl Fn() -> bool + 'static) -> Self {
        self.cond = Some(CondMarker::ElseIf(Rc::new(move || Ok(f()))));
        self
    }

    pub fn otherwise(mut self) -> Self {
        self.cond = Some(CondMarker::Else);
        self
    }

    /// Mark as content for the caller's slot `name`.
    pub fn in_slot(mut self, name: &str) -> Self {
        self.slot = Some(name.to_string());
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            DescriptorKind::Element { .. } => "element",
            DescriptorKind::Component { .. } => "component",
            DescriptorKind::Text(_) => "text",
            DescriptorKind::Group(_) => "group",
            DescriptorKind::ControlFlow(_) => "control-flow",
            DescriptorKind::List(_) => "list",
            DescriptorKind::Slot { .. } => "slot",
            DescriptorKind::Dynamic { .. } => "dynamic",
            DescriptorKind::Invalid(_) => "invalid",
        }
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DescriptorKind::Element { tag, children, .. } => {
                write!(f, "<{tag}> ({} children)", children.len())
            }
            DescriptorKind::Component { target: ComponentRef::Type(ty), .. } => write!(f, "<{}/>", ty.name()),
            DescriptorKind::Component { target: ComponentRef::Named(name), .. } => write!(f, "<{name}/>"),
            DescriptorKind::Invalid(message) => write!(f, "invalid: {message}"),
            _ => f.write_str(self.kind_name()),
        }
    }
}

/// Build a descriptor from a tag, attributes and children.
///
/// Conditional siblings (`when` / `else_when` / `otherwise`) among
/// `children` are collapsed into one control-flow descriptor. For
/// components, `children` become slot content: children marked with a slot
/// name fill that slot, the rest fill `default`.
pub fn h(tag: impl Into<Tag>, attrs: Attrs, children: Vec<Descriptor>) -> Descriptor {
    let mut attrs = attrs;
    let cond = attrs.cond.take();
    let slot = attrs.slot.take();

    let kind = if let Some(message) = attrs.invalid.take() {
        DescriptorKind::Invalid(message)
    } else {
        match tag.into() {
            Tag::Element(name) if &*name == "template" => DescriptorKind::Group(collapse(children).into()),
            Tag::Element(name) => DescriptorKind::Element {
                tag: name,
                attrs: Rc::new(attrs),
                children: collapse(children).into(),
            },
            Tag::Named(name) => DescriptorKind::Component {
                target: ComponentRef::Named(name),
                attrs: Rc::new(attrs),
                slots: Rc::new(partition(children)),
            },
            Tag::Component(ty) => DescriptorKind::Component {
                target: ComponentRef::Type(ty),
                attrs: Rc::new(attrs),
                slots: Rc::new(partition(children)),
            },
        }
    };

    Descriptor { kind, cond, slot }
}

/// Static text.
pub fn text(content: impl Into<String>) -> Descriptor {
    let content: String = content.into();
    Descriptor::new(DescriptorKind::Text(TextSource::Static(content.into())))
}

/// Reactive text.
pub fn text_with(f: impl Fn() -> Value + 'static) -> Descriptor {
    Descriptor::new(DescriptorKind::Text(TextSource::Reactive(Rc::new(move || Ok(f())))))
}

/// Children without a wrapping element.
pub fn fragment(children: Vec<Descriptor>) -> Descriptor {
    Descriptor::group(collapse(children))
}

/// A keyed list (`v-for` with `:key`).
pub fn each(
    source: impl Fn() -> Value + 'static,
    key: impl Fn(&Value) -> Value + 'static,
    factory: impl Fn(&ItemScope) -> Descriptor + 'static,
) -> Descriptor {
    Descriptor::new(DescriptorKind::List(Rc::new(ListSpec {
        source: Rc::new(move || Ok(source())),
        key: Some(Rc::new(key)),
        factory: Rc::new(factory),
    })))
}

/// An unkeyed list: positions are reused, items updated in place.
pub fn each_indexed(
    source: impl Fn() -> Value + 'static,
    factory: impl Fn(&ItemScope) -> Descriptor + 'static,
) -> Descriptor {
    Descriptor::new(DescriptorKind::List(Rc::new(ListSpec {
        source: Rc::new(move || Ok(source())),
        key: None,
        factory: Rc::new(factory),
    })))
}

/// A slot outlet with fallback content.
pub fn slot(name: &str, fallback: Vec<Descriptor>) -> Descriptor {
    Descriptor::new(DescriptorKind::Slot {
        name: name.to_string(),
        fallback: collapse(fallback).into(),
    })
}

/// `<component :is=...>`: the tag is re-evaluated reactively.
pub fn dynamic(is: impl Fn() -> Tag + 'static, attrs: Attrs, children: Vec<Descriptor>) -> Descriptor {
    let mut attrs = attrs;
    let cond = attrs.cond.take();
    let slot = attrs.slot.take();
    Descriptor {
        kind: DescriptorKind::Dynamic {
            is: Rc::new(move || Ok(is())),
            attrs: Rc::new(attrs),
            children: children.into(),
        },
        cond,
        slot,
    }
}

/// Collapse `if` / `else-if` / `else` runs into control-flow descriptors.
pub(crate) fn collapse(children: Vec<Descriptor>) -> Vec<Descriptor> {
    let mut out = Vec::with_capacity(children.len());
    let mut chain: Option<Vec<Branch>> = None;

    for mut child in children {
        match child.cond.take() {
            Some(CondMarker::If(p)) => {
                if let Some(done) = chain.take() {
                    out.push(Descriptor::control_flow(done));
                }
                chain = Some(vec![Branch {
                    predicate: Some(p),
                    body: child,
                }]);
            }
            Some(CondMarker::ElseIf(p)) => match chain.as_mut() {
                Some(branches) => branches.push(Branch {
                    predicate: Some(p),
                    body: child,
                }),
                None => out.push(Descriptor::invalid("`v-else-if` without a preceding `v-if`")),
            },
            Some(CondMarker::Else) => match chain.take() {
                Some(mut branches) => {
                    branches.push(Branch {
                        predicate: None,
                        body: child,
                    });
                    out.push(Descriptor::control_flow(branches));
                }
                None => out.push(Descriptor::invalid("`v-else` without a preceding `v-if`")),
            },
            None => {
                if let Some(done) = chain.take() {
                    out.push(Descriptor::control_flow(done));
                }
                out.push(child);
            }
        }
    }
    if let Some(done) = chain {
        out.push(Descriptor::control_flow(done));
    }
    out
}

/// Split component children into slot content.
fn partition(children: Vec<Descriptor>) -> IndexMap<String, SlotContent> {
    let mut named: IndexMap<String, (Vec<Descriptor>, Option<PredicateFn>)> = IndexMap::new();
    let mut default = Vec::new();

    for mut child in children {
        let Some(name) = child.slot.take() else {
            default.push(child);
            continue;
        };
        let when = match child.cond.take() {
            Some(CondMarker::If(p)) | Some(CondMarker::ElseIf(p)) => Some(p),
            _ => None,
        };
        let body = match child.kind {
            DescriptorKind::Group(children) => children.to_vec(),
            _ => vec![child],
        };
        let entry = named.entry(name).or_insert_with(|| (Vec::new(), None));
        entry.0.extend(body);
        if entry.1.is_none() {
            entry.1 = when;
        }
    }

    let mut slots: IndexMap<String, SlotContent> = named
        .into_iter()
        .map(|(name, (body, when))| {
            let content = SlotContent {
                body: collapse(body).into(),
                when,
            };
            (name, content)
        })
        .collect();

    if !default.is_empty() {
        let mut body: Vec<Descriptor> = slots
            .shift_remove("default")
            .map(|existing| existing.body.to_vec())
            .unwrap_or_default();
        body.extend(collapse(default));
        slots.insert(
            "default".to_string(),
            SlotContent {
                body: body.into(),
                when: None,
            },
        );
    }
    slots
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
