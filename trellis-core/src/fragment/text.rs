//! Text fragments.
//!
//! A text node when the backend has them; otherwise the text is written to
//! the `text` attribute of the backend parent.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use super::{teardown_failed, Fragment, Host, HostStats};
use crate::backend::Native;
use crate::error::{BackendError, Result};
use crate::reactive::FlushMode;
use crate::template::TextSource;
use crate::value::Value;

pub(crate) struct TextState {
    source: TextSource,
    native: RefCell<Option<Native>>,
    sink: RefCell<Option<Rc<TextSink>>>,
    inserted: Cell<bool>,
}

struct TextSink {
    host: Rc<Host>,
    /// `None` when writing to the parent's attribute.
    node: Option<Native>,
    parent: Native,
    last: RefCell<Option<Value>>,
}

impl TextSink {
    fn write(&self, text: &str) -> Result<()> {
        match &self.node {
            Some(node) => self.host.backend.set_element_text(node, text)?,
            None => {
                let value = Value::from(text);
                self.host.backend.set_attribute(&self.parent, "text", &value)?;
                *self.last.borrow_mut() = Some(value);
            }
        }
        Ok(())
    }
}

impl TextState {
    pub(crate) fn new(source: TextSource) -> Self {
        Self {
            source,
            native: RefCell::new(None),
            sink: RefCell::new(None),
            inserted: Cell::new(false),
        }
    }

    pub(crate) fn native(&self) -> Option<Native> {
        self.native.borrow().clone()
    }

    pub(crate) fn mount(&self, fragment: &Fragment, target: &Native, anchor: Option<&Native>) -> Result<()> {
        let host = fragment.host();
        let node = match host.backend.create_text_element() {
            Ok(node) => {
                HostStats::bump(&host.stats.natives_created);
                Some(node)
            }
            Err(BackendError::Unsupported) => {
                trace!(fragment = fragment.id(), "no text nodes; writing the parent's text attribute");
                None
            }
            Err(err) => return Err(err.into()),
        };
        *self.native.borrow_mut() = node.clone();

        let sink = Rc::new(TextSink {
            host: Rc::clone(host),
            node: node.clone(),
            parent: target.clone(),
            last: RefCell::new(None),
        });
        *self.sink.borrow_mut() = Some(Rc::clone(&sink));

        match &self.source {
            TextSource::Static(text) => sink.write(text)?,
            TextSource::Reactive(expr) => {
                let expr = Rc::clone(expr);
                fragment.bind_effect("text", FlushMode::Main, move || {
                    let value = expr()?;
                    sink.write(&value.to_string())
                })?;
            }
        }

        if let Some(node) = node {
            host.backend.insert(&node, target, anchor)?;
            self.inserted.set(true);
        }
        Ok(())
    }

    pub(crate) fn release(&self, fragment: &Fragment, detach: bool) {
        let sink = self.sink.borrow_mut().take();
        let node = self.native.borrow_mut().take();
        if !detach {
            return;
        }
        let backend = &fragment.host().backend;

        if let Some(node) = node {
            if self.inserted.replace(false) {
                if let Some(target) = fragment.target() {
                    if let Err(err) = backend.remove(&node, &target) {
                        teardown_failed(fragment, "remove", &err);
                    }
                }
            }
        } else if let Some(sink) = sink {
            if let Some(previous) = sink.last.borrow_mut().take() {
                if let Err(err) = backend.remove_attribute(&sink.parent, "text", &previous) {
                    teardown_failed(fragment, "remove_attribute", &err);
                }
            }
        }
    }
}
