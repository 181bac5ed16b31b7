//! Slot outlets.
//!
//! A slot shows the caller's content for its name when there is any (and,
//! for conditional slot content, while its predicate holds), otherwise its
//! own fallback. Caller content is built in the caller's scope so its
//! bindings see the caller's state; the fallback is built in the component's.

use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use super::{build, Fragment, Kind};
use crate::component::Instance;
use crate::error::{Error, Result};
use crate::reactive::{untrack, FlushMode};
use crate::template::{Descriptor, SlotContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Showing {
    Caller,
    Fallback,
}

pub(crate) struct SlotState {
    name: String,
    fallback: Rc<[Descriptor]>,
    showing: Cell<Option<Showing>>,
}

impl SlotState {
    pub(crate) fn new(name: String, fallback: Rc<[Descriptor]>) -> Self {
        Self {
            name,
            fallback,
            showing: Cell::new(None),
        }
    }

    pub(crate) fn mount(&self, fragment: &Fragment) -> Result<()> {
        if fragment.scope().is_none() {
            return Err(Error::render("slot", format!("slot `{}` used outside a component", self.name)));
        }
        let weak = fragment.downgrade();
        fragment.bind_effect("slot", FlushMode::Main, move || {
            let Some(fragment) = weak.upgrade() else {
                return Ok(());
            };
            let (Kind::Slot(state), Some(owner)) = (fragment.kind(), fragment.scope()) else {
                return Ok(());
            };
            let content = owner.slot_content(&state.name);
            let showing = match &content {
                Some(SlotContent { when: Some(predicate), .. }) => {
                    if predicate()? {
                        Showing::Caller
                    } else {
                        Showing::Fallback
                    }
                }
                Some(_) => Showing::Caller,
                None => Showing::Fallback,
            };
            if state.showing.get() == Some(showing) {
                return Ok(());
            }
            let owner = owner.clone();
            untrack(|| state.switch(&fragment, &owner, showing, content))
        })
    }

    fn switch(&self, fragment: &Fragment, owner: &Instance, showing: Showing, content: Option<SlotContent>) -> Result<()> {
        self.showing.set(Some(showing));
        fragment.clear_children();
        debug!(fragment = fragment.id(), slot = %self.name, ?showing, "slot content switched");

        let (body, scope) = match (showing, content) {
            (Showing::Caller, Some(content)) => (content.body, owner.parent()),
            _ => (Rc::clone(&self.fallback), Some(owner.clone())),
        };
        let Some(target) = fragment.target() else {
            return Ok(());
        };
        if body.is_empty() {
            return Ok(());
        }

        let child = build(&Descriptor::group(body.to_vec()), fragment.host(), scope.as_ref())?;
        fragment.adopt(&child);
        let anchor = fragment.next_anchor();
        if let Err(err) = child.mount(&target, anchor.as_ref()) {
            fragment.remove_child(&child);
            self.showing.set(None);
            return Err(err);
        }
        Ok(())
    }
}
