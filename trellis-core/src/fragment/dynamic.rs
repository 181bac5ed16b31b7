//! `<component :is=...>`: a tag chosen at runtime.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use super::{build, Fragment, Kind};
use crate::error::Result;
use crate::reactive::{untrack, FlushMode};
use crate::template::{h, Attrs, Descriptor, Tag, TagFn};

pub(crate) struct DynamicState {
    is: TagFn,
    attrs: Rc<Attrs>,
    children: Rc<[Descriptor]>,
    shown: RefCell<Option<Tag>>,
}

impl DynamicState {
    pub(crate) fn new(is: TagFn, attrs: Rc<Attrs>, children: Rc<[Descriptor]>) -> Self {
        Self {
            is,
            attrs,
            children,
            shown: RefCell::new(None),
        }
    }

    pub(crate) fn mount(&self, fragment: &Fragment) -> Result<()> {
        let weak = fragment.downgrade();
        fragment.bind_effect("is", FlushMode::Main, move || {
            let Some(fragment) = weak.upgrade() else {
                return Ok(());
            };
            let Kind::Dynamic(state) = fragment.kind() else {
                return Ok(());
            };
            let tag = (state.is)()?;
            if state.shown.borrow().as_ref() == Some(&tag) {
                return Ok(());
            }
            untrack(|| state.switch(&fragment, tag))
        })
    }

    fn switch(&self, fragment: &Fragment, tag: Tag) -> Result<()> {
        fragment.clear_children();
        debug!(fragment = fragment.id(), tag = tag.name(), "dynamic tag switched");
        *self.shown.borrow_mut() = Some(tag.clone());

        let Some(target) = fragment.target() else {
            return Ok(());
        };
        let desc = h(tag, (*self.attrs).clone(), self.children.to_vec());
        let child = build(&desc, fragment.host(), fragment.scope())?;
        fragment.adopt(&child);
        let anchor = fragment.next_anchor();
        if let Err(err) = child.mount(&target, anchor.as_ref()) {
            fragment.remove_child(&child);
            self.shown.borrow_mut().take();
            return Err(err);
        }
        Ok(())
    }
}
