//! `v-if` / `v-else-if` / `v-else` chains.
//!
//! One effect evaluates the predicates in order and remembers which branch
//! is shown. Only a change of branch touches the tree: the old branch is
//! unmounted and the new one built and mounted in its place.

use std::cell::Cell;
use std::rc::Rc;

use tracing::debug;

use super::{build, Fragment, Kind};
use crate::error::Result;
use crate::reactive::{untrack, FlushMode};
use crate::template::Branch;

pub(crate) struct ControlFlowState {
    branches: Rc<[Branch]>,
    /// `None` until the first run; `Some(None)` when no branch matches.
    shown: Cell<Option<Option<usize>>>,
}

impl ControlFlowState {
    pub(crate) fn new(branches: Rc<[Branch]>) -> Self {
        Self {
            branches,
            shown: Cell::new(None),
        }
    }

    pub(crate) fn mount(&self, fragment: &Fragment) -> Result<()> {
        let weak = fragment.downgrade();
        fragment.bind_effect("v-if", FlushMode::Main, move || {
            let Some(fragment) = weak.upgrade() else {
                return Ok(());
            };
            let Kind::ControlFlow(state) = fragment.kind() else {
                return Ok(());
            };
            let selected = state.select()?;
            if state.shown.get() == Some(selected) {
                return Ok(());
            }
            untrack(|| state.switch(&fragment, selected))
        })
    }

    /// The first branch whose predicate holds. Predicates after the match
    /// are not evaluated.
    fn select(&self) -> Result<Option<usize>> {
        for (index, branch) in self.branches.iter().enumerate() {
            match &branch.predicate {
                Some(predicate) => {
                    if predicate()? {
                        return Ok(Some(index));
                    }
                }
                None => return Ok(Some(index)),
            }
        }
        Ok(None)
    }

    fn switch(&self, fragment: &Fragment, selected: Option<usize>) -> Result<()> {
        let previous = self.shown.replace(Some(selected)).flatten();
        fragment.clear_children();
        debug!(fragment = fragment.id(), ?previous, ?selected, "branch switched");

        let (Some(index), Some(target)) = (selected, fragment.target()) else {
            return Ok(());
        };
        let child = build(&self.branches[index].body, fragment.host(), fragment.scope())?;
        fragment.adopt(&child);
        let anchor = fragment.next_anchor();
        if let Err(err) = child.mount(&target, anchor.as_ref()) {
            fragment.remove_child(&child);
            self.shown.set(None);
            return Err(err);
        }
        Ok(())
    }
}
