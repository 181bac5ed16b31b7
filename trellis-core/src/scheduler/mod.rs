//! Update Scheduler
//!
//! The scheduler turns a stream of reactive writes into consistent flushes.
//! Effects never run inside the write that invalidated them (except `Sync`
//! ones); they are queued here and drained in a fixed order.
//!
//! # Algorithm
//!
//! Three queues, keyed by [`FlushMode`]: `pre` (input projections such as
//! props), `main` (render updates) and `post`. Each queue is an ordered map
//! from subscriber id to effect, which gives deduplication and ordering in
//! one structure: ids are handed out in creation order, so within a queue a
//! parent fragment's effects run before those of the children it mounted.
//!
//! Queue order is therefore effect creation order, not the order in which
//! effects subscribed to the value that was written. The two differ only
//! when an older effect starts reading a value after a younger one already
//! does; the older effect still runs first.
//!
//! One flush is a sequence of rounds. Each round:
//!
//! 1. Drain `pre`, then `main`, then `post`. Work queued into the queue being
//!    drained joins this round; an effect that already ran this round waits
//!    for the next one.
//! 2. If anything is queued again, start another round.
//! 3. Once the queues are empty, fire the `updated` hooks of every component
//!    whose subtree had an effect re-run in any round, deepest component
//!    first. A hook fires at most once per flush: owners marked again by
//!    work the hooks themselves queue are skipped.
//!
//! More than `max_flush_rounds` rounds raise [`Error::FlushOverflow`] and
//! halt the scheduler: every later flush returns [`Error::Halted`] until
//! [`Scheduler::reset_halt`].
//!
//! # Batching
//!
//! Every write runs inside a batch; [`batch`] opens an outer one. When the
//! outermost batch closes, what happens depends on the event loop:
//!
//! - [`EventLoopKind::None`]: flush synchronously.
//! - [`EventLoopKind::Host`] and [`EventLoopKind::Cooperative`]: the first
//!   enqueue after an idle period calls the registered waker once; the flush
//!   happens when the host (or `App::tick`) gets to it.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::error::Error;
use crate::reactive::{FlushMode, SubscriberId};

/// Default number of rounds a flush may take.
pub const DEFAULT_MAX_FLUSH_ROUNDS: usize = 1000;

/// How flushes are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLoopKind {
    /// The host loop runs one scheduled task per frame.
    Host,
    /// An internal async tick (`App::tick`).
    Cooperative,
    /// Synchronous flush at the end of the outermost batch.
    #[default]
    None,
}

/// Something the scheduler can run.
pub(crate) trait Job {
    fn run_job(&self) -> Result<(), Error>;
}

/// The component an effect belongs to, for `updated` hooks.
pub trait EffectOwner {
    /// `(depth, id)`. Deeper owners fire first.
    fn owner_key(&self) -> (usize, u64);

    /// The enclosing owner, if any.
    fn owner_parent(&self) -> Option<Rc<dyn EffectOwner>>;

    /// Called at most once per flush after an owned effect re-ran.
    fn owner_updated(&self);
}

type Queue = BTreeMap<SubscriberId, Weak<dyn Job>>;

struct SchedulerState {
    batch_depth: usize,
    flushing: bool,
    halted: bool,
    queues: [Queue; 3],
    updated: BTreeMap<(Reverse<usize>, u64), Weak<dyn EffectOwner>>,
    event_loop: EventLoopKind,
    max_rounds: usize,
    waker: Option<Rc<dyn Fn()>>,
    wake_pending: bool,
    last_error: Option<Error>,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            batch_depth: 0,
            flushing: false,
            halted: false,
            queues: Default::default(),
            updated: BTreeMap::new(),
            event_loop: EventLoopKind::None,
            max_rounds: DEFAULT_MAX_FLUSH_ROUNDS,
            waker: None,
            wake_pending: false,
            last_error: None,
        }
    }
}

impl SchedulerState {
    fn has_work(&self) -> bool {
        self.queues.iter().any(|q| !q.is_empty()) || !self.updated.is_empty()
    }

    /// Pop the lowest id in `queue` that has not run this round.
    fn pop_next(&mut self, queue: usize, ran: &HashSet<SubscriberId>) -> Option<(SubscriberId, Weak<dyn Job>)> {
        let id = *self.queues[queue].keys().find(|id| !ran.contains(id))?;
        self.queues[queue].remove(&id).map(|job| (id, job))
    }
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

fn queue_index(mode: FlushMode) -> usize {
    match mode {
        FlushMode::Pre => 0,
        FlushMode::Main | FlushMode::Sync => 1,
        FlushMode::Post => 2,
    }
}

/// The per-thread scheduler.
pub struct Scheduler;

impl Scheduler {
    /// Install the event-loop mode, the round limit and the waker used by
    /// `Host` and `Cooperative` loops.
    pub(crate) fn configure(event_loop: EventLoopKind, max_rounds: usize, waker: Option<Rc<dyn Fn()>>) {
        STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.event_loop = event_loop;
            state.max_rounds = max_rounds.max(1);
            state.waker = waker;
            state.wake_pending = false;
        });
        debug!(?event_loop, max_rounds, "scheduler configured");
    }

    /// The active event-loop mode.
    pub fn event_loop() -> EventLoopKind {
        STATE.with(|state| state.borrow().event_loop)
    }

    /// Queue a job. Queueing an id twice keeps one entry.
    pub(crate) fn enqueue(mode: FlushMode, id: SubscriberId, job: Weak<dyn Job>) {
        let waker = STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.queues[queue_index(mode)].insert(id, job);
            Self::take_waker(&mut state)
        });
        trace!(effect = id.raw(), ?mode, "queued");
        if let Some(wake) = waker {
            wake();
        }
    }

    /// Remove a job from every queue.
    pub(crate) fn dequeue(id: SubscriberId) {
        let _ = STATE.try_with(|state| {
            if let Ok(mut state) = state.try_borrow_mut() {
                for queue in state.queues.iter_mut() {
                    queue.remove(&id);
                }
            }
        });
    }

    /// Record that `owner` and all its ancestors have updated this round.
    pub(crate) fn mark_updated(owner: &Rc<dyn EffectOwner>) {
        let mut chain = vec![Rc::clone(owner)];
        while let Some(parent) = chain.last().and_then(|o| o.owner_parent()) {
            chain.push(parent);
        }
        let waker = STATE.with(|state| {
            let mut state = state.borrow_mut();
            for owner in &chain {
                let (depth, id) = owner.owner_key();
                state.updated.insert((Reverse(depth), id), Rc::downgrade(owner));
            }
            Self::take_waker(&mut state)
        });
        if let Some(wake) = waker {
            wake();
        }
    }

    /// The waker to call for new work, if one is due.
    fn take_waker(state: &mut SchedulerState) -> Option<Rc<dyn Fn()>> {
        if state.event_loop == EventLoopKind::None || state.flushing || state.wake_pending {
            return None;
        }
        let waker = state.waker.clone()?;
        state.wake_pending = true;
        Some(waker)
    }

    /// Open a batch. Batches nest.
    pub fn begin_batch() {
        STATE.with(|state| state.borrow_mut().batch_depth += 1);
    }

    /// Close a batch. Closing the outermost batch in `None` mode flushes.
    pub fn end_batch() -> Result<(), Error> {
        let should_flush = STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.batch_depth = state.batch_depth.saturating_sub(1);
            state.batch_depth == 0
                && !state.flushing
                && !state.halted
                && state.event_loop == EventLoopKind::None
                && state.has_work()
        });
        if should_flush {
            Self::flush()
        } else {
            Ok(())
        }
    }

    pub fn is_batching() -> bool {
        STATE.with(|state| state.borrow().batch_depth > 0)
    }

    pub fn is_flushing() -> bool {
        STATE.with(|state| state.borrow().flushing)
    }

    pub fn is_halted() -> bool {
        STATE.with(|state| state.borrow().halted)
    }

    /// Number of queued jobs.
    pub fn pending() -> usize {
        STATE.with(|state| state.borrow().queues.iter().map(|q| q.len()).sum())
    }

    /// Run queued work until the queues are empty.
    ///
    /// A flush requested while one is running returns immediately; the
    /// running flush picks the work up.
    pub fn flush() -> Result<(), Error> {
        let start = STATE.with(|state| {
            let mut state = state.borrow_mut();
            if state.halted {
                return Err(Error::Halted);
            }
            if state.flushing {
                return Ok(false);
            }
            state.flushing = true;
            state.wake_pending = false;
            Ok(true)
        })?;
        if !start {
            return Ok(());
        }

        let _guard = FlushGuard;
        let result = Self::run_rounds();
        if let Err(err) = &result {
            Self::record_error(err.clone());
        }
        result
    }

    fn run_rounds() -> Result<(), Error> {
        let max_rounds = STATE.with(|state| state.borrow().max_rounds);
        let mut rounds = 0;
        let mut fired: HashSet<(Reverse<usize>, u64)> = HashSet::new();

        loop {
            if !STATE.with(|state| state.borrow().has_work()) {
                trace!(rounds, "flush settled");
                return Ok(());
            }
            if rounds == max_rounds {
                STATE.with(|state| {
                    let mut state = state.borrow_mut();
                    state.halted = true;
                    for queue in state.queues.iter_mut() {
                        queue.clear();
                    }
                    state.updated.clear();
                });
                error!(rounds, "flush did not settle; scheduler halted");
                return Err(Error::FlushOverflow(max_rounds));
            }
            rounds += 1;

            let mut ran = HashSet::new();
            for queue in 0..3 {
                while let Some((id, job)) = STATE.with(|state| state.borrow_mut().pop_next(queue, &ran)) {
                    ran.insert(id);
                    if let Some(job) = job.upgrade() {
                        job.run_job()?;
                    }
                }
            }

            // `updated` waits for the queues to settle, so owners marked in
            // several rounds accumulate into one call.
            if STATE.with(|state| state.borrow().queues.iter().any(|q| !q.is_empty())) {
                continue;
            }
            let owners: Vec<_> = STATE.with(|state| std::mem::take(&mut state.borrow_mut().updated))
                .into_iter()
                .filter(|(key, _)| fired.insert(*key))
                .map(|(_, owner)| owner)
                .collect();
            for owner in owners.iter().filter_map(Weak::upgrade) {
                owner.owner_updated();
            }
        }
    }

    /// Remember an error for [`Scheduler::take_error`].
    pub(crate) fn record_error(err: Error) {
        let _ = STATE.try_with(|state| {
            if let Ok(mut state) = state.try_borrow_mut() {
                state.last_error = Some(err);
            }
        });
    }

    /// The most recent flush error, if any.
    pub fn take_error() -> Option<Error> {
        STATE.with(|state| state.borrow_mut().last_error.take())
    }

    /// Leave the halted state entered after a flush overflow.
    pub fn reset_halt() {
        STATE.with(|state| state.borrow_mut().halted = false);
    }
}

/// Clears the flushing flag even if a job panics.
struct FlushGuard;

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let _ = STATE.try_with(|state| {
            if let Ok(mut state) = state.try_borrow_mut() {
                state.flushing = false;
            }
        });
    }
}

/// Closes a batch on drop without flushing, for the unwinding path.
struct BatchGuard {
    closed: bool,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if !self.closed {
            let _ = STATE.try_with(|state| {
                if let Ok(mut state) = state.try_borrow_mut() {
                    state.batch_depth = state.batch_depth.saturating_sub(1);
                }
            });
        }
    }
}

/// Run `f` with all writes inside observed as one change.
///
/// No effect runs until the outermost batch closes (`Sync` effects aside).
/// The result of the flush that follows is returned.
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    Scheduler::begin_batch();
    let mut guard = BatchGuard { closed: false };
    let result = f();
    guard.closed = true;
    Scheduler::end_batch()?;
    Ok(result)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
