#![forbid(unsafe_code)]

//! FIFO scheduler for stale consumers.
//!
//! Producers enqueue the consumers they made stale; the scheduler decides
//! *when* those consumers re-run:
//!
//! - **Async** (default): the first enqueue after an idle period arms a
//!   single drain microtask on the runtime's local pool. All writes landing
//!   before the pool is pumped coalesce into one drain, so a consumer runs at
//!   most once per turn no matter how many of its dependencies were written.
//! - **Sync**: the queue drains at the end of the triggering write. Fully
//!   deterministic and convenient in tests, but feedback loops re-run
//!   immediately and can starve the caller.
//!
//! A host that drives its own frame timing can replace the arming action with
//! [`Scheduler::set_hook`]: instead of spawning a drain task the hook fires,
//! and the host calls `Runtime::flush` on its own cadence.
//!
//! # Invariants
//!
//! 1. Queue order is insertion order; a queued consumer is never enqueued
//!    twice (identity dedup via its `queued` flag).
//! 2. Enqueues during a drain land at the tail and run in the same drain.
//! 3. Only consumers whose stale flag is still set actually run — a consumer
//!    refreshed by a pull-read between enqueue and drain is skipped.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use futures::executor::LocalSpawner;
use futures::task::LocalSpawnExt;

use crate::consumer::ConsumerCore;

#[cfg(feature = "tracing")]
use crate::logging::trace;
#[cfg(not(feature = "tracing"))]
use crate::trace;

/// Drain policy. See the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    /// Drain at the end of the triggering write.
    Sync,
    /// Coalesce into one drain per microtask turn.
    Async,
}

pub(crate) struct Scheduler {
    queue: RefCell<VecDeque<Rc<ConsumerCore>>>,
    mode: Cell<SchedulerMode>,
    draining: Cell<bool>,
    armed: Cell<bool>,
    /// While > 0, `kick` is inert; used to fan out batch notifications before
    /// a single drain.
    hold: Cell<usize>,
    weak_self: std::rc::Weak<Scheduler>,
    hook: RefCell<Option<Box<dyn Fn()>>>,
    spawner: RefCell<Option<LocalSpawner>>,
}

impl Scheduler {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            queue: RefCell::new(VecDeque::new()),
            mode: Cell::new(SchedulerMode::Async),
            draining: Cell::new(false),
            armed: Cell::new(false),
            hold: Cell::new(0),
            weak_self: weak_self.clone(),
            hook: RefCell::new(None),
            spawner: RefCell::new(None),
        })
    }

    pub(crate) fn set_spawner(&self, spawner: LocalSpawner) {
        *self.spawner.borrow_mut() = Some(spawner);
    }

    pub(crate) fn mode(&self) -> SchedulerMode {
        self.mode.get()
    }

    pub(crate) fn set_mode(&self, mode: SchedulerMode) {
        self.mode.set(mode);
    }

    pub(crate) fn set_hook(&self, hook: Option<Box<dyn Fn()>>) {
        *self.hook.borrow_mut() = hook;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Queue a consumer. Does not drain; callers follow up with [`kick`].
    ///
    /// [`kick`]: Scheduler::kick
    pub(crate) fn enqueue(&self, consumer: Rc<ConsumerCore>) {
        if consumer.is_queued() || consumer.is_disposed() {
            return;
        }
        consumer.set_queued(true);
        self.queue.borrow_mut().push_back(consumer);
    }

    /// Start a drain (sync mode) or arm the drain microtask (async mode).
    pub(crate) fn kick(&self) {
        if self.hold.get() > 0 || self.is_empty() {
            return;
        }
        match self.mode.get() {
            SchedulerMode::Sync => self.drain(),
            SchedulerMode::Async => self.arm(),
        }
    }

    fn arm(&self) {
        if self.armed.get() {
            return;
        }
        self.armed.set(true);
        if let Some(hook) = &*self.hook.borrow() {
            hook();
            return;
        }
        let weak = self.weak_self.clone();
        if let Some(spawner) = &*self.spawner.borrow() {
            let _ = spawner.spawn_local(async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.drain();
                }
            });
        }
    }

    /// Run every queued consumer whose stale flag is still set, in FIFO
    /// order, until the queue is empty. Re-entrant calls are no-ops.
    pub(crate) fn drain(&self) {
        self.armed.set(false);
        if self.draining.get() {
            return;
        }
        self.draining.set(true);
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(consumer) = next else { break };
            consumer.set_queued(false);
            if consumer.is_stale() && !consumer.is_disposed() {
                consumer.run();
            }
        }
        self.draining.set(false);
        trace!("scheduler drain complete");
    }

    /// Suppress kicks while fanning out batch notifications.
    pub(crate) fn hold_kicks(&self) {
        self.hold.set(self.hold.get() + 1);
    }

    /// Release a [`hold_kicks`] and kick if work queued up meanwhile.
    ///
    /// [`hold_kicks`]: Scheduler::hold_kicks
    pub(crate) fn release_kicks(&self) {
        let hold = self.hold.get().saturating_sub(1);
        self.hold.set(hold);
        if hold == 0 {
            self.kick();
        }
    }
}
