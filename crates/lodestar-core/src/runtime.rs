#![forbid(unsafe_code)]

//! The runtime: one isolated reactive graph plus its driving machinery.
//!
//! A [`Runtime`] owns everything a graph needs — the current-consumer frame
//! stack, untracked/batch depths, the scheduler, the timer driver, the time
//! source, and a single-threaded task pool for async cells. It is also the
//! *creator*: every cell variant is built through a factory method on it
//! (the ops crate layers more variants on via an extension trait).
//!
//! There is deliberately no process-global graph. A `Runtime` handle is
//! cheaply cloneable (`Rc` inside) and two runtimes in one process are fully
//! isolated; cells hold a handle to the runtime that created them.
//!
//! # Driving the graph
//!
//! In the default deferred mode nothing re-runs until the runtime is pumped:
//!
//! - [`flush`](Runtime::flush) drains the scheduler and the task pool to
//!   quiescence;
//! - [`tick`](Runtime::tick) additionally fires timers that have come due on
//!   the real clock;
//! - [`advance`](Runtime::advance) moves a test clock forward, firing timers
//!   at their exact virtual deadlines;
//! - [`settle`](Runtime::settle) is the blocking convenience used by tests:
//!   flush, wait out a duration, flush again.
//!
//! Hosts with their own frame loop call
//! [`set_scheduler`](Runtime::set_scheduler) and flush on their cadence.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use web_time::{Duration, Instant};

use crate::clock::{Delay, TestClock, TimeSource, TimerDriver, TimerHandle};
use crate::consumer::{ConsumerCore, Frame};
use crate::derived::{Derived, DerivedOptions};
use crate::effect::{Effect, EffectOptions};
use crate::error::BeaconError;
use crate::scheduler::{Scheduler, SchedulerMode};
use crate::writable::Writable;

#[cfg(feature = "tracing")]
use crate::logging::warn;
#[cfg(not(feature = "tracing"))]
use crate::warn;

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub(crate) struct RuntimeInner {
    next_id: Cell<u64>,
    frames: RefCell<Vec<Rc<Frame>>>,
    untracked_depth: Cell<usize>,
    batch_depth: Cell<usize>,
    /// Producers written inside the current batch, deduplicated by id; each
    /// entry re-notifies with the producer's final value at batch exit.
    batch_pending: RefCell<Vec<(u64, Box<dyn Fn()>)>>,
    scheduler: Rc<Scheduler>,
    timers: Rc<TimerDriver>,
    time: TimeSource,
    pool: RefCell<Option<LocalPool>>,
    spawner: LocalSpawner,
    last_error: RefCell<Option<BeaconError>>,
}

/// Handle to one reactive graph. Clones share the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime on the real monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self::build(TimeSource::Real)
    }

    /// Create a runtime on a manually advanced clock, for deterministic
    /// tests. Drive it with [`Runtime::advance`].
    #[must_use]
    pub fn new_test() -> (Self, TestClock) {
        let clock = TestClock::new();
        let rt = Self::build(TimeSource::Test(clock.clone()));
        (rt, clock)
    }

    fn build(time: TimeSource) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        let scheduler = Scheduler::new();
        scheduler.set_spawner(spawner.clone());
        Self {
            inner: Rc::new(RuntimeInner {
                next_id: Cell::new(1),
                frames: RefCell::new(Vec::new()),
                untracked_depth: Cell::new(0),
                batch_depth: Cell::new(0),
                batch_pending: RefCell::new(Vec::new()),
                scheduler,
                timers: Rc::new(TimerDriver::new()),
                time,
                pool: RefCell::new(Some(pool)),
                spawner,
                last_error: RefCell::new(None),
            }),
        }
    }

    // ── Cell factories ───────────────────────────────────────────────

    /// A writable cell holding `value`.
    #[must_use]
    pub fn writable<T: Clone + PartialEq + 'static>(&self, value: T) -> Writable<T> {
        Writable::create(self, Some(value), None)
    }

    /// A named writable cell.
    #[must_use]
    pub fn writable_named<T: Clone + PartialEq + 'static>(
        &self,
        value: T,
        name: impl Into<String>,
    ) -> Writable<T> {
        Writable::create(self, Some(value), Some(name.into()))
    }

    /// A writable cell with no value until the first `set`. Reading it before
    /// that fails with [`BeaconError::LazyRead`].
    #[must_use]
    pub fn lazy_writable<T: Clone + PartialEq + 'static>(&self) -> Writable<T> {
        Writable::create(self, None, None)
    }

    /// A named lazy writable cell.
    #[must_use]
    pub fn lazy_writable_named<T: Clone + PartialEq + 'static>(
        &self,
        name: impl Into<String>,
    ) -> Writable<T> {
        Writable::create(self, None, Some(name.into()))
    }

    /// A derived cell: `compute` runs under tracking, re-runs when any read
    /// producer changes. Sleeps when unwatched (see [`DerivedOptions`]).
    #[must_use]
    pub fn derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + 'static,
        F: FnMut() -> T + 'static,
    {
        Derived::create(self, DerivedOptions::new(), compute)
    }

    /// A derived cell with explicit options.
    #[must_use]
    pub fn derived_with<T, F>(&self, options: DerivedOptions, compute: F) -> Derived<T>
    where
        T: Clone + 'static,
        F: FnMut() -> T + 'static,
    {
        Derived::create(self, options, compute)
    }

    /// A side effect: `body` runs once now, then again whenever a producer it
    /// read changes. Dropping the returned [`Effect`] disposes it; call
    /// [`Effect::forget`] to keep it alive for the life of the graph.
    pub fn effect<F>(&self, body: F) -> Effect
    where
        F: FnMut() + 'static,
    {
        Effect::create(self, EffectOptions::new(), body)
    }

    /// An effect with explicit options.
    pub fn effect_with<F>(&self, options: EffectOptions, body: F) -> Effect
    where
        F: FnMut() + 'static,
    {
        Effect::create(self, options, body)
    }

    // ── Scopes ───────────────────────────────────────────────────────

    /// Run `f` with notifications deferred: observers of any number of writes
    /// inside the batch see exactly one notification each, carrying the final
    /// value. Values themselves update immediately (reads inside the batch
    /// see the latest write). Nested batches flush at the outermost exit.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let inner = &self.inner;
        inner.batch_depth.set(inner.batch_depth.get() + 1);
        let out = f();
        let depth = inner.batch_depth.get() - 1;
        inner.batch_depth.set(depth);
        if depth == 0 {
            let pending = std::mem::take(&mut *inner.batch_pending.borrow_mut());
            inner.scheduler.hold_kicks();
            for (_, notify) in pending {
                notify();
            }
            inner.scheduler.release_kicks();
        }
        out
    }

    /// Run `f` with tracking and notification suppressed: reads register no
    /// dependencies, writes mutate values without notifying anyone.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let inner = &self.inner;
        inner.untracked_depth.set(inner.untracked_depth.get() + 1);
        let out = f();
        inner.untracked_depth.set(inner.untracked_depth.get() - 1);
        out
    }

    // ── Driving ──────────────────────────────────────────────────────

    /// Drain the scheduler and the task pool until both are quiescent.
    ///
    /// Returns the first graph error recorded since the previous drive call
    /// (circular writes reject the write, keep the graph intact, and park
    /// their error here).
    pub fn flush(&self) -> Result<(), BeaconError> {
        loop {
            self.inner.scheduler.drain();
            self.pump_pool();
            if self.inner.scheduler.is_empty() {
                break;
            }
        }
        match self.inner.last_error.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Fire timers due on the current clock reading, then flush.
    pub fn tick(&self) -> Result<(), BeaconError> {
        let now = self.now();
        while let Some(callback) = self.inner.timers.pop_due(now) {
            callback();
        }
        self.flush()
    }

    /// Move a test clock forward by `delta`, firing each due timer at its
    /// exact virtual deadline (cascades re-armed along the way included) and
    /// flushing between deadlines. On a real-clock runtime this only flushes.
    pub fn advance(&self, delta: Duration) -> Result<(), BeaconError> {
        let TimeSource::Test(clock) = &self.inner.time else {
            warn!("Runtime::advance called on a real-clock runtime; flushing only");
            return self.flush();
        };
        let clock = clock.clone();
        let target = clock.now() + delta;
        let mut first_err = Ok(());
        loop {
            match self.inner.timers.next_deadline() {
                Some(deadline) if deadline <= target => {
                    clock.set_to(deadline);
                    while let Some(callback) = self.inner.timers.pop_due(deadline) {
                        callback();
                    }
                    merge_err(&mut first_err, self.flush());
                }
                _ => break,
            }
        }
        clock.set_to(target);
        merge_err(&mut first_err, self.flush());
        first_err
    }

    /// Blocking settle: flush, wait out `delta` (advancing the test clock, or
    /// sleeping on the real one), fire due timers, flush again.
    pub fn settle(&self, delta: Duration) -> Result<(), BeaconError> {
        let mut first_err = Ok(());
        merge_err(&mut first_err, self.flush());
        let rest = match &self.inner.time {
            TimeSource::Test(_) => self.advance(delta),
            TimeSource::Real => {
                std::thread::sleep(delta);
                self.tick()
            }
        };
        merge_err(&mut first_err, rest);
        first_err
    }

    /// Drive the pool until `future` completes, draining the scheduler as
    /// graph work appears.
    ///
    /// # Panics
    ///
    /// Panics if called from inside the runtime's own executor.
    pub fn run_until<F: Future>(&self, future: F) -> F::Output {
        let mut pool = self
            .inner
            .pool
            .borrow_mut()
            .take()
            .expect("run_until called re-entrantly from inside the runtime's own executor");
        let out = pool.run_until(future);
        *self.inner.pool.borrow_mut() = Some(pool);
        self.inner.scheduler.drain();
        out
    }

    /// Spawn a task on the runtime's single-threaded pool. It progresses
    /// whenever the runtime is flushed.
    pub fn spawn_local(&self, future: impl Future<Output = ()> + 'static) {
        let _ = self.inner.spawner.spawn_local(future);
    }

    // ── Scheduler control ────────────────────────────────────────────

    /// Switch to synchronous draining: consumers re-run inside the
    /// triggering write. Deterministic, but feedback loops re-run
    /// immediately — intended for tests.
    pub fn use_sync(&self) {
        self.inner.scheduler.set_mode(SchedulerMode::Sync);
    }

    /// Switch back to the default async (coalescing) mode.
    pub fn use_async(&self) {
        self.inner.scheduler.set_mode(SchedulerMode::Async);
    }

    /// Current scheduler mode.
    #[must_use]
    pub fn scheduler_mode(&self) -> SchedulerMode {
        self.inner.scheduler.mode()
    }

    /// Replace the drain-arming action: instead of spawning a drain task the
    /// hook fires, and the host is expected to call [`Runtime::flush`] on its
    /// own cadence (e.g. once per rendered frame).
    pub fn set_scheduler(&self, hook: impl Fn() + 'static) {
        self.inner.scheduler.set_hook(Some(Box::new(hook)));
    }

    /// Remove a custom scheduler hook.
    pub fn clear_scheduler(&self) {
        self.inner.scheduler.set_hook(None);
    }

    // ── Time ─────────────────────────────────────────────────────────

    /// Current reading of the runtime's clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.inner.time.now()
    }

    /// Schedule a one-shot callback `delay` from now on the runtime's timer
    /// driver.
    pub fn schedule_after(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerHandle {
        let deadline = self.now() + delay;
        let id = self.inner.timers.schedule(deadline, Box::new(callback));
        TimerHandle::new(id, &self.inner.timers)
    }

    /// A future resolving once `delay` has passed on the runtime's clock.
    /// Composes with [`Runtime::advance`] on test-clock runtimes.
    pub fn delay(&self, delay: Duration) -> Delay {
        let state = Delay::make_state();
        let state2 = Rc::clone(&state);
        let timer = self.schedule_after(delay, move || Delay::fire(&state2));
        Delay::new(state, timer)
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Take the most recent graph error without flushing.
    pub fn take_error(&self) -> Option<BeaconError> {
        self.inner.last_error.borrow_mut().take()
    }

    /// Number of timers currently pending.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.pending()
    }

    // ── Internal plumbing ────────────────────────────────────────────

    fn pump_pool(&self) {
        let pool = self.inner.pool.borrow_mut().take();
        if let Some(mut pool) = pool {
            pool.run_until_stalled();
            *self.inner.pool.borrow_mut() = Some(pool);
        }
    }

    pub(crate) fn next_node_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    pub(crate) fn push_frame(&self, frame: Rc<Frame>) {
        self.inner.frames.borrow_mut().push(frame);
    }

    pub(crate) fn pop_frame(&self) {
        self.inner.frames.borrow_mut().pop();
    }

    pub(crate) fn current_frame(&self) -> Option<Rc<Frame>> {
        self.inner.frames.borrow().last().cloned()
    }

    pub(crate) fn is_untracked(&self) -> bool {
        self.inner.untracked_depth.get() > 0
    }

    pub(crate) fn in_batch(&self) -> bool {
        self.inner.batch_depth.get() > 0
    }

    /// Reject a write that would re-trigger the consumer performing it.
    ///
    /// Returns the error when the producer being written is in the current
    /// consumer's dependency set (held from the previous run, or recorded so
    /// far in this one); the frame is marked failed so the run's dependency
    /// registrations are rolled back.
    pub(crate) fn check_cycle(&self, producer: u64, producer_name: &str) -> Option<BeaconError> {
        let frame = self.current_frame()?;
        if frame.has_dep(producer) || frame.consumer.depends_on(producer) {
            frame.failed.set(true);
            let err = BeaconError::CircularDependency {
                name: producer_name.to_string(),
                consumer: frame.consumer.name().to_string(),
            };
            warn!(
                producer = producer_name,
                consumer = frame.consumer.name(),
                "circular write rejected"
            );
            return Some(err);
        }
        None
    }

    /// Park a graph error for the next `flush`/`take_error`. Keeps the first.
    pub(crate) fn record_error(&self, err: BeaconError) {
        let mut slot = self.inner.last_error.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Queue a producer's batch-exit notification, deduplicated by id.
    pub(crate) fn defer_batch_notify(&self, producer: u64, notify: Box<dyn Fn()>) {
        let mut pending = self.inner.batch_pending.borrow_mut();
        if pending.iter().any(|(id, _)| *id == producer) {
            return;
        }
        pending.push((producer, notify));
    }

    pub(crate) fn enqueue_consumer(&self, consumer: &Rc<ConsumerCore>) {
        self.inner.scheduler.enqueue(Rc::clone(consumer));
    }

    /// Enqueue and kick in one step.
    pub(crate) fn schedule_consumer(&self, consumer: &Rc<ConsumerCore>) {
        self.inner.scheduler.enqueue(Rc::clone(consumer));
        self.inner.scheduler.kick();
    }

    pub(crate) fn kick(&self) {
        self.inner.scheduler.kick();
    }

    /// Whether two handles drive the same graph.
    #[must_use]
    pub fn same_graph(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("mode", &self.inner.scheduler.mode())
            .field("batch_depth", &self.inner.batch_depth.get())
            .field("pending_timers", &self.inner.timers.pending())
            .finish()
    }
}

fn merge_err(first: &mut Result<(), BeaconError>, next: Result<(), BeaconError>) {
    if first.is_ok() {
        if let Err(err) = next {
            *first = Err(err);
        }
    }
}
