#![forbid(unsafe_code)]

//! Time source and timer driver.
//!
//! The graph never reads wall-clock time directly. Everything time-based
//! (debounce, throttle, buffered-by-time, `next` timeouts) goes through the
//! runtime's [`TimeSource`] and schedules one-shot callbacks on the
//! [`TimerDriver`]. In production the source is the monotonic clock; in tests
//! a [`TestClock`] is advanced by hand, which makes every time-operator test
//! fully deterministic.
//!
//! # Invariants
//!
//! 1. `TestClock::now()` is monotonic: it only moves via `advance_raw` /
//!    `set_to`, never backwards.
//! 2. Timer callbacks fire in deadline order; ties fire in creation order.
//! 3. A cancelled timer never fires; cancellation is idempotent.
//! 4. `pop_due` never returns a callback whose deadline is in the future.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use web_time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Time source
// ---------------------------------------------------------------------------

/// Where the runtime reads "now" from.
#[derive(Debug, Clone)]
pub(crate) enum TimeSource {
    /// The real monotonic clock.
    Real,
    /// A manually advanced clock for deterministic tests.
    Test(TestClock),
}

impl TimeSource {
    pub(crate) fn now(&self) -> Instant {
        match self {
            Self::Real => Instant::now(),
            Self::Test(clock) => clock.now(),
        }
    }
}

/// A manually advanced clock for deterministic tests.
///
/// All cells created on a runtime built with [`Runtime::new_test`] read time
/// from the same `TestClock`. Prefer [`Runtime::advance`], which also fires
/// due timers and flushes the scheduler; `advance_raw` only moves the clock.
///
/// [`Runtime::new_test`]: crate::Runtime::new_test
/// [`Runtime::advance`]: crate::Runtime::advance
#[derive(Debug, Clone)]
pub struct TestClock {
    epoch: Instant,
    offset_us: Rc<Cell<u64>>,
}

impl TestClock {
    /// Create a clock frozen at the moment of construction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Rc::new(Cell::new(0)),
        }
    }

    /// Current test time.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.epoch + Duration::from_micros(self.offset_us.get())
    }

    /// Move the clock forward without firing timers.
    pub fn advance_raw(&self, delta: Duration) {
        let us = delta.as_micros().min(u128::from(u64::MAX)) as u64;
        self.offset_us.set(self.offset_us.get().saturating_add(us));
    }

    /// Jump the clock to `target`. Moves only forward.
    pub(crate) fn set_to(&self, target: Instant) {
        if let Some(ahead) = target.checked_duration_since(self.epoch) {
            let us = ahead.as_micros().min(u128::from(u64::MAX)) as u64;
            if us > self.offset_us.get() {
                self.offset_us.set(us);
            }
        }
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Timer driver
// ---------------------------------------------------------------------------

/// One-shot timer table: a deadline heap plus a callback map.
///
/// Cancellation removes the callback; the heap entry is skipped lazily the
/// next time it reaches the top.
pub(crate) struct TimerDriver {
    next_id: Cell<u64>,
    heap: RefCell<BinaryHeap<Reverse<(Instant, u64)>>>,
    callbacks: RefCell<AHashMap<u64, Box<dyn FnOnce()>>>,
}

impl TimerDriver {
    pub(crate) fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            heap: RefCell::new(BinaryHeap::new()),
            callbacks: RefCell::new(AHashMap::new()),
        }
    }

    /// Register a one-shot callback at `deadline`.
    pub(crate) fn schedule(&self, deadline: Instant, callback: Box<dyn FnOnce()>) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.heap.borrow_mut().push(Reverse((deadline, id)));
        self.callbacks.borrow_mut().insert(id, callback);
        id
    }

    /// Drop a pending timer. Returns `false` if it already fired or was
    /// cancelled.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        self.callbacks.borrow_mut().remove(&id).is_some()
    }

    /// Earliest deadline that still has a live callback.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let mut heap = self.heap.borrow_mut();
        let callbacks = self.callbacks.borrow();
        while let Some(&Reverse((deadline, id))) = heap.peek() {
            if callbacks.contains_key(&id) {
                return Some(deadline);
            }
            heap.pop();
        }
        None
    }

    /// Remove and return the next callback due at or before `now`.
    ///
    /// Returns one callback at a time so the caller can release all borrows
    /// before invoking it (callbacks may schedule further timers).
    pub(crate) fn pop_due(&self, now: Instant) -> Option<Box<dyn FnOnce()>> {
        loop {
            let id = {
                let mut heap = self.heap.borrow_mut();
                let &Reverse((deadline, id)) = heap.peek()?;
                if deadline > now {
                    return None;
                }
                heap.pop();
                id
            };
            if let Some(callback) = self.callbacks.borrow_mut().remove(&id) {
                return Some(callback);
            }
            // Cancelled entry: keep scanning.
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.callbacks.borrow().len()
    }
}

// ---------------------------------------------------------------------------
// Delay future
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct DelayState {
    elapsed: bool,
    waker: Option<std::task::Waker>,
}

/// Future that resolves once a runtime timer fires.
///
/// Built by [`Runtime::delay`](crate::Runtime::delay); on a test-clock
/// runtime it resolves when [`Runtime::advance`](crate::Runtime::advance)
/// crosses the deadline.
pub struct Delay {
    state: Rc<RefCell<DelayState>>,
    timer: TimerHandle,
}

impl Delay {
    pub(crate) fn new(state: Rc<RefCell<DelayState>>, timer: TimerHandle) -> Self {
        Self { state, timer }
    }

    pub(crate) fn make_state() -> Rc<RefCell<DelayState>> {
        Rc::new(RefCell::new(DelayState::default()))
    }

    pub(crate) fn fire(state: &Rc<RefCell<DelayState>>) {
        let mut state = state.borrow_mut();
        state.elapsed = true;
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }
}

impl std::future::Future for Delay {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<()> {
        let mut state = self.state.borrow_mut();
        if state.elapsed {
            std::task::Poll::Ready(())
        } else {
            state.waker = Some(cx.waker().clone());
            std::task::Poll::Pending
        }
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if !self.state.borrow().elapsed {
            self.timer.cancel();
        }
    }
}

/// Handle to a pending timer. Cancellation is idempotent.
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    driver: Weak<TimerDriver>,
}

impl TimerHandle {
    pub(crate) fn new(id: u64, driver: &Rc<TimerDriver>) -> Self {
        Self {
            id,
            driver: Rc::downgrade(driver),
        }
    }

    /// Cancel the timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        self.driver.upgrade().is_some_and(|d| d.cancel(self.id))
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle").field("id", &self.id).finish()
    }
}
