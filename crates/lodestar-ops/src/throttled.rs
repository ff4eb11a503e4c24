#![forbid(unsafe_code)]

//! Throttled cells: at most one commit per window.
//!
//! While *open*, a write commits immediately and closes the gate for the
//! window. While *closed*, writes are either dropped (`drop_blocked`) or
//! queued FIFO; each window boundary commits the queue head and re-arms, and
//! the gate reopens one window after the queue empties.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use web_time::Duration;

use lodestar_core::{Beacon, BeaconError, ProducerCore, Runtime, TimerHandle, WritableBeacon};

/// A writable that lets at most one write through per window.
///
/// Cloning the handle shares the same cell.
pub struct Throttled<T: Clone + 'static> {
    core: Rc<ProducerCore<T>>,
    open: Rc<Cell<bool>>,
    queue: Rc<RefCell<VecDeque<(T, bool)>>>,
    timer: Rc<RefCell<Option<TimerHandle>>>,
    drop_blocked: bool,
    duration: Duration,
}

impl<T: Clone + 'static> Clone for Throttled<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            open: Rc::clone(&self.open),
            queue: Rc::clone(&self.queue),
            timer: Rc::clone(&self.timer),
            drop_blocked: self.drop_blocked,
            duration: self.duration,
        }
    }
}

/// Arm the window timer: each fire commits the queue head (staying closed),
/// or reopens the gate when the queue has drained.
fn arm_window<T: Clone + PartialEq + 'static>(
    core: &Rc<ProducerCore<T>>,
    open: &Rc<Cell<bool>>,
    queue: &Rc<RefCell<VecDeque<(T, bool)>>>,
    timer: &Rc<RefCell<Option<TimerHandle>>>,
    duration: Duration,
) {
    let weak_core: Weak<ProducerCore<T>> = Rc::downgrade(core);
    let open = Rc::clone(open);
    let queue = Rc::clone(queue);
    let timer_slot = Rc::clone(timer);
    let handle = core.runtime().schedule_after(duration, move || {
        timer_slot.borrow_mut().take();
        let next = queue.borrow_mut().pop_front();
        match next {
            Some((value, force)) => {
                if let Some(core) = weak_core.upgrade() {
                    let _ = core.set_gated(value, force);
                    arm_window(&core, &open, &queue, &timer_slot, duration);
                }
            }
            None => open.set(true),
        }
    });
    *timer.borrow_mut() = Some(handle);
}

impl<T: Clone + PartialEq + 'static> Throttled<T> {
    pub(crate) fn create(
        rt: &Runtime,
        initial: Option<T>,
        duration: Duration,
        drop_blocked: bool,
        name: Option<String>,
    ) -> Self {
        let core = ProducerCore::new(rt, "throttled", name, initial);
        let open = Rc::new(Cell::new(true));
        let queue: Rc<RefCell<VecDeque<(T, bool)>>> = Rc::new(RefCell::new(VecDeque::new()));
        let timer: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));

        {
            let timer = Rc::clone(&timer);
            let queue = Rc::clone(&queue);
            core.on_dispose(move || {
                if let Some(timer) = timer.borrow_mut().take() {
                    timer.cancel();
                }
                queue.borrow_mut().clear();
            });
        }

        Self {
            core,
            open,
            queue,
            timer,
            drop_blocked,
            duration,
        }
    }

    fn submit(&self, value: T, force: bool) {
        if self.core.is_disposed() {
            return;
        }
        if self.open.get() {
            self.open.set(false);
            let _ = self.core.set_gated(value, force);
            arm_window(&self.core, &self.open, &self.queue, &self.timer, self.duration);
        } else if !self.drop_blocked {
            self.queue.borrow_mut().push_back((value, force));
        }
        // drop_blocked while closed: the write is discarded.
    }

    /// Whether a write right now would commit immediately.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    /// Writes waiting for a window (always 0 with `drop_blocked`).
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// The configured window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl<T: Clone + 'static> Beacon<T> for Throttled<T> {
    fn core(&self) -> &Rc<ProducerCore<T>> {
        &self.core
    }
}

impl<T: Clone + PartialEq + 'static> WritableBeacon<T> for Throttled<T> {
    fn try_set(&self, value: T) -> Result<(), BeaconError> {
        self.submit(value, false);
        Ok(())
    }

    fn set_force(&self, value: T) {
        self.submit(value, true);
    }

    fn reset(&self) -> Result<(), BeaconError> {
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.cancel();
        }
        self.queue.borrow_mut().clear();
        self.open.set(true);
        self.core.reset_gated()
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Throttled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttled")
            .field("name", &self.core.name())
            .field("value", &self.core.peek())
            .field("open", &self.open.get())
            .field("queued", &self.queue.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::creator::OpsRuntimeExt;

    #[test]
    fn drop_blocked_discards_writes_in_window() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.throttled(0, Duration::from_millis(10), true);

        cell.set(1);
        cell.set(2);
        cell.set(3);
        assert_eq!(cell.peek(), 1, "first write passes, burst dropped");

        rt.advance(Duration::from_millis(11)).unwrap();
        cell.set(4);
        assert_eq!(cell.peek(), 4, "gate reopened after the window");
    }

    #[test]
    fn queued_writes_drain_one_per_window() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.throttled(0, Duration::from_millis(10), false);

        cell.set(1);
        cell.set(2);
        cell.set(3);
        assert_eq!(cell.peek(), 1);
        assert_eq!(cell.queued(), 2);

        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(cell.peek(), 2, "head of the queue at the window boundary");

        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(cell.peek(), 3);
        assert!(!cell.is_open(), "still closed for one more window");

        rt.advance(Duration::from_millis(10)).unwrap();
        assert!(cell.is_open(), "reopens one window after the queue drains");

        cell.set(9);
        assert_eq!(cell.peek(), 9);
    }

    #[test]
    fn writes_during_drain_join_the_queue() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.throttled(0, Duration::from_millis(10), false);

        cell.set(1);
        cell.set(2);
        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(cell.peek(), 2);

        cell.set(3);
        assert_eq!(cell.peek(), 2, "still closed");
        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(cell.peek(), 3);
    }

    #[test]
    fn reset_reopens_and_clears_queue() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.throttled(0, Duration::from_millis(10), false);
        cell.set(1);
        cell.set(2);

        cell.reset().unwrap();
        assert!(cell.is_open());
        assert_eq!(cell.queued(), 0);
        assert_eq!(cell.peek(), 0);
        assert_eq!(rt.pending_timers(), 0);
    }

    #[test]
    fn dispose_cancels_window_timer() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.throttled(0, Duration::from_millis(10), false);
        cell.set(1);
        cell.set(2);
        cell.dispose();
        rt.advance(Duration::from_millis(30)).unwrap();
        assert_eq!(cell.peek(), 0, "reset to initial, queue never drained");
        assert_eq!(rt.pending_timers(), 0);
    }
}
