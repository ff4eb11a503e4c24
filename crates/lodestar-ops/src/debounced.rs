#![forbid(unsafe_code)]

//! Debounced cells: writes settle for a quiet period before committing.
//!
//! Every write stores the pending value and re-arms the timer; when it
//! finally fires, the last pending value goes through the equality-gated
//! commit. Observers only ever see settled values.

use std::cell::RefCell;
use std::rc::Rc;

use web_time::Duration;

use lodestar_core::{Beacon, BeaconError, ProducerCore, Runtime, TimerHandle, WritableBeacon};

/// A writable whose commits trail the last write by a quiet period.
///
/// Cloning the handle shares the same cell.
pub struct Debounced<T: Clone + 'static> {
    core: Rc<ProducerCore<T>>,
    pending: Rc<RefCell<Option<(T, bool)>>>,
    timer: Rc<RefCell<Option<TimerHandle>>>,
    duration: Duration,
}

impl<T: Clone + 'static> Clone for Debounced<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            pending: Rc::clone(&self.pending),
            timer: Rc::clone(&self.timer),
            duration: self.duration,
        }
    }
}

impl<T: Clone + PartialEq + 'static> Debounced<T> {
    pub(crate) fn create(
        rt: &Runtime,
        initial: Option<T>,
        duration: Duration,
        name: Option<String>,
    ) -> Self {
        let core = ProducerCore::new(rt, "debounced", name, initial);
        let pending: Rc<RefCell<Option<(T, bool)>>> = Rc::new(RefCell::new(None));
        let timer: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));

        {
            let timer = Rc::clone(&timer);
            let pending = Rc::clone(&pending);
            core.on_dispose(move || {
                if let Some(timer) = timer.borrow_mut().take() {
                    timer.cancel();
                }
                pending.borrow_mut().take();
            });
        }

        Self {
            core,
            pending,
            timer,
            duration,
        }
    }

    fn submit(&self, value: T, force: bool) {
        if self.core.is_disposed() {
            return;
        }
        *self.pending.borrow_mut() = Some((value, force));
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.cancel();
        }
        let weak_core = Rc::downgrade(&self.core);
        let pending = Rc::clone(&self.pending);
        let timer_slot = Rc::clone(&self.timer);
        let handle = self.core.runtime().schedule_after(self.duration, move || {
            timer_slot.borrow_mut().take();
            if let Some((value, force)) = pending.borrow_mut().take() {
                if let Some(core) = weak_core.upgrade() {
                    let _ = core.set_gated(value, force);
                }
            }
        });
        *self.timer.borrow_mut() = Some(handle);
    }

    /// The write waiting out its quiet period, if any.
    #[must_use]
    pub fn pending_value(&self) -> Option<T> {
        self.pending.borrow().as_ref().map(|(value, _)| value.clone())
    }

    /// The configured quiet period.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl<T: Clone + 'static> Beacon<T> for Debounced<T> {
    fn core(&self) -> &Rc<ProducerCore<T>> {
        &self.core
    }
}

impl<T: Clone + PartialEq + 'static> WritableBeacon<T> for Debounced<T> {
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
        self.pending.borrow_mut().take();
        self.core.reset_gated()
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Debounced<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debounced")
            .field("name", &self.core.name())
            .field("value", &self.core.peek())
            .field("pending", &self.pending.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use lodestar_core::SubscribeOptions;

    use crate::creator::OpsRuntimeExt;

    #[test]
    fn commits_last_write_after_quiet_period() {
        let (rt, _clock) = Runtime::new_test();
        let query = rt.debounced(String::new(), Duration::from_millis(10));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = query.subscribe_with(
            move |v: &String| seen2.borrow_mut().push(v.clone()),
            SubscribeOptions::new().with_start_now(false),
        );

        query.set("a".into());
        rt.advance(Duration::from_millis(1)).unwrap();
        query.set("ap".into());
        rt.advance(Duration::from_millis(1)).unwrap();
        query.set("apple".into());

        assert_eq!(query.peek(), "", "nothing commits during the burst");
        rt.advance(Duration::from_millis(15)).unwrap();

        assert_eq!(query.peek(), "apple");
        assert_eq!(*seen.borrow(), vec!["apple".to_string()]);
    }

    #[test]
    fn each_write_rearms_the_timer() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.debounced(0, Duration::from_millis(10));

        cell.set(1);
        rt.advance(Duration::from_millis(9)).unwrap();
        cell.set(2);
        rt.advance(Duration::from_millis(9)).unwrap();
        assert_eq!(cell.peek(), 0, "timer restarted by the second write");

        rt.advance(Duration::from_millis(1)).unwrap();
        assert_eq!(cell.peek(), 2);
    }

    #[test]
    fn pending_value_is_inspectable() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.debounced(0, Duration::from_millis(10));
        assert_eq!(cell.pending_value(), None);
        cell.set(3);
        assert_eq!(cell.pending_value(), Some(3));
        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(cell.pending_value(), None);
    }

    #[test]
    fn equality_gate_applies_at_commit_time() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.debounced(5, Duration::from_millis(10));
        let hits = Rc::new(RefCell::new(0u32));
        let h = Rc::clone(&hits);
        let _sub = cell.subscribe_with(
            move |_: &i32| *h.borrow_mut() += 1,
            SubscribeOptions::new().with_start_now(false),
        );

        cell.set(5);
        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(*hits.borrow(), 0, "settled value equal to current: no-op");

        cell.set_force(5);
        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn dispose_cancels_pending_timer() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.debounced(0, Duration::from_millis(10));
        cell.set(9);
        cell.dispose();
        rt.advance(Duration::from_millis(20)).unwrap();
        assert_eq!(cell.peek(), 0);
        assert_eq!(rt.pending_timers(), 0);
    }
}
