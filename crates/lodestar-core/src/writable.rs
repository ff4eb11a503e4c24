#![forbid(unsafe_code)]

//! Writable cells: externally written, equality-gated producers.
//!
//! # Invariants
//!
//! 1. `set(v)` where `v == peek()` is a no-op: no notification, no
//!    `previous` update. `set_force` bypasses the gate.
//! 2. The first accepted write captures the value as `initial` and
//!    `previous` and flips `is_empty` to false, once.
//! 3. Writes mutate immediately even inside a batch; only the notification
//!    is deferred. After `batch(|| { set(1); set(2); set(3) })` a reader of
//!    `previous()` sees `2` in both scheduler modes.

use std::rc::Rc;

use crate::beacon::{Beacon, WritableBeacon};
use crate::error::BeaconError;
use crate::producer::ProducerCore;
use crate::runtime::Runtime;

/// An externally written, equality-gated cell.
///
/// Cloning the handle shares the same cell.
pub struct Writable<T: 'static> {
    core: Rc<ProducerCore<T>>,
}

impl<T: 'static> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Writable<T> {
    pub(crate) fn create(rt: &Runtime, initial: Option<T>, name: Option<String>) -> Self {
        Self {
            core: ProducerCore::new(rt, "writable", name, initial),
        }
    }

    /// Derive the next value from the current one. `LazyRead` if the cell is
    /// still empty.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), BeaconError> {
        let current = self.core.try_peek()?;
        self.try_set(f(&current))
    }
}

impl Writable<bool> {
    /// Flip the held boolean.
    pub fn toggle(&self) -> Result<(), BeaconError> {
        self.update(|value| !value)
    }
}

impl<T: Clone + 'static> Beacon<T> for Writable<T> {
    fn core(&self) -> &Rc<ProducerCore<T>> {
        &self.core
    }
}

impl<T: Clone + PartialEq + 'static> WritableBeacon<T> for Writable<T> {
    fn try_set(&self, value: T) -> Result<(), BeaconError> {
        self.core.set_gated(value, false).map(|_| ())
    }

    fn set_force(&self, value: T) {
        let _ = self.core.set_gated(value, true);
    }

    fn reset(&self) -> Result<(), BeaconError> {
        self.core.reset_gated()
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writable")
            .field("name", &self.core.name())
            .field("value", &self.core.peek())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::subscription::SubscribeOptions;

    fn sync_runtime() -> Runtime {
        let (rt, _clock) = Runtime::new_test();
        rt.use_sync();
        rt
    }

    #[test]
    fn set_and_peek() {
        let rt = sync_runtime();
        let cell = rt.writable(1);
        assert_eq!(cell.peek(), 1);
        cell.set(2);
        assert_eq!(cell.peek(), 2);
        assert_eq!(cell.previous(), Some(1));
        assert_eq!(cell.initial_value(), Some(1));
    }

    #[test]
    fn equality_gate_suppresses_notification() {
        let rt = sync_runtime();
        let cell = rt.writable(5);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe_with(
            move |v| seen2.borrow_mut().push(*v),
            SubscribeOptions::new().with_start_now(false),
        );

        cell.set(5);
        rt.flush().unwrap();
        assert!(seen.borrow().is_empty());

        cell.set_force(5);
        rt.flush().unwrap();
        assert_eq!(*seen.borrow(), vec![5]);
    }

    #[test]
    fn previous_is_untouched_by_rejected_write() {
        let rt = sync_runtime();
        let cell = rt.writable(1);
        cell.set(2);
        cell.set(2);
        assert_eq!(cell.previous(), Some(1));
    }

    #[test]
    fn lazy_cell_fails_reads_until_first_set() {
        let rt = sync_runtime();
        let cell = rt.lazy_writable_named::<i32>("pending");
        assert!(cell.is_empty());
        assert!(matches!(
            cell.try_get(),
            Err(BeaconError::LazyRead { name }) if name == "pending"
        ));

        cell.set(7);
        assert!(!cell.is_empty());
        assert_eq!(cell.try_get().unwrap(), 7);
        assert_eq!(cell.initial_value(), Some(7));
        assert_eq!(cell.previous(), Some(7));
    }

    #[test]
    fn reset_restores_initial() {
        let rt = sync_runtime();
        let cell = rt.writable(10);
        cell.set(99);
        cell.reset().unwrap();
        assert_eq!(cell.peek(), 10);
    }

    #[test]
    fn reset_on_never_written_lazy_fails() {
        let rt = sync_runtime();
        let cell = rt.lazy_writable::<u8>();
        assert!(matches!(
            cell.reset(),
            Err(BeaconError::Uninitialized { .. })
        ));
    }

    #[test]
    fn update_and_toggle() {
        let rt = sync_runtime();
        let count = rt.writable(3);
        count.update(|n| n * 2).unwrap();
        assert_eq!(count.peek(), 6);

        let flag = rt.writable(false);
        flag.toggle().unwrap();
        assert!(flag.peek());
        flag.toggle().unwrap();
        assert!(!flag.peek());
    }

    #[test]
    fn batch_coalesces_to_one_notification() {
        let rt = sync_runtime();
        let cell = rt.writable(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe_with(
            move |v| seen2.borrow_mut().push(*v),
            SubscribeOptions::new().with_start_now(false),
        );

        rt.batch(|| {
            cell.set(1);
            cell.set(2);
            cell.set(3);
            // Values are visible immediately inside the batch.
            assert_eq!(cell.peek(), 3);
        });
        rt.flush().unwrap();

        assert_eq!(*seen.borrow(), vec![3]);
        assert_eq!(cell.previous(), Some(2));
    }

    #[test]
    fn deferred_mode_coalesces_synchronous_writes() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe_with(
            move |v| seen2.borrow_mut().push(*v),
            SubscribeOptions::new().with_start_now(false),
        );

        cell.set(1);
        cell.set(2);
        cell.set(3);
        assert!(seen.borrow().is_empty(), "nothing delivered before flush");

        rt.flush().unwrap();
        assert_eq!(*seen.borrow(), vec![3]);
    }

    #[test]
    fn synchronous_subscription_sees_every_accepted_write() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe_with(
            move |v| seen2.borrow_mut().push(*v),
            SubscribeOptions::inline(),
        );

        cell.set(1);
        cell.set(1);
        cell.set(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn start_now_delivers_current_value() {
        let rt = sync_runtime();
        let cell = rt.writable(42);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe(move |v| seen2.borrow_mut().push(*v));
        assert_eq!(*seen.borrow(), vec![42]);
    }

    #[test]
    fn start_now_skips_empty_cell() {
        let rt = sync_runtime();
        let cell = rt.lazy_writable::<i32>();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe(move |v| seen2.borrow_mut().push(*v));
        assert!(seen.borrow().is_empty());
        cell.set(1);
        rt.flush().unwrap();
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn unsubscribed_callback_stops_firing() {
        let rt = sync_runtime();
        let cell = rt.writable(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let sub = cell.subscribe_with(
            move |v| seen2.borrow_mut().push(*v),
            SubscribeOptions::new().with_start_now(false),
        );

        cell.set(1);
        rt.flush().unwrap();
        sub.dispose();
        sub.dispose(); // idempotent
        cell.set(2);
        rt.flush().unwrap();

        assert_eq!(*seen.borrow(), vec![1]);
        assert_eq!(cell.listeners_count(), 0);
    }

    #[test]
    fn dropping_guard_unsubscribes() {
        let rt = sync_runtime();
        let cell = rt.writable(0);
        {
            let _sub = cell.subscribe(|_| {});
            assert_eq!(cell.listeners_count(), 1);
        }
        assert_eq!(cell.listeners_count(), 0);
    }

    #[test]
    fn same_callback_twice_gets_two_registrations() {
        let rt = sync_runtime();
        let cell = rt.writable(0);
        let hits = Rc::new(RefCell::new(0u32));
        let h1 = Rc::clone(&hits);
        let h2 = Rc::clone(&hits);
        let _a = cell.subscribe_with(
            move |_| *h1.borrow_mut() += 1,
            SubscribeOptions::new().with_start_now(false),
        );
        let _b = cell.subscribe_with(
            move |_| *h2.borrow_mut() += 1,
            SubscribeOptions::new().with_start_now(false),
        );
        assert_eq!(cell.listeners_count(), 2);
        cell.set(1);
        rt.flush().unwrap();
        assert_eq!(*hits.borrow(), 2);
    }

    #[test]
    fn untracked_write_mutates_silently() {
        let rt = sync_runtime();
        let cell = rt.writable(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = cell.subscribe_with(
            move |v| seen2.borrow_mut().push(*v),
            SubscribeOptions::new().with_start_now(false),
        );

        rt.untracked(|| cell.set(9));
        rt.flush().unwrap();
        assert_eq!(cell.peek(), 9);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn dispose_is_idempotent_and_silences_writes() {
        let rt = sync_runtime();
        let cell = rt.writable(1);
        cell.set(2);
        let hits = Rc::new(RefCell::new(0u32));
        let h = Rc::clone(&hits);
        let _sub = cell.subscribe_with(
            move |_| *h.borrow_mut() += 1,
            SubscribeOptions::new().with_start_now(false),
        );

        cell.dispose();
        cell.dispose();
        assert!(cell.is_disposed());
        assert_eq!(cell.listeners_count(), 0);
        // Value restored to initial.
        assert_eq!(cell.peek(), 1);

        cell.set(5);
        rt.flush().unwrap();
        assert_eq!(cell.peek(), 1, "writes after dispose are ignored");
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn on_dispose_hooks_run_once_in_order() {
        let rt = sync_runtime();
        let cell = rt.writable(0);
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        let o2 = Rc::clone(&order);
        cell.on_dispose(move || o1.borrow_mut().push("a"));
        cell.on_dispose(move || o2.borrow_mut().push("b"));
        cell.dispose();
        cell.dispose();
        assert_eq!(*order.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn with_reads_by_reference() {
        let rt = sync_runtime();
        let cell = rt.writable(vec![1, 2, 3]);
        let sum: i32 = cell.with(|v| v.iter().sum()).unwrap();
        assert_eq!(sum, 6);
    }
}
