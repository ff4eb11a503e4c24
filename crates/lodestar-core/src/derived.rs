#![forbid(unsafe_code)]

//! Derived cells: values computed from other cells.
//!
//! A derived cell pairs a [`ProducerCore`] (the value downstream observers
//! see) with a [`ConsumerCore`] (the compute run under tracking). Reads made
//! by the compute become the dependency set; whenever one of them changes the
//! compute re-runs and the produced value is pushed to listeners.
//!
//! # Sleep
//!
//! With `should_sleep` (the default), a derived cell whose listener count
//! drops to zero releases its dependency subscriptions and discards its
//! value. The next read or subscription wakes it: the compute re-runs with
//! fresh tracking. A derived cell starts awake — the compute runs eagerly at
//! creation.
//!
//! # Invariants
//!
//! 1. No observer ever sees a stale value: reads pull a pending recompute
//!    inline, ahead of the scheduler.
//! 2. In dynamic mode (`support_conditional`, the default) the dependency
//!    set after a run is exactly the set of producers read during that run.
//! 3. In static mode the first run fixes the dependency set; producers first
//!    read in later runs do not re-trigger the compute.

use std::cell::Cell;
use std::rc::Rc;

use crate::beacon::Beacon;
use crate::consumer::{ConsumerCore, TrackMode};
use crate::producer::ProducerCore;
use crate::runtime::Runtime;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Creation options for [`Derived`] cells.
#[derive(Debug, Clone)]
pub struct DerivedOptions {
    pub(crate) name: Option<String>,
    pub(crate) should_sleep: bool,
    pub(crate) support_conditional: bool,
}

impl Default for DerivedOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivedOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            should_sleep: true,
            support_conditional: true,
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Keep computing while unwatched (`false`) or sleep at zero listeners
    /// (`true`, default).
    #[must_use]
    pub fn with_sleep(mut self, should_sleep: bool) -> Self {
        self.should_sleep = should_sleep;
        self
    }

    /// Re-track dependencies on every run (`true`, default) or only on the
    /// first (`false`; cheaper, but never discovers new branches).
    #[must_use]
    pub fn with_conditional(mut self, support_conditional: bool) -> Self {
        self.support_conditional = support_conditional;
        self
    }
}

// ---------------------------------------------------------------------------
// Derived
// ---------------------------------------------------------------------------

/// A cell whose value is a pure function of other cells.
///
/// Cloning the handle shares the same cell.
pub struct Derived<T: 'static> {
    core: Rc<ProducerCore<T>>,
    consumer: Rc<ConsumerCore>,
    sleeping: Rc<Cell<bool>>,
}

impl<T: 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            consumer: Rc::clone(&self.consumer),
            sleeping: Rc::clone(&self.sleeping),
        }
    }
}

impl<T: Clone + 'static> Derived<T> {
    pub(crate) fn create<F>(rt: &Runtime, options: DerivedOptions, mut compute: F) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        let core = ProducerCore::new(rt, "derived", options.name.clone(), None);
        let sleeping = Rc::new(Cell::new(false));

        let body_core = Rc::clone(&core);
        let mode = if options.support_conditional {
            TrackMode::Dynamic
        } else {
            TrackMode::Static
        };
        let consumer = ConsumerCore::new(
            rt,
            "derived",
            Some(core.name().to_string()),
            mode,
            move || {
                let value = compute();
                let _ = body_core.set_raw(value);
            },
        );

        if options.should_sleep {
            let weak_consumer = Rc::downgrade(&consumer);
            let weak_core = Rc::downgrade(&core);
            let sleep_flag = Rc::clone(&sleeping);
            core.set_listeners_changed(move |count| {
                if count == 0 && !sleep_flag.get() {
                    sleep_flag.set(true);
                    if let Some(consumer) = weak_consumer.upgrade() {
                        consumer.clear_deps();
                    }
                    if let Some(core) = weak_core.upgrade() {
                        core.clear_value();
                    }
                }
            });
        }

        // Disposing the cell tears down the compute consumer with it.
        {
            let weak_consumer = Rc::downgrade(&consumer);
            core.on_dispose(move || {
                if let Some(consumer) = weak_consumer.upgrade() {
                    consumer.dispose();
                }
            });
        }

        consumer.run();
        Self {
            core,
            consumer,
            sleeping,
        }
    }

    /// Whether the cell is currently sleeping (unwatched, value discarded).
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.sleeping.get()
    }
}

impl<T: Clone + 'static> Beacon<T> for Derived<T> {
    fn core(&self) -> &Rc<ProducerCore<T>> {
        &self.core
    }

    /// Wake from sleep, or pull a pending recompute ahead of the scheduler.
    fn refresh(&self) {
        if self.core.is_disposed() {
            return;
        }
        if self.sleeping.get() {
            self.sleeping.set(false);
            self.consumer.run();
        } else if self.consumer.is_stale() {
            self.consumer.run();
        }
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("name", &self.core.name())
            .field("value", &self.core.peek())
            .field("sleeping", &self.sleeping.get())
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

    use crate::beacon::WritableBeacon;
    use crate::subscription::SubscribeOptions;

    fn sync_runtime() -> Runtime {
        let (rt, _clock) = Runtime::new_test();
        rt.use_sync();
        rt
    }

    #[test]
    fn computes_eagerly_and_tracks() {
        let rt = sync_runtime();
        let base = rt.writable(10);
        let doubled = {
            let base = base.clone();
            rt.derived(move || base.get() * 2)
        };
        assert_eq!(doubled.peek(), 20);

        base.set(15);
        assert_eq!(doubled.peek(), 30);
    }

    #[test]
    fn chained_derivations_propagate() {
        let rt = sync_runtime();
        let base = rt.writable(1);
        let plus_one = {
            let base = base.clone();
            rt.derived(move || base.get() + 1)
        };
        let squared = {
            let plus_one = plus_one.clone();
            rt.derived(move || {
                let v = plus_one.get();
                v * v
            })
        };
        assert_eq!(squared.peek(), 4);
        base.set(3);
        assert_eq!(squared.peek(), 16);
    }

    #[test]
    fn diamond_runs_join_once_per_flush() {
        let (rt, _clock) = Runtime::new_test();
        let a = rt.writable(1);
        let b = {
            let a = a.clone();
            rt.derived(move || a.get() + 1)
        };
        let c = {
            let a = a.clone();
            rt.derived(move || a.get() * 2)
        };
        let join_runs = Rc::new(RefCell::new(0u32));
        let join = {
            let b = b.clone();
            let c = c.clone();
            let runs = Rc::clone(&join_runs);
            rt.derived(move || {
                *runs.borrow_mut() += 1;
                b.get() + c.get()
            })
        };

        rt.flush().unwrap();
        assert_eq!(join.peek(), 4);
        let runs_before = *join_runs.borrow();

        a.set(5);
        rt.flush().unwrap();
        assert_eq!(join.peek(), 16);
        assert_eq!(
            *join_runs.borrow() - runs_before,
            1,
            "join recomputes once per flush"
        );
    }

    #[test]
    fn conditional_dependencies_follow_control_flow() {
        let rt = sync_runtime();
        let gate = rt.writable(true);
        let left = rt.writable_named(1, "left");
        let right = rt.writable_named(2, "right");
        let picked = {
            let gate = gate.clone();
            let left = left.clone();
            let right = right.clone();
            rt.derived(move || if gate.get() { left.get() } else { right.get() })
        };

        assert_eq!(picked.peek(), 1);
        assert_eq!(left.listeners_count(), 1);
        assert_eq!(right.listeners_count(), 0, "unselected branch untracked");

        gate.set(false);
        assert_eq!(picked.peek(), 2);
        assert_eq!(left.listeners_count(), 0, "dropped after branch switch");
        assert_eq!(right.listeners_count(), 1);
    }

    #[test]
    fn static_mode_keeps_first_run_dependencies() {
        let rt = sync_runtime();
        let gate = rt.writable(true);
        let left = rt.writable(1);
        let right = rt.writable(2);
        let picked = {
            let gate = gate.clone();
            let left = left.clone();
            let right = right.clone();
            rt.derived_with(DerivedOptions::new().with_conditional(false), move || {
                if gate.get() {
                    left.get()
                } else {
                    right.get()
                }
            })
        };

        gate.set(false);
        assert_eq!(picked.peek(), 2);
        // `right` was first read in the second run; static mode never
        // subscribed to it, so its writes do not re-trigger the compute.
        right.set(9);
        assert_eq!(picked.peek(), 2);
    }

    #[test]
    fn sleeps_at_zero_listeners_and_wakes_on_read() {
        let rt = sync_runtime();
        let base = rt.writable(1);
        let compute_runs = Rc::new(RefCell::new(0u32));
        let doubled = {
            let base = base.clone();
            let runs = Rc::clone(&compute_runs);
            rt.derived(move || {
                *runs.borrow_mut() += 1;
                base.get() * 2
            })
        };

        let sub = doubled.subscribe(|_| {});
        sub.dispose();
        assert!(doubled.is_sleeping());

        let runs_asleep = *compute_runs.borrow();
        base.set(2);
        base.set(3);
        assert_eq!(
            *compute_runs.borrow(),
            runs_asleep,
            "no recompute while asleep"
        );

        assert_eq!(doubled.peek(), 6, "wake recomputes with the latest value");
        assert_eq!(*compute_runs.borrow(), runs_asleep + 1);
        assert!(!doubled.is_sleeping());
    }

    #[test]
    fn sleepless_derived_keeps_computing() {
        let rt = sync_runtime();
        let base = rt.writable(1);
        let compute_runs = Rc::new(RefCell::new(0u32));
        let doubled = {
            let base = base.clone();
            let runs = Rc::clone(&compute_runs);
            rt.derived_with(DerivedOptions::new().with_sleep(false), move || {
                *runs.borrow_mut() += 1;
                base.get() * 2
            })
        };

        let sub = doubled.subscribe(|_| {});
        sub.dispose();

        let before = *compute_runs.borrow();
        base.set(2);
        assert_eq!(*compute_runs.borrow(), before + 1);
    }

    #[test]
    fn subscribers_observe_recomputed_values() {
        let (rt, _clock) = Runtime::new_test();
        let base = rt.writable(1);
        let doubled = {
            let base = base.clone();
            rt.derived(move || base.get() * 2)
        };
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let _sub = doubled.subscribe_with(
            move |v| seen2.borrow_mut().push(*v),
            SubscribeOptions::new().with_start_now(false),
        );

        base.set(2);
        base.set(3);
        rt.flush().unwrap();
        assert_eq!(*seen.borrow(), vec![6]);
    }

    #[test]
    fn dispose_tears_down_compute() {
        let rt = sync_runtime();
        let base = rt.writable(1);
        let compute_runs = Rc::new(RefCell::new(0u32));
        let doubled = {
            let base = base.clone();
            let runs = Rc::clone(&compute_runs);
            rt.derived(move || {
                *runs.borrow_mut() += 1;
                base.get() * 2
            })
        };

        doubled.dispose();
        let before = *compute_runs.borrow();
        base.set(7);
        assert_eq!(*compute_runs.borrow(), before);
        assert_eq!(base.listeners_count(), 0);
    }

    #[test]
    fn untracked_reads_are_not_dependencies() {
        let rt = sync_runtime();
        let tracked = rt.writable(1);
        let ignored = rt.writable(100);
        let sum = {
            let tracked = tracked.clone();
            let ignored = ignored.clone();
            let rt2 = rt.clone();
            rt.derived(move || tracked.get() + rt2.untracked(|| ignored.get()))
        };

        assert_eq!(sum.peek(), 101);
        ignored.set(200);
        assert_eq!(sum.peek(), 101, "untracked dependency does not re-trigger");
        tracked.set(2);
        assert_eq!(sum.peek(), 202, "recompute picks up the untracked value");
    }
}
