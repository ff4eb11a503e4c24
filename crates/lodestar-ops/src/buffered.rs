#![forbid(unsafe_code)]

//! Buffered cells: writes accumulate, snapshots commit.
//!
//! [`BufferedCount`] commits when the pending buffer reaches its capacity;
//! [`BufferedTime`] commits when a window elapses after the first write of a
//! batch. Until the first commit the cell is lazy — reads fail, matching any
//! other never-written cell.
//!
//! An initial value supplied at construction counts as the first buffered
//! item: `buffered_count_from(0, 3)` commits `[0, 1, 2]` after two writes.

use std::cell::RefCell;
use std::rc::Rc;

use web_time::Duration;

use lodestar_core::{Beacon, BeaconError, ProducerCore, Runtime, TimerHandle};

// ---------------------------------------------------------------------------
// BufferedCount
// ---------------------------------------------------------------------------

/// Commits a snapshot every `capacity` buffered writes.
///
/// Cloning the handle shares the same cell.
pub struct BufferedCount<T: Clone + 'static> {
    core: Rc<ProducerCore<Vec<T>>>,
    pending: Rc<RefCell<Vec<T>>>,
    seed: Option<T>,
    capacity: usize,
}

impl<T: Clone + 'static> Clone for BufferedCount<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            pending: Rc::clone(&self.pending),
            seed: self.seed.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone + 'static> BufferedCount<T> {
    pub(crate) fn create(
        rt: &Runtime,
        seed: Option<T>,
        capacity: usize,
        name: Option<String>,
    ) -> Self {
        let capacity = capacity.max(1);
        let core = ProducerCore::new(rt, "buffered_count", name, None);
        let pending = Rc::new(RefCell::new(
            seed.clone().map(|v| vec![v]).unwrap_or_default(),
        ));
        Self {
            core,
            pending,
            seed,
            capacity,
        }
    }

    /// Buffer one write; commits the snapshot when the buffer fills.
    pub fn add(&self, value: T) {
        if self.core.is_disposed() {
            return;
        }
        let snapshot = {
            let mut pending = self.pending.borrow_mut();
            pending.push(value);
            if pending.len() >= self.capacity {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        if let Some(snapshot) = snapshot {
            let _ = self.core.set_raw(snapshot);
        }
    }

    /// The writes buffered since the last commit.
    #[must_use]
    pub fn current_buffer(&self) -> Vec<T> {
        self.pending.borrow().clone()
    }

    /// Buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop the pending buffer (re-seeding the construction value) and
    /// restore the first committed snapshot, if any.
    pub fn reset(&self) -> Result<(), BeaconError> {
        *self.pending.borrow_mut() = self.seed.clone().map(|v| vec![v]).unwrap_or_default();
        if self.core.initial_value().is_some() {
            self.core.reset_raw()?;
        }
        Ok(())
    }
}

impl<T: Clone + 'static> Beacon<Vec<T>> for BufferedCount<T> {
    fn core(&self) -> &Rc<ProducerCore<Vec<T>>> {
        &self.core
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for BufferedCount<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedCount")
            .field("name", &self.core.name())
            .field("capacity", &self.capacity)
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// BufferedTime
// ---------------------------------------------------------------------------

/// Commits a snapshot `duration` after the first write of each batch.
///
/// Cloning the handle shares the same cell.
pub struct BufferedTime<T: Clone + 'static> {
    core: Rc<ProducerCore<Vec<T>>>,
    pending: Rc<RefCell<Vec<T>>>,
    timer: Rc<RefCell<Option<TimerHandle>>>,
    duration: Duration,
}

impl<T: Clone + 'static> Clone for BufferedTime<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            pending: Rc::clone(&self.pending),
            timer: Rc::clone(&self.timer),
            duration: self.duration,
        }
    }
}

impl<T: Clone + 'static> BufferedTime<T> {
    pub(crate) fn create(rt: &Runtime, duration: Duration, name: Option<String>) -> Self {
        let core = ProducerCore::new(rt, "buffered_time", name, None);
        let pending: Rc<RefCell<Vec<T>>> = Rc::new(RefCell::new(Vec::new()));
        let timer: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));

        {
            let timer = Rc::clone(&timer);
            let pending = Rc::clone(&pending);
            core.on_dispose(move || {
                if let Some(timer) = timer.borrow_mut().take() {
                    timer.cancel();
                }
                pending.borrow_mut().clear();
            });
        }

        Self {
            core,
            pending,
            timer,
            duration,
        }
    }

    /// Buffer one write; the first write of a batch arms the flush timer.
    pub fn add(&self, value: T) {
        if self.core.is_disposed() {
            return;
        }
        self.pending.borrow_mut().push(value);
        let mut timer = self.timer.borrow_mut();
        if timer.is_none() {
            let weak_core = Rc::downgrade(&self.core);
            let pending = Rc::clone(&self.pending);
            let timer_slot = Rc::clone(&self.timer);
            *timer = Some(self.core.runtime().schedule_after(self.duration, move || {
                timer_slot.borrow_mut().take();
                let snapshot = std::mem::take(&mut *pending.borrow_mut());
                if !snapshot.is_empty() {
                    if let Some(core) = weak_core.upgrade() {
                        let _ = core.set_raw(snapshot);
                    }
                }
            }));
        }
    }

    /// The writes buffered since the last flush.
    #[must_use]
    pub fn current_buffer(&self) -> Vec<T> {
        self.pending.borrow().clone()
    }

    /// The configured window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Drop the pending buffer, cancel the window timer, and restore the
    /// first committed snapshot, if any.
    pub fn reset(&self) -> Result<(), BeaconError> {
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.cancel();
        }
        self.pending.borrow_mut().clear();
        if self.core.initial_value().is_some() {
            self.core.reset_raw()?;
        }
        Ok(())
    }
}

impl<T: Clone + 'static> Beacon<Vec<T>> for BufferedTime<T> {
    fn core(&self) -> &Rc<ProducerCore<Vec<T>>> {
        &self.core
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for BufferedTime<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedTime")
            .field("name", &self.core.name())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
