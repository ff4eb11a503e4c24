#![forbid(unsafe_code)]

//! Undo/redo cells: a writable with a bounded history ring.
//!
//! The initial value is history entry 0, with the cursor on it. Every
//! accepted write truncates the redo suffix, appends, and trims the ring to
//! the last `limit` entries. `undo`/`redo` move the cursor and re-commit the
//! entry under it; stepping past either end is a no-op.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use lodestar_core::{Beacon, BeaconError, ProducerCore, Runtime, WritableBeacon};

/// A writable with bounded undo/redo history.
///
/// Cloning the handle shares the same cell.
pub struct UndoRedo<T: Clone + 'static> {
    core: Rc<ProducerCore<T>>,
    history: Rc<RefCell<VecDeque<T>>>,
    cursor: Rc<Cell<usize>>,
    limit: usize,
}

impl<T: Clone + 'static> Clone for UndoRedo<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            history: Rc::clone(&self.history),
            cursor: Rc::clone(&self.cursor),
            limit: self.limit,
        }
    }
}

impl<T: Clone + PartialEq + 'static> UndoRedo<T> {
    pub(crate) fn create(rt: &Runtime, initial: T, limit: usize, name: Option<String>) -> Self {
        let limit = limit.max(1);
        let mut history = VecDeque::with_capacity(limit.min(64));
        history.push_back(initial.clone());
        Self {
            core: ProducerCore::new(rt, "undo_redo", name, Some(initial)),
            history: Rc::new(RefCell::new(history)),
            cursor: Rc::new(Cell::new(0)),
            limit,
        }
    }

    fn push_entry(&self, value: T) -> Result<(), BeaconError> {
        {
            let mut history = self.history.borrow_mut();
            history.truncate(self.cursor.get() + 1);
            history.push_back(value.clone());
            while history.len() > self.limit {
                history.pop_front();
            }
            self.cursor.set(history.len() - 1);
        }
        self.core.set_raw(value).map(|_| ())
    }

    /// Step one entry back. Returns `false` at the oldest entry.
    pub fn undo(&self) -> bool {
        let cursor = self.cursor.get();
        if cursor == 0 {
            return false;
        }
        self.cursor.set(cursor - 1);
        let value = self.history.borrow()[cursor - 1].clone();
        let _ = self.core.set_raw(value);
        true
    }

    /// Step one entry forward. Returns `false` at the newest entry.
    pub fn redo(&self) -> bool {
        let cursor = self.cursor.get();
        if cursor + 1 >= self.history.borrow().len() {
            return false;
        }
        self.cursor.set(cursor + 1);
        let value = self.history.borrow()[cursor + 1].clone();
        let _ = self.core.set_raw(value);
        true
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor.get() > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor.get() + 1 < self.history.borrow().len()
    }

    /// Snapshot of the history ring, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<T> {
        self.history.borrow().iter().cloned().collect()
    }

    /// Cursor position within [`history`](UndoRedo::history).
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor.get()
    }

    /// Configured ring size.
    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.limit
    }
}

impl<T: Clone + 'static> Beacon<T> for UndoRedo<T> {
    fn core(&self) -> &Rc<ProducerCore<T>> {
        &self.core
    }
}

impl<T: Clone + PartialEq + 'static> WritableBeacon<T> for UndoRedo<T> {
    fn try_set(&self, value: T) -> Result<(), BeaconError> {
        if self.core.with_value(|current| current == Some(&value)) {
            return Ok(());
        }
        self.push_entry(value)
    }

    fn set_force(&self, value: T) {
        let _ = self.push_entry(value);
    }

    /// Restore the initial value and collapse history back to it.
    fn reset(&self) -> Result<(), BeaconError> {
        let initial = self
            .core
            .initial_value()
            .ok_or_else(|| BeaconError::Uninitialized {
                name: self.core.name().to_string(),
            })?;
        {
            let mut history = self.history.borrow_mut();
            history.clear();
            history.push_back(initial.clone());
            self.cursor.set(0);
        }
        self.core.set_raw(initial).map(|_| ())
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for UndoRedo<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoRedo")
            .field("name", &self.core.name())
            .field("value", &self.core.peek())
            .field("cursor", &self.cursor.get())
            .field("history", &self.history.borrow().len())
            .finish()
    }
}
