#![forbid(unsafe_code)]

//! Filtered cells: a predicate guards every write.
//!
//! A write is accepted iff `predicate(previous, next)` holds, or the cell is
//! still empty (the first write always passes), or the write is forced. The
//! predicate is replaceable after construction.

use std::cell::RefCell;
use std::rc::Rc;

use lodestar_core::{Beacon, BeaconError, ProducerCore, Runtime, WritableBeacon};

type Predicate<T> = Box<dyn FnMut(Option<&T>, &T) -> bool>;

/// A writable guarded by a mutable predicate.
///
/// Cloning the handle shares the same cell.
pub struct Filtered<T: Clone + 'static> {
    core: Rc<ProducerCore<T>>,
    predicate: Rc<RefCell<Predicate<T>>>,
}

impl<T: Clone + 'static> Clone for Filtered<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            predicate: Rc::clone(&self.predicate),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Filtered<T> {
    pub(crate) fn create(
        rt: &Runtime,
        initial: Option<T>,
        predicate: impl FnMut(Option<&T>, &T) -> bool + 'static,
        name: Option<String>,
    ) -> Self {
        Self {
            core: ProducerCore::new(rt, "filtered", name, initial),
            predicate: Rc::new(RefCell::new(Box::new(predicate))),
        }
    }

    /// Replace the predicate. Applies to all subsequent writes.
    pub fn set_filter(&self, predicate: impl FnMut(Option<&T>, &T) -> bool + 'static) {
        *self.predicate.borrow_mut() = Box::new(predicate);
    }
}

impl<T: Clone + 'static> Beacon<T> for Filtered<T> {
    fn core(&self) -> &Rc<ProducerCore<T>> {
        &self.core
    }
}

impl<T: Clone + PartialEq + 'static> WritableBeacon<T> for Filtered<T> {
    fn try_set(&self, value: T) -> Result<(), BeaconError> {
        let accepted = if self.core.is_empty() {
            true
        } else {
            let previous = self.core.peek();
            (self.predicate.borrow_mut())(previous.as_ref(), &value)
        };
        if accepted {
            self.core.set_gated(value, false).map(|_| ())
        } else {
            Ok(())
        }
    }

    fn set_force(&self, value: T) {
        let _ = self.core.set_gated(value, true);
    }

    fn reset(&self) -> Result<(), BeaconError> {
        self.core.reset_gated()
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Filtered<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filtered")
            .field("name", &self.core.name())
            .field("value", &self.core.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::creator::OpsRuntimeExt;

    #[test]
    fn predicate_gates_writes() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.filtered(0, |_prev, next| *next % 2 == 0);

        cell.set(1);
        assert_eq!(cell.peek(), 0, "odd rejected");
        cell.set(4);
        assert_eq!(cell.peek(), 4);
    }

    #[test]
    fn first_write_always_passes_on_lazy_cell() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.filtered_lazy(|_prev, next: &i32| *next > 100);

        cell.set(1);
        assert_eq!(cell.peek(), 1, "first write bypasses the predicate");
        cell.set(2);
        assert_eq!(cell.peek(), 1, "second write is filtered");
        cell.set(200);
        assert_eq!(cell.peek(), 200);
    }

    #[test]
    fn force_bypasses_the_predicate() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.filtered(0, |_, _| false);
        cell.set(5);
        assert_eq!(cell.peek(), 0);
        cell.set_force(5);
        assert_eq!(cell.peek(), 5);
    }

    #[test]
    fn predicate_sees_previous_value() {
        let (rt, _clock) = Runtime::new_test();
        // Monotonic gate: only increasing values pass.
        let cell = rt.filtered(0, |prev, next| prev.is_none_or(|p| next > p));
        cell.set(5);
        cell.set(3);
        cell.set(7);
        assert_eq!(cell.peek(), 7);
    }

    #[test]
    fn filter_is_replaceable() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.filtered(0, |_, _| false);
        cell.set(1);
        assert_eq!(cell.peek(), 0);

        cell.set_filter(|_, _| true);
        cell.set(1);
        assert_eq!(cell.peek(), 1);
    }
}
