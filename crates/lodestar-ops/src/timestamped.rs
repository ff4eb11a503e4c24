#![forbid(unsafe_code)]

//! Timestamped cells: every accepted value is paired with the clock reading
//! at acceptance. The clock is the runtime's, so test-clock runtimes get
//! fully deterministic stamps.

use std::rc::Rc;

use web_time::Instant;

use lodestar_core::{Beacon, BeaconError, ProducerCore, Runtime};

/// A writable whose value carries its acceptance time.
///
/// Cloning the handle shares the same cell.
pub struct Timestamped<T: Clone + 'static> {
    core: Rc<ProducerCore<(T, Instant)>>,
}

impl<T: Clone + 'static> Clone for Timestamped<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> Timestamped<T> {
    pub(crate) fn create(rt: &Runtime, initial: Option<T>, name: Option<String>) -> Self {
        let stamped = initial.map(|value| (value, rt.now()));
        Self {
            core: ProducerCore::new(rt, "timestamped", name, stamped),
        }
    }

    /// Accept `value`, stamped with the current clock reading.
    pub fn set(&self, value: T) {
        let now = self.core.runtime().now();
        let _ = self.core.set_raw((value, now));
    }

    /// The held value without its stamp. `LazyRead` while empty.
    pub fn value(&self) -> Result<T, BeaconError> {
        self.core.try_peek().map(|(value, _)| value)
    }

    /// The stamp of the held value. `LazyRead` while empty.
    pub fn timestamp(&self) -> Result<Instant, BeaconError> {
        self.core.try_peek().map(|(_, stamp)| stamp)
    }

    /// Re-stamp and restore the initial value.
    pub fn reset(&self) -> Result<(), BeaconError> {
        let (value, _) = self
            .core
            .initial_value()
            .ok_or_else(|| BeaconError::Uninitialized {
                name: self.core.name().to_string(),
            })?;
        self.set(value);
        Ok(())
    }
}

impl<T: Clone + 'static> Beacon<(T, Instant)> for Timestamped<T> {
    fn core(&self) -> &Rc<ProducerCore<(T, Instant)>> {
        &self.core
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Timestamped<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timestamped")
            .field("name", &self.core.name())
            .field("value", &self.core.peek().map(|(value, _)| value))
            .finish()
    }
}
