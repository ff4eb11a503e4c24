#![forbid(unsafe_code)]

//! The common cell surface.
//!
//! [`Beacon`] is the read/observe/lifecycle surface shared by every cell
//! handle; [`WritableBeacon`] adds the write surface for cells that accept
//! external writes (plain writables and the time operators, each of which
//! applies its own acceptance policy inside `set`).
//!
//! Handles are thin wrappers over an `Rc<ProducerCore<T>>`; the provided
//! methods defer to the core after giving the variant a chance to refresh
//! itself (sleeping derivations recompute before any read or subscribe).

use std::rc::Rc;

use crate::error::BeaconError;
use crate::producer::ProducerCore;
use crate::subscription::{subscribe_to, SubscribeOptions, Subscription};

/// Read, observe and lifecycle surface of every cell.
pub trait Beacon<T: Clone + 'static> {
    /// The producer core backing this handle.
    fn core(&self) -> &Rc<ProducerCore<T>>;

    /// Bring the cell up to date before a read or subscription. Derivations
    /// override this to wake from sleep and to recompute when stale.
    fn refresh(&self) {}

    /// Tracked read: registers the current consumer (if any) as a dependent,
    /// then returns the value.
    ///
    /// # Panics
    ///
    /// Panics when the cell is lazy and was never written; use
    /// [`try_get`](Beacon::try_get) for a fallible read.
    #[must_use]
    fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Tracked read returning `LazyRead` on an empty cell.
    fn try_get(&self) -> Result<T, BeaconError> {
        self.refresh();
        self.core().get_tracked()
    }

    /// Untracked read.
    ///
    /// # Panics
    ///
    /// Panics when the cell is lazy and was never written; use
    /// [`try_peek`](Beacon::try_peek) for a fallible read.
    #[must_use]
    fn peek(&self) -> T {
        match self.try_peek() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Untracked read returning `LazyRead` on an empty cell.
    fn try_peek(&self) -> Result<T, BeaconError> {
        self.refresh();
        self.core().try_peek()
    }

    /// Tracked read by reference (no clone).
    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, BeaconError> {
        self.refresh();
        let core = self.core();
        core.track_read();
        core.with_value(|value| {
            value.map(f).ok_or_else(|| BeaconError::LazyRead {
                name: core.name().to_string(),
            })
        })
    }

    /// Whether the cell holds no value yet.
    fn is_empty(&self) -> bool {
        self.core().is_empty()
    }

    /// Diagnostic name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Live listener count (external subscribers plus dependent consumers).
    fn listeners_count(&self) -> usize {
        self.core().listeners_count()
    }

    /// Value before the last accepted write.
    fn previous(&self) -> Option<T> {
        self.core().previous()
    }

    /// Value captured at the first accepted write.
    fn initial_value(&self) -> Option<T> {
        self.core().initial_value()
    }

    /// Observe changes with default options (immediate call with the current
    /// value, then one deferred call per scheduler turn).
    fn subscribe(&self, callback: impl FnMut(&T) + 'static) -> Subscription {
        self.subscribe_with(callback, SubscribeOptions::new())
    }

    /// Observe changes with explicit options.
    fn subscribe_with(
        &self,
        callback: impl FnMut(&T) + 'static,
        options: SubscribeOptions,
    ) -> Subscription {
        self.refresh();
        subscribe_to(self.core(), callback, options)
    }

    /// Run `hook` when the cell is disposed.
    fn on_dispose(&self, hook: impl FnOnce() + 'static) {
        self.core().on_dispose(hook);
    }

    /// Tear the cell down. Idempotent; see `ProducerCore::dispose`.
    fn dispose(&self) {
        self.core().dispose();
    }

    /// Whether the cell has been disposed.
    fn is_disposed(&self) -> bool {
        self.core().is_disposed()
    }
}

/// Write surface of cells that accept external writes.
///
/// Each variant applies its own acceptance policy: a plain writable gates on
/// equality, a debounced cell arms its timer, a filtered cell consults its
/// predicate, and so on.
pub trait WritableBeacon<T: Clone + 'static>: Beacon<T> {
    /// Fallible write; surfaces `CircularDependency` to the caller.
    fn try_set(&self, value: T) -> Result<(), BeaconError>;

    /// Write. Rejections (equality gate, filter) are silent; graph errors are
    /// parked on the runtime and surface from the next
    /// [`flush`](crate::Runtime::flush).
    fn set(&self, value: T) {
        let _ = self.try_set(value);
    }

    /// Write bypassing the variant's acceptance gate.
    fn set_force(&self, value: T);

    /// Re-set the captured initial value. `Uninitialized` when the cell was
    /// never written.
    fn reset(&self) -> Result<(), BeaconError>;
}
