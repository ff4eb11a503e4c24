#![forbid(unsafe_code)]

//! Subscriptions: externally observable change notifications.
//!
//! [`Subscription`] is an RAII guard: dropping it unsubscribes, `dispose()`
//! does so explicitly and is idempotent, and [`forget`](Subscription::forget)
//! deliberately leaks it for fire-and-forget observers.
//!
//! Two delivery modes:
//!
//! - **Deferred** (default): the callback is backed by a scheduler node, so
//!   any number of writes in one batch or one turn collapse into a single
//!   invocation carrying the final value.
//! - **Synchronous**: the callback runs inline inside every accepted write.

use std::cell::RefCell;
use std::rc::Rc;

use crate::consumer::{ConsumerCore, DepEdge, TrackMode};
use crate::producer::ProducerCore;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for [`Beacon::subscribe_with`](crate::Beacon::subscribe_with).
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// Invoke the callback immediately with the current value (skipped while
    /// the cell is still empty).
    pub start_now: bool,
    /// Deliver inline at write time instead of once per scheduler turn.
    pub synchronous: bool,
}

impl SubscribeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_now: true,
            synchronous: false,
        }
    }

    /// Synchronous delivery, no immediate invocation. The common shape for
    /// internal plumbing (wrap, streams).
    #[must_use]
    pub fn inline() -> Self {
        Self {
            start_now: false,
            synchronous: true,
        }
    }

    #[must_use]
    pub fn with_start_now(mut self, start_now: bool) -> Self {
        self.start_now = start_now;
        self
    }

    #[must_use]
    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Subscription guard
// ---------------------------------------------------------------------------

/// RAII unsubscribe guard returned by every subscribe-like operation.
#[must_use = "dropping a Subscription unsubscribes immediately; call .forget() to keep it alive"]
pub struct Subscription {
    cancel: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    /// Wrap a cancel thunk.
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: RefCell::new(Some(Box::new(cancel))),
        }
    }

    /// A subscription that is already released.
    #[must_use]
    pub fn released() -> Self {
        Self {
            cancel: RefCell::new(None),
        }
    }

    /// Unsubscribe. Idempotent; later calls and the eventual drop are no-ops.
    pub fn dispose(&self) {
        if let Some(cancel) = self.cancel.borrow_mut().take() {
            cancel();
        }
    }

    /// Whether the subscription has been released.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.cancel.borrow().is_none()
    }

    /// Keep the subscription alive for the rest of the program without
    /// holding the guard.
    pub fn forget(self) {
        // Disarm, then let drop run harmlessly.
        let _ = self.cancel.borrow_mut().take().map(Box::leak);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Attach `callback` to a producer core per `options`.
pub fn subscribe_to<T: Clone + 'static>(
    producer: &Rc<ProducerCore<T>>,
    callback: impl FnMut(&T) + 'static,
    options: SubscribeOptions,
) -> Subscription {
    let callback: Rc<RefCell<dyn FnMut(&T)>> = Rc::new(RefCell::new(callback));

    if options.synchronous {
        let id = producer.add_sync_listener(Rc::clone(&callback));
        if options.start_now {
            if let Some(value) = producer.peek() {
                (callback.borrow_mut())(&value);
            }
        }
        let weak = Rc::downgrade(producer);
        return Subscription::new(move || {
            if let Some(producer) = weak.upgrade() {
                producer.remove_listener(id);
            }
        });
    }

    // Deferred: a scheduler node re-reads the producer once per turn.
    let source = Rc::clone(producer);
    let deferred = Rc::clone(&callback);
    let consumer = ConsumerCore::new(
        producer.runtime(),
        "subscriber",
        None,
        TrackMode::Never,
        move || {
            if let Some(value) = source.peek() {
                (deferred.borrow_mut())(&value);
            }
        },
    );
    let lid = producer.add_node_listener(Rc::downgrade(&consumer));
    let weak = Rc::downgrade(producer);
    consumer.push_dep(DepEdge {
        producer: producer.id(),
        unsub: Box::new(move || {
            if let Some(producer) = weak.upgrade() {
                producer.remove_listener(lid);
            }
        }),
    });
    if options.start_now {
        if let Some(value) = producer.peek() {
            (callback.borrow_mut())(&value);
        }
    }
    // The guard owns the consumer; forgetting the guard keeps it alive.
    Subscription::new(move || consumer.dispose())
}
