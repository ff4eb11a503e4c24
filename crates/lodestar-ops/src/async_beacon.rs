#![forbid(unsafe_code)]

//! Async derived cells: tracked computes whose body resolves in the future.
//!
//! An [`AsyncBeacon`] produces [`AsyncValue`] states. Its compute closure
//! runs under tracking (the reads it makes while *constructing* the future
//! are the dependencies); the returned future is then spawned on the
//! runtime's pool. When a dependency changes, the cell transitions to
//! `Loading { previous }` and starts a new run.
//!
//! # Latest-wins
//!
//! Every run bumps a monotonic token; a completion only commits if its token
//! is still current. With `cancel_running` (the default) a superseded run is
//! additionally aborted; without it the stale future keeps running but its
//! outcome is discarded either way.
//!
//! # Invariants
//!
//! 1. Compute failures surface as `AsyncValue::Error`, never as graph
//!    errors.
//! 2. `Loading` and `Error` carry the last committed `Data` as `previous`.
//! 3. With `manual_start` the cell stays `Idle` and tracks nothing until
//!    [`start`](AsyncBeacon::start); from then on it behaves normally.
//! 4. Dispose aborts the in-flight run and invalidates its token.

use std::cell::Cell;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use futures::future::{abortable, AbortHandle};

use lodestar_core::{Beacon, ConsumerCore, ProducerCore, Runtime, TrackMode};

use crate::async_value::AsyncValue;

#[cfg(feature = "tracing")]
use crate::logging::trace;
#[cfg(not(feature = "tracing"))]
use crate::trace;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Creation options for [`AsyncBeacon`]s.
#[derive(Debug, Clone)]
pub struct AsyncOptions {
    pub(crate) name: Option<String>,
    pub(crate) manual_start: bool,
    pub(crate) cancel_running: bool,
}

impl AsyncOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            manual_start: false,
            cancel_running: true,
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stay `Idle` until [`AsyncBeacon::start`] is called.
    #[must_use]
    pub fn with_manual_start(mut self, manual_start: bool) -> Self {
        self.manual_start = manual_start;
        self
    }

    /// Abort the in-flight future when a new run supersedes it (`true`,
    /// default). With `false` the stale future runs to completion but its
    /// outcome is still discarded.
    #[must_use]
    pub fn with_cancel_running(mut self, cancel_running: bool) -> Self {
        self.cancel_running = cancel_running;
        self
    }
}

impl Default for AsyncOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// AsyncBeacon
// ---------------------------------------------------------------------------

struct AsyncShared {
    token: Cell<u64>,
    abort: RefCell<Option<AbortHandle>>,
    started: Cell<bool>,
}

/// A producer of [`AsyncValue<T>`] driven by an async compute.
///
/// Cloning the handle shares the same cell.
pub struct AsyncBeacon<T: Clone + 'static> {
    core: Rc<ProducerCore<AsyncValue<T>>>,
    consumer: Rc<ConsumerCore>,
    shared: Rc<AsyncShared>,
    manual_start: bool,
}

impl<T: Clone + 'static> Clone for AsyncBeacon<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
            consumer: Rc::clone(&self.consumer),
            shared: Rc::clone(&self.shared),
            manual_start: self.manual_start,
        }
    }
}

impl<T: Clone + 'static> AsyncBeacon<T> {
    /// `tracked: false` builds the future-adapter variant: the compute's
    /// reads register nothing and nothing ever re-triggers it.
    pub(crate) fn create<F, Fut>(
        rt: &Runtime,
        options: AsyncOptions,
        mut compute: F,
        tracked: bool,
    ) -> Self
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let kind = if tracked { "async" } else { "future" };
        let core = ProducerCore::new(rt, kind, options.name.clone(), Some(AsyncValue::Idle));
        let shared = Rc::new(AsyncShared {
            token: Cell::new(0),
            abort: RefCell::new(None),
            started: Cell::new(!options.manual_start),
        });

        let rt2 = rt.clone();
        let body_core = Rc::clone(&core);
        let body_shared = Rc::clone(&shared);
        let cancel_running = options.cancel_running;
        let body = move || {
            if !body_shared.started.get() {
                return;
            }
            let previous = body_core.peek().and_then(|v| v.last_data().cloned());
            let _ = body_core.set_raw(AsyncValue::Loading { previous });

            let token = body_shared.token.get() + 1;
            body_shared.token.set(token);
            if cancel_running {
                if let Some(handle) = body_shared.abort.borrow_mut().take() {
                    handle.abort();
                }
            }

            // Reads made while constructing the future are the tracked
            // dependencies; the await itself happens off the frame.
            let future = compute();
            let (future, handle) = abortable(future);
            *body_shared.abort.borrow_mut() = Some(handle);

            let weak_core = Rc::downgrade(&body_core);
            let completion_shared = Rc::clone(&body_shared);
            rt2.spawn_local(async move {
                let Ok(outcome) = future.await else {
                    return; // aborted
                };
                if completion_shared.token.get() != token {
                    trace!(token, "discarding superseded async completion");
                    return;
                }
                let Some(core) = weak_core.upgrade() else {
                    return;
                };
                let next = match outcome {
                    Ok(value) => AsyncValue::Data(value),
                    Err(error) => {
                        let previous = core.peek().and_then(|v| v.last_data().cloned());
                        AsyncValue::from_error(error, previous)
                    }
                };
                let _ = core.set_raw(next);
            });
        };

        let mode = if tracked {
            TrackMode::Dynamic
        } else {
            TrackMode::Never
        };
        let consumer = ConsumerCore::new(rt, kind, Some(core.name().to_string()), mode, body);

        {
            let weak_consumer = Rc::downgrade(&consumer);
            let dispose_shared = Rc::clone(&shared);
            core.on_dispose(move || {
                dispose_shared.token.set(dispose_shared.token.get() + 1);
                if let Some(handle) = dispose_shared.abort.borrow_mut().take() {
                    handle.abort();
                }
                if let Some(consumer) = weak_consumer.upgrade() {
                    consumer.dispose();
                }
            });
        }

        consumer.run();
        Self {
            core,
            consumer,
            shared,
            manual_start: options.manual_start,
        }
    }

    /// Current [`AsyncValue`] state.
    #[must_use]
    pub fn status(&self) -> AsyncValue<T> {
        self.peek()
    }

    /// Freshest data available (`Data`, or the `previous` carried by
    /// `Loading`/`Error`).
    #[must_use]
    pub fn last_data(&self) -> Option<T> {
        self.core
            .with_value(|v| v.and_then(|v| v.last_data().cloned()))
    }

    /// Begin computing. A `manual_start` cell stays `Idle` until the first
    /// call; later calls are no-ops. Cells without `manual_start` start at
    /// creation.
    pub fn start(&self) {
        if !self.shared.started.get() {
            self.shared.started.set(true);
            self.consumer.run();
        }
    }

    /// Whether [`start`](AsyncBeacon::start) has happened (implicitly or
    /// explicitly).
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.shared.started.get()
    }

    /// Force a re-run of the compute, even with no dependency change.
    pub fn run(&self) {
        if self.shared.started.get() {
            self.consumer.run();
        } else {
            self.start();
        }
    }

    /// Abort the in-flight run and start over: back to `Idle` for
    /// `manual_start` cells, otherwise straight into a fresh `Loading`.
    pub fn reset(&self) {
        self.shared.token.set(self.shared.token.get() + 1);
        if let Some(handle) = self.shared.abort.borrow_mut().take() {
            handle.abort();
        }
        if self.manual_start {
            self.shared.started.set(false);
            let _ = self.core.set_raw(AsyncValue::Idle);
        } else {
            self.consumer.run();
        }
    }
}

impl<T: Clone + 'static> Beacon<AsyncValue<T>> for AsyncBeacon<T> {
    fn core(&self) -> &Rc<ProducerCore<AsyncValue<T>>> {
        &self.core
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for AsyncBeacon<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncBeacon")
            .field("name", &self.core.name())
            .field("status", &self.core.peek())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
