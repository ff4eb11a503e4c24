#![forbid(unsafe_code)]

//! Consumers: nodes that run a body and re-run when tracked producers change.
//!
//! A [`ConsumerCore`] backs every derivation, every effect, and every
//! deferred subscription. It owns the subscriptions it holds on its
//! dependencies (each [`DepEdge`] carries the unsubscribe thunk); producers
//! hold only weak references back, so dropping all handles to a consumer is
//! enough to sever it from the graph.
//!
//! # Invariants
//!
//! 1. At most one consumer is "current" at any point of a call stack; nested
//!    runs push nested frames.
//! 2. After a tracking run, the dependency set equals exactly the producers
//!    read during that run. After a failed run (circular write), the set is
//!    rolled back to the previous run's set.
//! 3. A disposed consumer never runs again; disposal drops its body so any
//!    captured cell handles are released.
//!
//! # Failure Modes
//!
//! - **Re-entrant run**: a consumer whose body indirectly schedules itself is
//!   not run recursively; the stale flag survives and the runtime schedules
//!   one more pass after the current run completes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::runtime::Runtime;

#[cfg(feature = "tracing")]
use crate::logging::trace;
#[cfg(not(feature = "tracing"))]
use crate::trace;

// ---------------------------------------------------------------------------
// Dependency edges and frames
// ---------------------------------------------------------------------------

/// One consumer→producer subscription: the producer's id plus the thunk that
/// removes the consumer from that producer's listener table.
pub(crate) struct DepEdge {
    pub(crate) producer: u64,
    pub(crate) unsub: Box<dyn FnOnce()>,
}

/// Per-run bookkeeping for the currently evaluating consumer.
///
/// Reads performed while this frame is on top register here; when the run
/// ends the recorded set replaces (or, on failure, is discarded in favour of)
/// the consumer's previous dependency set.
pub(crate) struct Frame {
    pub(crate) consumer: Rc<ConsumerCore>,
    pub(crate) tracking: bool,
    pub(crate) failed: Cell<bool>,
    new_deps: RefCell<Vec<DepEdge>>,
}

impl Frame {
    fn new(consumer: Rc<ConsumerCore>, tracking: bool) -> Rc<Self> {
        Rc::new(Self {
            consumer,
            tracking,
            failed: Cell::new(false),
            new_deps: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn has_dep(&self, producer: u64) -> bool {
        self.new_deps
            .borrow()
            .iter()
            .any(|edge| edge.producer == producer)
    }

    pub(crate) fn push_dep(&self, edge: DepEdge) {
        self.new_deps.borrow_mut().push(edge);
    }

    fn take_deps(&self) -> Vec<DepEdge> {
        std::mem::take(&mut *self.new_deps.borrow_mut())
    }
}

// ---------------------------------------------------------------------------
// Consumer core
// ---------------------------------------------------------------------------

/// How a consumer discovers its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    /// Re-track on every run; dependencies follow control flow.
    Dynamic,
    /// Track on the first run only; later runs reuse that set.
    Static,
    /// Never track. Used by subscription nodes whose dependency is installed
    /// by hand.
    Never,
}

/// Shared core of every derivation, effect and deferred subscription.
///
/// Low-level building block: cell variants outside this crate (async cells,
/// time operators) are assembled from `ConsumerCore` + `ProducerCore`.
pub struct ConsumerCore {
    rt: Runtime,
    id: u64,
    name: String,
    mode: TrackMode,
    weak_self: std::rc::Weak<ConsumerCore>,
    body: RefCell<Option<Box<dyn FnMut()>>>,
    deps: RefCell<Vec<DepEdge>>,
    stale: Cell<bool>,
    queued: Cell<bool>,
    running: Cell<bool>,
    disposed: Cell<bool>,
    tracked_once: Cell<bool>,
}

impl ConsumerCore {
    /// Create a consumer. The body is not run; callers decide when the first
    /// run happens.
    pub fn new(
        rt: &Runtime,
        kind: &str,
        name: Option<String>,
        mode: TrackMode,
        body: impl FnMut() + 'static,
    ) -> Rc<Self> {
        let id = rt.next_node_id();
        let name = name.unwrap_or_else(|| format!("{kind}#{id}"));
        Rc::new_cyclic(|weak_self| Self {
            rt: rt.clone(),
            id,
            name,
            mode,
            weak_self: weak_self.clone(),
            body: RefCell::new(Some(Box::new(body))),
            deps: RefCell::new(Vec::new()),
            stale: Cell::new(false),
            queued: Cell::new(false),
            running: Cell::new(false),
            disposed: Cell::new(false),
            tracked_once: Cell::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.stale.get()
    }

    pub(crate) fn mark_stale(&self) {
        self.stale.set(true);
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.queued.get()
    }

    pub(crate) fn set_queued(&self, queued: bool) {
        self.queued.set(queued);
    }

    /// Whether the consumer currently holds a subscription on `producer`.
    pub(crate) fn depends_on(&self, producer: u64) -> bool {
        self.deps
            .borrow()
            .iter()
            .any(|edge| edge.producer == producer)
    }

    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.deps.borrow().len()
    }

    /// Install a hand-built dependency edge (subscription nodes).
    pub(crate) fn push_dep(&self, edge: DepEdge) {
        self.deps.borrow_mut().push(edge);
    }

    /// Run the body under a fresh frame, then swap in the recorded
    /// dependency set (tracking modes) or keep the installed one (`Never`).
    pub fn run(&self) {
        if self.disposed.get() || self.running.get() {
            return;
        }
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        self.running.set(true);
        self.stale.set(false);

        let tracking = match self.mode {
            TrackMode::Dynamic => true,
            TrackMode::Static => !self.tracked_once.get(),
            TrackMode::Never => false,
        };

        // A frame is pushed even for non-tracking runs so reads inside the
        // body never leak registrations to an enclosing consumer.
        let frame = Frame::new(Rc::clone(&this), tracking);
        self.rt.push_frame(Rc::clone(&frame));
        let body = self.body.borrow_mut().take();
        if let Some(mut body) = body {
            body();
            if !self.disposed.get() {
                *self.body.borrow_mut() = Some(body);
            }
        }
        self.rt.pop_frame();

        if tracking {
            let new_deps = frame.take_deps();
            if frame.failed.get() {
                // Roll back: discard this run's registrations, keep the
                // previous dependency set intact.
                trace!(consumer = %self.name, "rolling back dependency set");
                for edge in new_deps {
                    (edge.unsub)();
                }
            } else {
                let old = std::mem::replace(&mut *self.deps.borrow_mut(), new_deps);
                for edge in old {
                    (edge.unsub)();
                }
            }
            self.tracked_once.set(true);
        }

        self.running.set(false);
        if self.stale.get() && !self.disposed.get() {
            // Re-marked during its own run; give it one more pass.
            self.rt.schedule_consumer(&this);
        }
    }

    /// Drop every dependency subscription without disposing the consumer.
    /// The next tracking run rebuilds the set.
    pub fn clear_deps(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for edge in deps {
            (edge.unsub)();
        }
        self.tracked_once.set(false);
    }

    /// Tear down: unsubscribe from every dependency, drop the body, and make
    /// all further runs and enqueues no-ops. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.get() {
            return;
        }
        self.disposed.set(true);
        self.clear_deps();
        self.body.borrow_mut().take();
    }
}

impl std::fmt::Debug for ConsumerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerCore")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("deps", &self.deps.borrow().len())
            .field("stale", &self.stale.get())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}
