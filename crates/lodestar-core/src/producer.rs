#![forbid(unsafe_code)]

//! Producers: the shared base of every observable cell.
//!
//! A [`ProducerCore`] owns a cell's value slots (current, previous, initial),
//! its listener registry, and its dispose hooks. Cell variants — writable,
//! derived, async, time operators — are thin handles around an
//! `Rc<ProducerCore<T>>` that choose *when* and *how* the core's write paths
//! are invoked.
//!
//! # Listener registry
//!
//! Listeners have stable `u64` identity (the same callback may be registered
//! twice on purpose) and are notified in registration order. Removal marks a
//! tombstone cleared lazily, so unsubscribing during a notification is O(1)
//! and never invalidates the iteration. Consumer links are held weakly:
//! producer→consumer never keeps a consumer alive (the consumer side owns
//! the subscription).
//!
//! # Invariants
//!
//! 1. An empty cell rejects reads with `LazyRead`; `is_empty` flips to false
//!    exactly once, at the first accepted write, and stays false until
//!    `dispose`.
//! 2. `previous()` is the value before the last accepted write.
//! 3. The first accepted write captures `initial`.
//! 4. After `dispose`: the listener table is empty, the value is back at
//!    `initial`, and no further notification ever fires. Dispose is
//!    idempotent.
//!
//! # Failure Modes
//!
//! - **Circular write**: a consumer writing a producer it depends on has the
//!   write rejected; the error is parked on the runtime (see
//!   [`Runtime::flush`]) and the consumer's dependency set rolls back.
//!
//! [`Runtime::flush`]: crate::Runtime::flush

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::consumer::{ConsumerCore, DepEdge};
use crate::error::BeaconError;
use crate::runtime::Runtime;

#[cfg(feature = "tracing")]
use crate::logging::debug;
#[cfg(not(feature = "tracing"))]
use crate::debug;

// ---------------------------------------------------------------------------
// Listener registry
// ---------------------------------------------------------------------------

pub(crate) enum ListenerKind<T> {
    /// External callback invoked inline at notification time.
    Sync(Rc<RefCell<dyn FnMut(&T)>>),
    /// A consumer to mark stale and enqueue.
    Node(Weak<ConsumerCore>),
}

impl<T> Clone for ListenerKind<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(cb) => Self::Sync(Rc::clone(cb)),
            Self::Node(consumer) => Self::Node(Weak::clone(consumer)),
        }
    }
}

struct ListenerEntry<T> {
    id: u64,
    kind: ListenerKind<T>,
    removed: Rc<Cell<bool>>,
}

pub(crate) struct ListenerTable<T> {
    entries: Vec<ListenerEntry<T>>,
    next_id: u64,
    live: usize,
}

impl<T> ListenerTable<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            live: 0,
        }
    }

    fn add(&mut self, kind: ListenerKind<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(ListenerEntry {
            id,
            kind,
            removed: Rc::new(Cell::new(false)),
        });
        self.live += 1;
        id
    }

    fn remove(&mut self, id: u64) -> bool {
        let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.id == id && !e.removed.get())
        else {
            return false;
        };
        entry.removed.set(true);
        self.live -= 1;
        if self.entries.len() >= 16 && self.live * 2 < self.entries.len() {
            self.entries.retain(|e| !e.removed.get());
        }
        true
    }

    fn len(&self) -> usize {
        self.live
    }

    fn clear(&mut self) {
        for entry in &self.entries {
            entry.removed.set(true);
        }
        self.entries.clear();
        self.live = 0;
    }

    /// Stable view for one notification pass: tombstones set after the
    /// snapshot are still honoured via the shared `removed` flag.
    fn snapshot(&self) -> Vec<(u64, ListenerKind<T>, Rc<Cell<bool>>)> {
        self.entries
            .iter()
            .filter(|e| !e.removed.get())
            .map(|e| (e.id, e.kind.clone(), Rc::clone(&e.removed)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Producer core
// ---------------------------------------------------------------------------

struct ValueState<T> {
    value: Option<T>,
    previous: Option<T>,
    initial: Option<T>,
}

/// Shared base of every observable cell.
///
/// Low-level building block: cell variants outside this crate are assembled
/// from `ProducerCore` + [`ConsumerCore`].
pub struct ProducerCore<T: 'static> {
    rt: Runtime,
    id: u64,
    name: String,
    weak_self: Weak<ProducerCore<T>>,
    state: RefCell<ValueState<T>>,
    listeners: RefCell<ListenerTable<T>>,
    dispose_hooks: RefCell<Vec<Box<dyn FnOnce()>>>,
    disposed: Cell<bool>,
    listeners_changed: RefCell<Option<Box<dyn Fn(usize)>>>,
    wrapped: RefCell<Vec<u64>>,
}

impl<T: Clone + 'static> ProducerCore<T> {
    /// Create a core. `initial: Some(v)` counts as the first accepted write
    /// (captures `initial`/`previous` per the write contract); `None` starts
    /// the cell lazy.
    pub fn new(rt: &Runtime, kind: &str, name: Option<String>, initial: Option<T>) -> Rc<Self> {
        let id = rt.next_node_id();
        let name = name.unwrap_or_else(|| format!("{kind}#{id}"));
        Rc::new_cyclic(|weak_self| Self {
            rt: rt.clone(),
            id,
            name,
            weak_self: weak_self.clone(),
            state: RefCell::new(ValueState {
                value: initial.clone(),
                previous: initial.clone(),
                initial,
            }),
            listeners: RefCell::new(ListenerTable::new()),
            dispose_hooks: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
            listeners_changed: RefCell::new(None),
            wrapped: RefCell::new(Vec::new()),
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.rt
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
    pub fn is_empty(&self) -> bool {
        self.state.borrow().value.is_none()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Untracked read of the current value.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.state.borrow().value.clone()
    }

    /// Untracked read; `LazyRead` if the cell holds no value.
    pub fn try_peek(&self) -> Result<T, BeaconError> {
        self.peek().ok_or_else(|| BeaconError::LazyRead {
            name: self.name.clone(),
        })
    }

    /// Borrow the current value without cloning.
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.state.borrow().value.as_ref())
    }

    /// Value before the last accepted write.
    #[must_use]
    pub fn previous(&self) -> Option<T> {
        self.state.borrow().previous.clone()
    }

    /// Value captured at the first accepted write.
    #[must_use]
    pub fn initial_value(&self) -> Option<T> {
        self.state.borrow().initial.clone()
    }

    /// Register the current consumer (if any, and tracking is active) as a
    /// listener of this producer, and this producer as its dependency.
    pub fn track_read(&self) {
        if self.disposed.get() || self.rt.is_untracked() {
            return;
        }
        let Some(frame) = self.rt.current_frame() else {
            return;
        };
        if !frame.tracking || frame.has_dep(self.id) {
            return;
        }
        let lid = self.add_node_listener(Rc::downgrade(&frame.consumer));
        let weak = self.weak_self.clone();
        frame.push_dep(DepEdge {
            producer: self.id,
            unsub: Box::new(move || {
                if let Some(producer) = weak.upgrade() {
                    producer.remove_listener(lid);
                }
            }),
        });
    }

    /// Tracked read: register with the current consumer, then return the
    /// value.
    pub fn get_tracked(&self) -> Result<T, BeaconError> {
        self.track_read();
        self.try_peek()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Equality-gated write. Returns `Ok(true)` if the value was accepted.
    pub fn set_gated(&self, value: T, force: bool) -> Result<bool, BeaconError>
    where
        T: PartialEq,
    {
        if self.disposed.get() {
            return Ok(false);
        }
        let accept = {
            let state = self.state.borrow();
            match &state.value {
                None => true,
                Some(current) => force || *current != value,
            }
        };
        if !accept {
            return Ok(false);
        }
        self.commit(value)
    }

    /// Unconditional write (derived recomputes, collections, timestamps).
    pub fn set_raw(&self, value: T) -> Result<bool, BeaconError> {
        if self.disposed.get() {
            return Ok(false);
        }
        self.commit(value)
    }

    /// Mutate the value in place and notify unconditionally.
    pub fn mutate(&self, f: impl FnOnce(&mut T)) -> Result<bool, BeaconError> {
        if self.disposed.get() {
            return Ok(false);
        }
        let mut next = self.try_peek()?;
        f(&mut next);
        self.commit(next)
    }

    /// `reset` per the write contract: re-set the captured initial value,
    /// equality-gated. `Uninitialized` if the cell was never written.
    pub fn reset_gated(&self) -> Result<(), BeaconError>
    where
        T: PartialEq,
    {
        let initial = self
            .initial_value()
            .ok_or_else(|| BeaconError::Uninitialized {
                name: self.name.clone(),
            })?;
        self.set_gated(initial, false).map(|_| ())
    }

    /// Ungated reset for cell variants whose value type has no equality.
    pub fn reset_raw(&self) -> Result<(), BeaconError> {
        let initial = self
            .initial_value()
            .ok_or_else(|| BeaconError::Uninitialized {
                name: self.name.clone(),
            })?;
        self.set_raw(initial).map(|_| ())
    }

    fn commit(&self, value: T) -> Result<bool, BeaconError> {
        // Untracked writes mutate silently.
        if self.rt.is_untracked() {
            self.store(value);
            return Ok(true);
        }
        if let Some(err) = self.rt.check_cycle(self.id, &self.name) {
            self.rt.record_error(err.clone());
            return Err(err);
        }
        self.store(value);
        if self.rt.in_batch() {
            let weak = self.weak_self.clone();
            self.rt.defer_batch_notify(
                self.id,
                Box::new(move || {
                    if let Some(producer) = weak.upgrade() {
                        producer.notify_current();
                        producer.runtime().kick();
                    }
                }),
            );
        } else {
            self.notify_current();
            self.rt.kick();
        }
        Ok(true)
    }

    fn store(&self, value: T) {
        let mut state = self.state.borrow_mut();
        if state.value.is_none() {
            state.initial = Some(value.clone());
            state.previous = Some(value.clone());
            state.value = Some(value);
        } else {
            state.previous = state.value.take();
            state.value = Some(value);
        }
    }

    /// Fan the current value out to every live listener: synchronous
    /// callbacks run inline, consumer links are marked stale and enqueued.
    pub fn notify_current(&self) {
        if self.disposed.get() {
            return;
        }
        let Some(value) = self.peek() else { return };
        let snapshot = self.listeners.borrow().snapshot();
        for (id, kind, removed) in snapshot {
            if removed.get() {
                continue;
            }
            match kind {
                ListenerKind::Sync(callback) => (callback.borrow_mut())(&value),
                ListenerKind::Node(consumer) => match consumer.upgrade() {
                    Some(consumer) => {
                        consumer.mark_stale();
                        self.rt.enqueue_consumer(&consumer);
                    }
                    None => {
                        self.remove_listener(id);
                    }
                },
            }
        }
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub(crate) fn add_sync_listener(&self, callback: Rc<RefCell<dyn FnMut(&T)>>) -> u64 {
        let id = self.listeners.borrow_mut().add(ListenerKind::Sync(callback));
        self.fire_listeners_changed();
        id
    }

    pub(crate) fn add_node_listener(&self, consumer: Weak<ConsumerCore>) -> u64 {
        let id = self.listeners.borrow_mut().add(ListenerKind::Node(consumer));
        self.fire_listeners_changed();
        id
    }

    pub(crate) fn remove_listener(&self, id: u64) {
        if self.listeners.borrow_mut().remove(id) {
            self.fire_listeners_changed();
        }
    }

    /// Number of live listeners (external subscribers plus consumer links).
    #[must_use]
    pub fn listeners_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Observe listener-count transitions (sleep support).
    pub(crate) fn set_listeners_changed(&self, hook: impl Fn(usize) + 'static) {
        *self.listeners_changed.borrow_mut() = Some(Box::new(hook));
    }

    fn fire_listeners_changed(&self) {
        let count = self.listeners_count();
        let hook = self.listeners_changed.borrow();
        if let Some(hook) = hook.as_ref() {
            hook(count);
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Run `hook` when the cell is disposed. Hooks run once, in registration
    /// order. Registering on an already disposed cell runs the hook now.
    pub fn on_dispose(&self, hook: impl FnOnce() + 'static) {
        if self.disposed.get() {
            hook();
            return;
        }
        self.dispose_hooks.borrow_mut().push(Box::new(hook));
    }

    /// Tear down: run dispose hooks, empty the listener table, restore the
    /// value to `initial`, and silence all future notifications. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.get() {
            return;
        }
        self.disposed.set(true);
        debug!(name = %self.name, "disposing cell");
        let hooks = std::mem::take(&mut *self.dispose_hooks.borrow_mut());
        for hook in hooks {
            hook();
        }
        self.listeners.borrow_mut().clear();
        self.listeners_changed.borrow_mut().take();
        let mut state = self.state.borrow_mut();
        state.value = state.initial.clone();
        state.previous = None;
    }

    /// Drop the held value without touching `previous`/`initial`. Used by
    /// sleeping derivations; the next run re-populates it.
    pub(crate) fn clear_value(&self) {
        self.state.borrow_mut().value = None;
    }

    // ── Wrap bookkeeping ─────────────────────────────────────────────

    /// Record that this cell wraps `target`. Returns `false` (and records
    /// nothing) when the target is already wrapped.
    pub fn mark_wrapped_target(&self, target: u64) -> bool {
        let mut wrapped = self.wrapped.borrow_mut();
        if wrapped.contains(&target) {
            return false;
        }
        wrapped.push(target);
        true
    }
}

impl<T: 'static> std::fmt::Debug for ProducerCore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerCore")
            .field("name", &self.name)
            .field("empty", &self.state.borrow().value.is_none())
            .field("listeners", &self.listeners.borrow().len())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Type-erased view
// ---------------------------------------------------------------------------

/// Type-erased producer surface, used where cells of different value types
/// meet (wrap bookkeeping, groups).
pub trait AnyProducer {
    /// Node id, unique within the runtime.
    fn id(&self) -> u64;
    /// Diagnostic name.
    fn name(&self) -> &str;
    /// Whether the cell has been disposed.
    fn is_disposed(&self) -> bool;
    /// Dispose the cell.
    fn dispose_erased(&self);
    /// Register a dispose hook.
    fn add_dispose_hook(&self, hook: Box<dyn FnOnce()>);
    /// Record a wrap target; `false` when already wrapped.
    fn mark_wrapped(&self, target: u64) -> bool;
}

impl<T: Clone + 'static> AnyProducer for ProducerCore<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    fn dispose_erased(&self) {
        self.dispose();
    }

    fn add_dispose_hook(&self, hook: Box<dyn FnOnce()>) {
        if self.disposed.get() {
            hook();
            return;
        }
        self.dispose_hooks.borrow_mut().push(hook);
    }

    fn mark_wrapped(&self, target: u64) -> bool {
        self.mark_wrapped_target(target)
    }
}
