#![forbid(unsafe_code)]

//! Groups: bulk-lifetime containers.
//!
//! A [`Group`] mirrors the runtime's creator surface; every cell (and
//! effect, and family) created through it is recorded, and
//! [`dispose_all`](Group::dispose_all) / [`reset_all`](Group::reset_all)
//! apply to the whole batch. Disposers run before cell disposal. A group
//! owns what was registered through it, not what those cells subscribe to.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::hash::Hash;

use ahash::{AHashMap, AHashSet};
use web_time::Duration;

use lodestar_core::{
    Beacon, Derived, DerivedOptions, Effect, EffectOptions, Runtime, Writable, WritableBeacon,
};

use crate::async_beacon::{AsyncBeacon, AsyncOptions};
use crate::buffered::{BufferedCount, BufferedTime};
use crate::collections::{ListBeacon, MapBeacon, SetBeacon};
use crate::creator::OpsRuntimeExt;
use crate::debounced::Debounced;
use crate::family::Family;
use crate::filtered::Filtered;
use crate::throttled::Throttled;
use crate::timestamped::Timestamped;
use crate::undo_redo::UndoRedo;

#[cfg(feature = "tracing")]
use crate::logging::debug;
#[cfg(not(feature = "tracing"))]
use crate::debug;

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Group-lifecycle surface of a cell handle.
pub trait GroupMember {
    /// Dispose the cell.
    fn member_dispose(&self);

    /// Reset the cell, for variants that support reset. Default: no-op.
    fn member_reset(&self) {}
}

impl<T: Clone + PartialEq + 'static> GroupMember for Writable<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.reset();
    }
}

impl<T: Clone + 'static> GroupMember for Derived<T> {
    fn member_dispose(&self) {
        self.dispose();
    }
}

impl<T: Clone + 'static> GroupMember for AsyncBeacon<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        self.reset();
    }
}

impl<T: Clone + PartialEq + 'static> GroupMember for Debounced<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.reset();
    }
}

impl<T: Clone + PartialEq + 'static> GroupMember for Throttled<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.reset();
    }
}

impl<T: Clone + PartialEq + 'static> GroupMember for Filtered<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.reset();
    }
}

impl<T: Clone + PartialEq + 'static> GroupMember for UndoRedo<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.reset();
    }
}

impl<T: Clone + 'static> GroupMember for Timestamped<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.reset();
    }
}

impl<T: Clone + 'static> GroupMember for BufferedCount<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.reset();
    }
}

impl<T: Clone + 'static> GroupMember for BufferedTime<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.reset();
    }
}

impl<T: Clone + 'static> GroupMember for ListBeacon<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.core().reset_raw();
    }
}

impl<T: Clone + Hash + Eq + 'static> GroupMember for SetBeacon<T> {
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.core().reset_raw();
    }
}

impl<K, V> GroupMember for MapBeacon<K, V>
where
    K: Clone + Hash + Eq + 'static,
    V: Clone + 'static,
{
    fn member_dispose(&self) {
        self.dispose();
    }

    fn member_reset(&self) {
        let _ = self.core().reset_raw();
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A container owning cells, effects and disposers for collective teardown.
pub struct Group {
    rt: Runtime,
    members: RefCell<Vec<Box<dyn GroupMember>>>,
    effects: RefCell<Vec<Effect>>,
    disposers: RefCell<Vec<Box<dyn FnOnce()>>>,
    disposed: Cell<bool>,
}

impl Group {
    pub(crate) fn create(rt: &Runtime) -> Self {
        Self {
            rt: rt.clone(),
            members: RefCell::new(Vec::new()),
            effects: RefCell::new(Vec::new()),
            disposers: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        }
    }

    /// Register an externally created cell for group teardown.
    pub fn adopt<M: GroupMember + 'static>(&self, member: M) {
        self.members.borrow_mut().push(Box::new(member));
    }

    /// Register an extra disposer, run ahead of cell disposal.
    pub fn add_disposer(&self, disposer: impl FnOnce() + 'static) {
        self.disposers.borrow_mut().push(Box::new(disposer));
    }

    /// Number of recorded members (cells; effects and disposers excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    /// Whether [`dispose_all`](Group::dispose_all) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Run every disposer, drop every effect, then dispose every cell.
    /// Idempotent.
    pub fn dispose_all(&self) {
        if self.disposed.get() {
            return;
        }
        self.disposed.set(true);
        debug!(members = self.members.borrow().len(), "disposing group");
        for disposer in self.disposers.borrow_mut().drain(..) {
            disposer();
        }
        self.effects.borrow_mut().clear();
        for member in self.members.borrow_mut().drain(..) {
            member.member_dispose();
        }
    }

    /// Reset every member that supports reset (writable-like, buffered,
    /// async, collections).
    pub fn reset_all(&self) {
        for member in self.members.borrow().iter() {
            member.member_reset();
        }
    }

    // ── Creator surface ──────────────────────────────────────────────

    pub fn writable<T: Clone + PartialEq + 'static>(&self, value: T) -> Writable<T> {
        let cell = self.rt.writable(value);
        self.adopt(cell.clone());
        cell
    }

    pub fn lazy_writable<T: Clone + PartialEq + 'static>(&self) -> Writable<T> {
        let cell = self.rt.lazy_writable();
        self.adopt(cell.clone());
        cell
    }

    pub fn derived<T, F>(&self, compute: F) -> Derived<T>
    where
        T: Clone + 'static,
        F: FnMut() -> T + 'static,
    {
        let cell = self.rt.derived(compute);
        self.adopt(cell.clone());
        cell
    }

    pub fn derived_with<T, F>(&self, options: DerivedOptions, compute: F) -> Derived<T>
    where
        T: Clone + 'static,
        F: FnMut() -> T + 'static,
    {
        let cell = self.rt.derived_with(options, compute);
        self.adopt(cell.clone());
        cell
    }

    /// An effect owned by the group: it runs until `dispose_all`.
    pub fn effect<F: FnMut() + 'static>(&self, body: F) {
        self.effect_with(EffectOptions::new(), body);
    }

    pub fn effect_with<F: FnMut() + 'static>(&self, options: EffectOptions, body: F) {
        let effect = self.rt.effect_with(options, body);
        self.effects.borrow_mut().push(effect);
    }

    pub fn async_derived<T, F, Fut>(&self, compute: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let cell = self.rt.async_derived(compute);
        self.adopt(cell.clone());
        cell
    }

    pub fn async_derived_with<T, F, Fut>(&self, options: AsyncOptions, compute: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        let cell = self.rt.async_derived_with(options, compute);
        self.adopt(cell.clone());
        cell
    }

    pub fn debounced<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        duration: Duration,
    ) -> Debounced<T> {
        let cell = self.rt.debounced(initial, duration);
        self.adopt(cell.clone());
        cell
    }

    pub fn throttled<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        duration: Duration,
        drop_blocked: bool,
    ) -> Throttled<T> {
        let cell = self.rt.throttled(initial, duration, drop_blocked);
        self.adopt(cell.clone());
        cell
    }

    pub fn buffered_count<T: Clone + 'static>(&self, capacity: usize) -> BufferedCount<T> {
        let cell = self.rt.buffered_count(capacity);
        self.adopt(cell.clone());
        cell
    }

    pub fn buffered_time<T: Clone + 'static>(&self, duration: Duration) -> BufferedTime<T> {
        let cell = self.rt.buffered_time(duration);
        self.adopt(cell.clone());
        cell
    }

    pub fn filtered<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        predicate: impl FnMut(Option<&T>, &T) -> bool + 'static,
    ) -> Filtered<T> {
        let cell = self.rt.filtered(initial, predicate);
        self.adopt(cell.clone());
        cell
    }

    pub fn timestamped<T: Clone + 'static>(&self, initial: Option<T>) -> Timestamped<T> {
        let cell = self.rt.timestamped(initial);
        self.adopt(cell.clone());
        cell
    }

    pub fn undo_redo<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        history_limit: usize,
    ) -> UndoRedo<T> {
        let cell = self.rt.undo_redo(initial, history_limit);
        self.adopt(cell.clone());
        cell
    }

    pub fn list<T: Clone + 'static>(&self, initial: Vec<T>) -> ListBeacon<T> {
        let cell = self.rt.list(initial);
        self.adopt(cell.clone());
        cell
    }

    pub fn hash_set<T: Clone + Hash + Eq + 'static>(&self, initial: AHashSet<T>) -> SetBeacon<T> {
        let cell = self.rt.hash_set(initial);
        self.adopt(cell.clone());
        cell
    }

    pub fn hash_map<K, V>(&self, initial: AHashMap<K, V>) -> MapBeacon<K, V>
    where
        K: Clone + Hash + Eq + 'static,
        V: Clone + 'static,
    {
        let cell = self.rt.hash_map(initial);
        self.adopt(cell.clone());
        cell
    }

    /// A family whose cache is cleared at `dispose_all` (the produced cells
    /// are not disposed — they may be held externally).
    pub fn family<K, B>(&self, factory: impl Fn(&K) -> B + 'static) -> Family<K, B>
    where
        K: Hash + Eq + Clone + 'static,
        B: Clone + 'static,
    {
        let family = self.rt.family(factory);
        let for_disposal = family.clone();
        self.add_disposer(move || for_disposal.clear());
        family
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("members", &self.members.borrow().len())
            .field("effects", &self.effects.borrow().len())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
