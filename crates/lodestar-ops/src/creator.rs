#![forbid(unsafe_code)]

//! Creator surface for the ops cell variants.
//!
//! [`OpsRuntimeExt`] extends [`Runtime`] with a factory method per variant,
//! completing the creator the core crate starts (`writable`, `derived`,
//! `effect` live there). `use lodestar_ops::OpsRuntimeExt` (or the facade
//! prelude) brings them in.

use std::future::Future;
use std::hash::Hash;

use ahash::{AHashMap, AHashSet};
use futures::stream::Stream;
use web_time::Duration;

use lodestar_core::Runtime;

use crate::async_beacon::{AsyncBeacon, AsyncOptions};
use crate::buffered::{BufferedCount, BufferedTime};
use crate::collections::{ListBeacon, MapBeacon, SetBeacon};
use crate::debounced::Debounced;
use crate::family::Family;
use crate::filtered::Filtered;
use crate::group::Group;
use crate::stream::{RawStreamBeacon, StreamBeacon};
use crate::throttled::Throttled;
use crate::timestamped::Timestamped;
use crate::undo_redo::UndoRedo;

/// Factory methods for the ops cell variants.
pub trait OpsRuntimeExt {
    /// An async derivation: reads made while `compute` constructs its future
    /// are tracked; the future's outcome becomes `Data`/`Error`.
    fn async_derived<T, F, Fut>(&self, compute: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static;

    /// [`async_derived`](OpsRuntimeExt::async_derived) with explicit options.
    fn async_derived_with<T, F, Fut>(&self, options: AsyncOptions, compute: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static;

    /// Async lifecycle without dependency tracking: nothing re-triggers the
    /// thunk (re-run by hand via [`AsyncBeacon::run`]).
    fn from_future<T, F, Fut>(&self, thunk: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static;

    /// [`from_future`](OpsRuntimeExt::from_future) with explicit options.
    fn from_future_with<T, F, Fut>(&self, options: AsyncOptions, thunk: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static;

    /// Bridge an error-carrying push source into an `AsyncValue` cell.
    fn from_stream<T, S>(&self, stream: S, cancel_on_error: bool) -> StreamBeacon<T>
    where
        T: Clone + 'static,
        S: Stream<Item = anyhow::Result<T>> + 'static;

    /// Bridge a plain push source straight into a value cell. Without an
    /// initial value the cell is lazy until the first item; `on_done` fires
    /// at stream end.
    fn from_stream_raw<T, S>(
        &self,
        stream: S,
        initial: Option<T>,
        on_done: Option<Box<dyn FnOnce()>>,
    ) -> RawStreamBeacon<T>
    where
        T: Clone + 'static,
        S: Stream<Item = T> + 'static;

    /// Writes settle for `duration` before committing.
    fn debounced<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        duration: Duration,
    ) -> Debounced<T>;

    /// A lazy debounced cell (empty until the first settled write).
    fn debounced_lazy<T: Clone + PartialEq + 'static>(&self, duration: Duration) -> Debounced<T>;

    /// At most one commit per `duration` window.
    fn throttled<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        duration: Duration,
        drop_blocked: bool,
    ) -> Throttled<T>;

    /// Snapshot committed every `capacity` writes.
    fn buffered_count<T: Clone + 'static>(&self, capacity: usize) -> BufferedCount<T>;

    /// [`buffered_count`](OpsRuntimeExt::buffered_count) with a seed value
    /// counting as the first buffered item.
    fn buffered_count_from<T: Clone + 'static>(&self, seed: T, capacity: usize)
        -> BufferedCount<T>;

    /// Snapshot committed `duration` after the first write of each batch.
    fn buffered_time<T: Clone + 'static>(&self, duration: Duration) -> BufferedTime<T>;

    /// Writes gated by `predicate(previous, next)`.
    fn filtered<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        predicate: impl FnMut(Option<&T>, &T) -> bool + 'static,
    ) -> Filtered<T>;

    /// A lazy filtered cell; its first write always passes.
    fn filtered_lazy<T: Clone + PartialEq + 'static>(
        &self,
        predicate: impl FnMut(Option<&T>, &T) -> bool + 'static,
    ) -> Filtered<T>;

    /// Values paired with their acceptance time.
    fn timestamped<T: Clone + 'static>(&self, initial: Option<T>) -> Timestamped<T>;

    /// A writable with bounded undo/redo history.
    fn undo_redo<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        history_limit: usize,
    ) -> UndoRedo<T>;

    /// A `Vec` cell notifying on in-place mutation.
    fn list<T: Clone + 'static>(&self, initial: Vec<T>) -> ListBeacon<T>;

    /// A hash-set cell notifying on in-place mutation.
    fn hash_set<T: Clone + Hash + Eq + 'static>(&self, initial: AHashSet<T>) -> SetBeacon<T>;

    /// A hash-map cell notifying on in-place mutation.
    fn hash_map<K, V>(&self, initial: AHashMap<K, V>) -> MapBeacon<K, V>
    where
        K: Clone + Hash + Eq + 'static,
        V: Clone + 'static;

    /// A caching keyed factory.
    fn family<K, B>(&self, factory: impl Fn(&K) -> B + 'static) -> Family<K, B>
    where
        K: Hash + Eq + Clone + 'static,
        B: Clone + 'static;

    /// A keyed factory with caching switchable off.
    fn family_with<K, B>(&self, factory: impl Fn(&K) -> B + 'static, cache: bool) -> Family<K, B>
    where
        K: Hash + Eq + Clone + 'static,
        B: Clone + 'static;

    /// A bulk-lifetime container mirroring the creator surface.
    fn group(&self) -> Group;
}

impl OpsRuntimeExt for Runtime {
    fn async_derived<T, F, Fut>(&self, compute: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        AsyncBeacon::create(self, AsyncOptions::new(), compute, true)
    }

    fn async_derived_with<T, F, Fut>(&self, options: AsyncOptions, compute: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        AsyncBeacon::create(self, options, compute, true)
    }

    fn from_future<T, F, Fut>(&self, thunk: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        AsyncBeacon::create(self, AsyncOptions::new(), thunk, false)
    }

    fn from_future_with<T, F, Fut>(&self, options: AsyncOptions, thunk: F) -> AsyncBeacon<T>
    where
        T: Clone + 'static,
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<T>> + 'static,
    {
        AsyncBeacon::create(self, options, thunk, false)
    }

    fn from_stream<T, S>(&self, stream: S, cancel_on_error: bool) -> StreamBeacon<T>
    where
        T: Clone + 'static,
        S: Stream<Item = anyhow::Result<T>> + 'static,
    {
        StreamBeacon::create(self, stream, cancel_on_error, None)
    }

    fn from_stream_raw<T, S>(
        &self,
        stream: S,
        initial: Option<T>,
        on_done: Option<Box<dyn FnOnce()>>,
    ) -> RawStreamBeacon<T>
    where
        T: Clone + 'static,
        S: Stream<Item = T> + 'static,
    {
        RawStreamBeacon::create(self, stream, initial, on_done, None)
    }

    fn debounced<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        duration: Duration,
    ) -> Debounced<T> {
        Debounced::create(self, Some(initial), duration, None)
    }

    fn debounced_lazy<T: Clone + PartialEq + 'static>(&self, duration: Duration) -> Debounced<T> {
        Debounced::create(self, None, duration, None)
    }

    fn throttled<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        duration: Duration,
        drop_blocked: bool,
    ) -> Throttled<T> {
        Throttled::create(self, Some(initial), duration, drop_blocked, None)
    }

    fn buffered_count<T: Clone + 'static>(&self, capacity: usize) -> BufferedCount<T> {
        BufferedCount::create(self, None, capacity, None)
    }

    fn buffered_count_from<T: Clone + 'static>(
        &self,
        seed: T,
        capacity: usize,
    ) -> BufferedCount<T> {
        BufferedCount::create(self, Some(seed), capacity, None)
    }

    fn buffered_time<T: Clone + 'static>(&self, duration: Duration) -> BufferedTime<T> {
        BufferedTime::create(self, duration, None)
    }

    fn filtered<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        predicate: impl FnMut(Option<&T>, &T) -> bool + 'static,
    ) -> Filtered<T> {
        Filtered::create(self, Some(initial), predicate, None)
    }

    fn filtered_lazy<T: Clone + PartialEq + 'static>(
        &self,
        predicate: impl FnMut(Option<&T>, &T) -> bool + 'static,
    ) -> Filtered<T> {
        Filtered::create(self, None, predicate, None)
    }

    fn timestamped<T: Clone + 'static>(&self, initial: Option<T>) -> Timestamped<T> {
        Timestamped::create(self, initial, None)
    }

    fn undo_redo<T: Clone + PartialEq + 'static>(
        &self,
        initial: T,
        history_limit: usize,
    ) -> UndoRedo<T> {
        UndoRedo::create(self, initial, history_limit, None)
    }

    fn list<T: Clone + 'static>(&self, initial: Vec<T>) -> ListBeacon<T> {
        ListBeacon::create(self, initial, None)
    }

    fn hash_set<T: Clone + Hash + Eq + 'static>(&self, initial: AHashSet<T>) -> SetBeacon<T> {
        SetBeacon::create(self, initial, None)
    }

    fn hash_map<K, V>(&self, initial: AHashMap<K, V>) -> MapBeacon<K, V>
    where
        K: Clone + Hash + Eq + 'static,
        V: Clone + 'static,
    {
        MapBeacon::create(self, initial, None)
    }

    fn family<K, B>(&self, factory: impl Fn(&K) -> B + 'static) -> Family<K, B>
    where
        K: Hash + Eq + Clone + 'static,
        B: Clone + 'static,
    {
        Family::create(factory, true)
    }

    fn family_with<K, B>(&self, factory: impl Fn(&K) -> B + 'static, cache: bool) -> Family<K, B>
    where
        K: Hash + Eq + Clone + 'static,
        B: Clone + 'static,
    {
        Family::create(factory, cache)
    }

    fn group(&self) -> Group {
        Group::create(self)
    }
}
