#![forbid(unsafe_code)]

//! Bridges between cells and push/pull async sources.
//!
//! Inbound: [`StreamBeacon`] maps an error-carrying stream onto the
//! [`AsyncValue`] lifecycle; [`RawStreamBeacon`] feeds item values straight
//! into a cell. Both subscribe dispose-safely: disposing the cell aborts the
//! pump task.
//!
//! Outbound: [`BeaconStream`] exposes any cell as a `futures::Stream`
//! (current value on subscribe, then every change), and [`NextValue`] is a
//! one-shot future for the next (optionally filtered) value with an optional
//! timeout. Both release their subscription the instant they finish.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use futures::future::abortable;
use futures::stream::{Stream, StreamExt};
use web_time::Duration;

use lodestar_core::{
    Beacon, ProducerCore, Runtime, SubscribeOptions, Subscription, TimerHandle,
};

use crate::async_value::AsyncValue;

// ---------------------------------------------------------------------------
// Inbound: from_stream
// ---------------------------------------------------------------------------

/// A cell fed by an external push source, observed as [`AsyncValue`]s.
///
/// Starts in `Loading { previous: None }`; each `Ok` item commits `Data`,
/// each `Err` item commits `Error { previous }`. With `cancel_on_error` the
/// pump unsubscribes at the first error.
pub struct StreamBeacon<T: Clone + 'static> {
    core: Rc<ProducerCore<AsyncValue<T>>>,
}

impl<T: Clone + 'static> Clone for StreamBeacon<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> StreamBeacon<T> {
    pub(crate) fn create<S>(
        rt: &Runtime,
        stream: S,
        cancel_on_error: bool,
        name: Option<String>,
    ) -> Self
    where
        S: Stream<Item = anyhow::Result<T>> + 'static,
    {
        let core = ProducerCore::new(
            rt,
            "stream",
            name,
            Some(AsyncValue::Loading { previous: None }),
        );

        let weak_core = Rc::downgrade(&core);
        let pump = async move {
            let mut stream = Box::pin(stream);
            while let Some(item) = stream.next().await {
                let Some(core) = weak_core.upgrade() else {
                    return;
                };
                match item {
                    Ok(value) => {
                        let _ = core.set_raw(AsyncValue::Data(value));
                    }
                    Err(error) => {
                        let previous = core.peek().and_then(|v| v.last_data().cloned());
                        let _ = core.set_raw(AsyncValue::from_error(error, previous));
                        if cancel_on_error {
                            return;
                        }
                    }
                }
            }
        };
        let (pump, abort) = abortable(pump);
        rt.spawn_local(async move {
            let _ = pump.await;
        });
        core.on_dispose(move || abort.abort());

        Self { core }
    }

    /// Current [`AsyncValue`] state.
    #[must_use]
    pub fn status(&self) -> AsyncValue<T> {
        self.peek()
    }
}

impl<T: Clone + 'static> Beacon<AsyncValue<T>> for StreamBeacon<T> {
    fn core(&self) -> &Rc<ProducerCore<AsyncValue<T>>> {
        &self.core
    }
}

// ---------------------------------------------------------------------------
// Inbound: from_stream_raw
// ---------------------------------------------------------------------------

/// A cell fed item values directly from an external push source.
///
/// With no initial value the cell starts lazy (reads fail until the first
/// item). `on_done` fires once when the stream ends (not when the cell is
/// disposed first).
pub struct RawStreamBeacon<T: Clone + 'static> {
    core: Rc<ProducerCore<T>>,
}

impl<T: Clone + 'static> Clone for RawStreamBeacon<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> RawStreamBeacon<T> {
    pub(crate) fn create<S>(
        rt: &Runtime,
        stream: S,
        initial: Option<T>,
        on_done: Option<Box<dyn FnOnce()>>,
        name: Option<String>,
    ) -> Self
    where
        S: Stream<Item = T> + 'static,
    {
        let core = ProducerCore::new(rt, "stream_raw", name, initial);

        let weak_core = Rc::downgrade(&core);
        let pump = async move {
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                let Some(core) = weak_core.upgrade() else {
                    return;
                };
                let _ = core.set_raw(value);
            }
            if let Some(on_done) = on_done {
                on_done();
            }
        };
        let (pump, abort) = abortable(pump);
        rt.spawn_local(async move {
            let _ = pump.await;
        });
        core.on_dispose(move || abort.abort());

        Self { core }
    }
}

impl<T: Clone + 'static> Beacon<T> for RawStreamBeacon<T> {
    fn core(&self) -> &Rc<ProducerCore<T>> {
        &self.core
    }
}

// ---------------------------------------------------------------------------
// Outbound: to_stream
// ---------------------------------------------------------------------------

struct StreamShared<T> {
    queue: VecDeque<T>,
    waker: Option<Waker>,
    done: bool,
}

/// A `futures::Stream` view of a cell: yields the value at subscription
/// time, then every subsequent change, and ends when the cell is disposed.
///
/// Dropping the stream releases its subscription and fires the `on_cancel`
/// hook (if any).
pub struct BeaconStream<T: 'static> {
    shared: Rc<RefCell<StreamShared<T>>>,
    subscription: Subscription,
    on_cancel: Option<Box<dyn FnOnce()>>,
}

impl<T: Clone + 'static> BeaconStream<T> {
    pub(crate) fn create<B: Beacon<T>>(beacon: &B, on_cancel: Option<Box<dyn FnOnce()>>) -> Self {
        let shared = Rc::new(RefCell::new(StreamShared {
            queue: VecDeque::new(),
            waker: None,
            done: false,
        }));

        if let Some(current) = beacon.core().peek() {
            shared.borrow_mut().queue.push_back(current);
        }

        let push_shared = Rc::clone(&shared);
        let subscription = beacon.subscribe_with(
            move |value: &T| {
                let mut shared = push_shared.borrow_mut();
                shared.queue.push_back(value.clone());
                if let Some(waker) = shared.waker.take() {
                    waker.wake();
                }
            },
            SubscribeOptions::inline(),
        );

        let done_shared = Rc::clone(&shared);
        beacon.on_dispose(move || {
            let mut shared = done_shared.borrow_mut();
            shared.done = true;
            if let Some(waker) = shared.waker.take() {
                waker.wake();
            }
        });

        Self {
            shared,
            subscription,
            on_cancel,
        }
    }
}

impl<T: 'static> Stream for BeaconStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut shared = self.shared.borrow_mut();
        if let Some(value) = shared.queue.pop_front() {
            return Poll::Ready(Some(value));
        }
        if shared.done {
            return Poll::Ready(None);
        }
        shared.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T: 'static> Drop for BeaconStream<T> {
    fn drop(&mut self) {
        self.subscription.dispose();
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound: next
// ---------------------------------------------------------------------------

struct NextShared<T> {
    result: Option<T>,
    waker: Option<Waker>,
    subscription: Option<Subscription>,
    timer: Option<TimerHandle>,
}

impl<T> NextShared<T> {
    /// Commit a result and release the subscription and timer immediately.
    /// Idempotent: later matches and timer fires are ignored.
    fn resolve(shared: &Rc<RefCell<Self>>, value: T) {
        let mut inner = shared.borrow_mut();
        if inner.result.is_some() {
            return;
        }
        inner.result = Some(value);
        let subscription = inner.subscription.take();
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
        }
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
        drop(inner);
        if let Some(subscription) = subscription {
            subscription.dispose();
        }
    }
}

/// One-shot future for the next value of a cell.
///
/// Resolves with the next accepted value matching the filter; with a
/// timeout, resolves at the deadline with the value held at that moment (or
/// keeps waiting if the cell is still empty then). The subscription is
/// released the moment the future resolves.
pub struct NextValue<T: 'static> {
    shared: Rc<RefCell<NextShared<T>>>,
}

impl<T: Clone + 'static> NextValue<T> {
    pub(crate) fn create<B: Beacon<T>>(
        beacon: &B,
        filter: Option<Box<dyn Fn(&T) -> bool>>,
        timeout: Option<Duration>,
    ) -> Self {
        let shared = Rc::new(RefCell::new(NextShared {
            result: None,
            waker: None,
            subscription: None,
            timer: None,
        }));

        let match_shared = Rc::clone(&shared);
        let subscription = beacon.subscribe_with(
            move |value: &T| {
                let passes = filter.as_ref().map_or(true, |f| f(value));
                if passes {
                    NextShared::resolve(&match_shared, value.clone());
                }
            },
            SubscribeOptions::inline(),
        );
        shared.borrow_mut().subscription = Some(subscription);

        if let Some(timeout) = timeout {
            let core = Rc::clone(beacon.core());
            let rt = core.runtime().clone();
            let timeout_shared = Rc::clone(&shared);
            let timer = rt.schedule_after(timeout, move || {
                if let Some(current) = core.peek() {
                    NextShared::resolve(&timeout_shared, current);
                }
            });
            shared.borrow_mut().timer = Some(timer);
        }

        Self { shared }
    }
}

impl<T: 'static> NextValue<T> {
    /// Cancel without resolving: releases the subscription and the timer.
    pub fn cancel(&self) {
        let mut inner = self.shared.borrow_mut();
        let subscription = inner.subscription.take();
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
        }
        drop(inner);
        if let Some(subscription) = subscription {
            subscription.dispose();
        }
    }
}

impl<T: 'static> std::future::Future for NextValue<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut shared = self.shared.borrow_mut();
        if let Some(value) = shared.result.take() {
            return Poll::Ready(value);
        }
        shared.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T: 'static> Drop for NextValue<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    use lodestar_core::WritableBeacon;

    use crate::creator::OpsRuntimeExt;
    use crate::ext::BeaconOps;

    #[test]
    fn from_stream_maps_items_to_async_values() {
        let (rt, _clock) = Runtime::new_test();
        let (tx, rx) = mpsc::unbounded::<anyhow::Result<i32>>();
        let cell = rt.from_stream(rx, false);

        rt.flush().unwrap();
        assert!(cell.status().is_loading());

        tx.unbounded_send(Ok(1)).unwrap();
        rt.flush().unwrap();
        assert_eq!(cell.status(), AsyncValue::Data(1));

        tx.unbounded_send(Err(anyhow::anyhow!("glitch"))).unwrap();
        rt.flush().unwrap();
        let status = cell.status();
        assert!(status.is_error());
        assert_eq!(status.last_data(), Some(&1));

        // Not cancelled on error: later items still arrive.
        tx.unbounded_send(Ok(2)).unwrap();
        rt.flush().unwrap();
        assert_eq!(cell.status(), AsyncValue::Data(2));
    }

    #[test]
    fn from_stream_cancel_on_error_stops_pumping() {
        let (rt, _clock) = Runtime::new_test();
        let (tx, rx) = mpsc::unbounded::<anyhow::Result<i32>>();
        let cell = rt.from_stream(rx, true);

        tx.unbounded_send(Err(anyhow::anyhow!("fatal"))).unwrap();
        tx.unbounded_send(Ok(9)).unwrap();
        rt.flush().unwrap();
        assert!(cell.status().is_error(), "error committed");
        rt.flush().unwrap();
        assert!(cell.status().is_error(), "pump stopped before Ok(9)");
    }

    #[test]
    fn from_stream_raw_feeds_values() {
        let (rt, _clock) = Runtime::new_test();
        let (tx, rx) = mpsc::unbounded::<i32>();
        let done = Rc::new(std::cell::Cell::new(false));
        let done2 = Rc::clone(&done);
        let cell = rt.from_stream_raw(rx, Some(0), Some(Box::new(move || done2.set(true))));

        assert_eq!(cell.peek(), 0);
        tx.unbounded_send(5).unwrap();
        rt.flush().unwrap();
        assert_eq!(cell.peek(), 5);

        drop(tx);
        rt.flush().unwrap();
        assert!(done.get(), "on_done fired at stream end");
        assert_eq!(cell.peek(), 5);
    }

    #[test]
    fn disposed_stream_cell_stops_receiving() {
        let (rt, _clock) = Runtime::new_test();
        let (tx, rx) = mpsc::unbounded::<i32>();
        let cell = rt.from_stream_raw(rx, Some(0), None);

        cell.dispose();
        tx.unbounded_send(1).unwrap();
        rt.flush().unwrap();
        assert_eq!(cell.peek(), 0, "pump aborted on dispose");
    }

    #[test]
    fn to_stream_yields_current_then_changes() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(1);
        let mut stream = cell.to_stream();

        cell.set(2);
        cell.set(3);

        let collected = rt.run_until(async {
            let mut out = Vec::new();
            for _ in 0..3 {
                out.push(stream.next().await.unwrap());
            }
            out
        });
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[test]
    fn to_stream_ends_when_cell_disposed() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(1);
        let mut stream = cell.to_stream();
        cell.dispose();

        let items = rt.run_until(async {
            let mut out = Vec::new();
            while let Some(v) = stream.next().await {
                out.push(v);
            }
            out
        });
        assert_eq!(items, vec![1], "initial value then end-of-stream");
    }

    #[test]
    fn dropping_stream_releases_subscription_and_fires_on_cancel() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(1);
        let cancelled = Rc::new(std::cell::Cell::new(false));
        let cancelled2 = Rc::clone(&cancelled);
        {
            let _stream =
                BeaconStream::create(&cell, Some(Box::new(move || cancelled2.set(true))));
            assert_eq!(cell.listeners_count(), 1);
        }
        assert!(cancelled.get());
        assert_eq!(cell.listeners_count(), 0);
    }

    #[test]
    fn next_resolves_on_matching_value() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(0);
        let next = cell.next_where(|v| *v > 2);

        cell.set(1);
        cell.set(3);
        cell.set(4);
        let value = rt.run_until(next);
        assert_eq!(value, 3, "first match wins, later writes ignored");
        assert_eq!(cell.listeners_count(), 0, "subscription released");
    }

    #[test]
    fn next_timeout_resolves_with_current_value() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(7);
        let next = cell.next_timeout(Duration::from_millis(10));

        rt.advance(Duration::from_millis(10)).unwrap();
        let value = rt.run_until(next);
        assert_eq!(value, 7);
        assert_eq!(cell.listeners_count(), 0);
    }

    #[test]
    fn next_value_before_timeout_wins() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(0);
        let next = cell.next_timeout(Duration::from_millis(50));

        cell.set(9);
        rt.advance(Duration::from_millis(50)).unwrap();
        let value = rt.run_until(next);
        assert_eq!(value, 9);
        assert_eq!(rt.pending_timers(), 0, "timeout cancelled at resolve");
    }
}
