#![forbid(unsafe_code)]

//! Composition extensions available on every cell handle.
//!
//! Blanket-implemented over [`Beacon`], so `use lodestar_ops::BeaconOps`
//! (or the facade prelude) puts `to_stream`, `next*` and `buffer_*` on any
//! cell.

use web_time::Duration;

use lodestar_core::Beacon;

use crate::buffered::{BufferedCount, BufferedTime};
use crate::stream::{BeaconStream, NextValue};
use crate::wrap::{wrap, WrapOptions};

/// Composition operators on any cell handle.
pub trait BeaconOps<T: Clone + 'static>: Beacon<T> + Sized {
    /// A `futures::Stream` of this cell: current value on subscription, then
    /// every change. Dropping the stream releases the subscription.
    fn to_stream(&self) -> BeaconStream<T> {
        BeaconStream::create(self, None)
    }

    /// [`to_stream`](BeaconOps::to_stream) with a hook fired when the stream
    /// is dropped.
    fn to_stream_with_cancel(&self, on_cancel: impl FnOnce() + 'static) -> BeaconStream<T> {
        BeaconStream::create(self, Some(Box::new(on_cancel)))
    }

    /// One-shot future for the next accepted value.
    fn next(&self) -> NextValue<T> {
        NextValue::create(self, None, None)
    }

    /// One-shot future for the next value matching `filter`.
    fn next_where(&self, filter: impl Fn(&T) -> bool + 'static) -> NextValue<T> {
        NextValue::create(self, Some(Box::new(filter)), None)
    }

    /// One-shot future for the next value; at the deadline it resolves with
    /// the value held at that moment instead.
    fn next_timeout(&self, timeout: Duration) -> NextValue<T> {
        NextValue::create(self, None, Some(timeout))
    }

    /// Filtered one-shot future with a deadline.
    fn next_where_timeout(
        &self,
        filter: impl Fn(&T) -> bool + 'static,
        timeout: Duration,
    ) -> NextValue<T> {
        NextValue::create(self, Some(Box::new(filter)), Some(timeout))
    }

    /// A [`BufferedCount`] fed by this cell's subsequent changes.
    fn buffer_count(&self, capacity: usize) -> BufferedCount<T> {
        let buffer = BufferedCount::create(self.core().runtime(), None, capacity, None);
        let _ = wrap(&buffer, self, WrapOptions::new().with_start_now(false));
        buffer
    }

    /// A [`BufferedTime`] fed by this cell's subsequent changes.
    fn buffer_time(&self, duration: Duration) -> BufferedTime<T> {
        let buffer = BufferedTime::create(self.core().runtime(), duration, None);
        let _ = wrap(&buffer, self, WrapOptions::new().with_start_now(false));
        buffer
    }
}

impl<T: Clone + 'static, B: Beacon<T>> BeaconOps<T> for B {}

#[cfg(test)]
mod tests {
    use super::*;

    use lodestar_core::{Runtime, WritableBeacon};

    #[test]
    fn buffer_count_collects_changes() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(0);
        let buffered = cell.buffer_count(2);

        cell.set(1);
        cell.set(2);
        assert_eq!(buffered.peek(), vec![1, 2]);

        cell.set(3);
        assert_eq!(buffered.current_buffer(), vec![3]);
    }

    #[test]
    fn buffer_time_collects_a_window() {
        let (rt, _clock) = Runtime::new_test();
        let cell = rt.writable(0);
        let buffered = cell.buffer_time(Duration::from_millis(10));

        cell.set(1);
        cell.set(2);
        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(buffered.peek(), vec![1, 2]);
    }
}
