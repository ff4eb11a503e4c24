#![forbid(unsafe_code)]

//! Wrap: compose one cell out of another.
//!
//! `wrap(receiver, target)` subscribes the receiver to the target and feeds
//! every emission through the receiver's own write policy (a debounced
//! receiver debounces them, a filtered receiver filters them, a buffered
//! receiver buffers them). `wrap_with` maps across value types first.
//!
//! # Invariants
//!
//! 1. Wrapping the same target twice is a no-op (tracked by producer id).
//! 2. `start_now` (the default) feeds the target's current value at wrap
//!    time and fails with `WrapEmptyTarget` when the target is empty.
//! 3. The wrap subscription lives exactly as long as the receiver.
//! 4. `dispose_together` installs mutual dispose hooks guarded against
//!    re-entry, so either side's disposal tears down both, once.
//!
//! A type mismatch between receiver and target without a mapper does not
//! compile, so no runtime error exists for it.

use std::cell::Cell;
use std::rc::Rc;

use lodestar_core::{AnyProducer, Beacon, BeaconError, SubscribeOptions};

// ---------------------------------------------------------------------------
// Feedable
// ---------------------------------------------------------------------------

/// A cell that accepts fed-in values: the receiver side of [`wrap`].
///
/// `feed` routes through the cell's own acceptance policy (equality gate,
/// debounce timer, filter predicate, buffer slot, ...).
pub trait Feedable<In: Clone + 'static>: Clone + 'static {
    /// Accept one value through the cell's write policy.
    fn feed(&self, value: In);

    /// Accept one value, bypassing the cell's gate where it has one.
    fn feed_force(&self, value: In) {
        self.feed(value);
    }

    /// The receiver's producer, type-erased for wrap bookkeeping.
    fn feed_anchor(&self) -> Rc<dyn AnyProducer>;
}

impl<T: Clone + PartialEq + 'static> Feedable<T> for lodestar_core::Writable<T> {
    fn feed(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set(value);
    }

    fn feed_force(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set_force(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

impl<T: Clone + PartialEq + 'static> Feedable<T> for crate::debounced::Debounced<T> {
    fn feed(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set(value);
    }

    fn feed_force(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set_force(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

impl<T: Clone + PartialEq + 'static> Feedable<T> for crate::throttled::Throttled<T> {
    fn feed(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set(value);
    }

    fn feed_force(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set_force(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

impl<T: Clone + PartialEq + 'static> Feedable<T> for crate::filtered::Filtered<T> {
    fn feed(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set(value);
    }

    fn feed_force(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set_force(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

impl<T: Clone + PartialEq + 'static> Feedable<T> for crate::undo_redo::UndoRedo<T> {
    fn feed(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set(value);
    }

    fn feed_force(&self, value: T) {
        use lodestar_core::WritableBeacon;
        self.set_force(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

impl<T: Clone + 'static> Feedable<T> for crate::timestamped::Timestamped<T> {
    fn feed(&self, value: T) {
        self.set(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

impl<T: Clone + 'static> Feedable<T> for crate::buffered::BufferedCount<T> {
    fn feed(&self, value: T) {
        self.add(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

impl<T: Clone + 'static> Feedable<T> for crate::buffered::BufferedTime<T> {
    fn feed(&self, value: T) {
        self.add(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

impl<T: Clone + 'static> Feedable<T> for crate::collections::ListBeacon<T> {
    fn feed(&self, value: T) {
        self.push(value);
    }

    fn feed_anchor(&self) -> Rc<dyn AnyProducer> {
        Rc::clone(self.core()) as Rc<dyn AnyProducer>
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options for [`wrap`] / [`wrap_with`].
#[derive(Debug, Clone, Copy)]
pub struct WrapOptions {
    /// Feed the target's current value at wrap time (fails on an empty
    /// target).
    pub start_now: bool,
    /// Install mutual dispose hooks between receiver and target.
    pub dispose_together: bool,
}

impl WrapOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_now: true,
            dispose_together: false,
        }
    }

    #[must_use]
    pub fn with_start_now(mut self, start_now: bool) -> Self {
        self.start_now = start_now;
        self
    }

    #[must_use]
    pub fn with_dispose_together(mut self, dispose_together: bool) -> Self {
        self.dispose_together = dispose_together;
        self
    }
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// wrap
// ---------------------------------------------------------------------------

/// Subscribe `receiver` to `target`, feeding every emission through the
/// receiver's write policy.
pub fn wrap<T, B, R>(receiver: &R, target: &B, options: WrapOptions) -> Result<(), BeaconError>
where
    T: Clone + 'static,
    B: Beacon<T>,
    R: Feedable<T>,
{
    wrap_with(receiver, target, options, |value: &T| value.clone())
}

/// [`wrap`] across value types: each target emission is mapped by `then`
/// before being fed to the receiver.
pub fn wrap_with<In, T, B, R>(
    receiver: &R,
    target: &B,
    options: WrapOptions,
    then: impl Fn(&In) -> T + 'static,
) -> Result<(), BeaconError>
where
    In: Clone + 'static,
    T: Clone + 'static,
    B: Beacon<In>,
    R: Feedable<T>,
{
    let anchor = receiver.feed_anchor();
    if !anchor.mark_wrapped(target.core().id()) {
        return Ok(());
    }

    if options.start_now {
        let current = target
            .core()
            .peek()
            .ok_or_else(|| BeaconError::WrapEmptyTarget {
                name: target.name().to_string(),
            })?;
        receiver.feed(then(&current));
    }

    let feed_receiver = receiver.clone();
    let subscription = target.subscribe_with(
        move |value: &In| feed_receiver.feed(then(value)),
        SubscribeOptions::inline(),
    );
    // The receiver owns the subscription for the rest of its life.
    anchor.add_dispose_hook(Box::new(move || subscription.dispose()));

    if options.dispose_together {
        let guard = Rc::new(Cell::new(false));
        let target_anchor: Rc<dyn AnyProducer> = Rc::clone(target.core()) as Rc<dyn AnyProducer>;

        let receiver_side = {
            let guard = Rc::clone(&guard);
            let weak_receiver = Rc::downgrade(&anchor);
            Box::new(move || {
                if !guard.replace(true) {
                    if let Some(receiver) = weak_receiver.upgrade() {
                        receiver.dispose_erased();
                    }
                }
            })
        };
        target_anchor.add_dispose_hook(receiver_side);

        let target_side = {
            let guard = Rc::clone(&guard);
            let weak_target = Rc::downgrade(&target_anchor);
            Box::new(move || {
                if !guard.replace(true) {
                    if let Some(target) = weak_target.upgrade() {
                        target.dispose_erased();
                    }
                }
            })
        };
        anchor.add_dispose_hook(target_side);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use web_time::Duration;

    use lodestar_core::{Runtime, WritableBeacon};

    use crate::creator::OpsRuntimeExt;

    #[test]
    fn wrap_feeds_current_value_and_changes() {
        let (rt, _clock) = Runtime::new_test();
        let source = rt.writable(1);
        let mirror = rt.lazy_writable::<i32>();

        wrap(&mirror, &source, WrapOptions::new()).unwrap();
        assert_eq!(mirror.peek(), 1, "start_now feeds the current value");

        source.set(2);
        assert_eq!(mirror.peek(), 2);
    }

    #[test]
    fn wrap_empty_target_with_start_now_fails() {
        let (rt, _clock) = Runtime::new_test();
        let source = rt.lazy_writable_named::<i32>("upstream");
        let mirror = rt.lazy_writable::<i32>();

        let err = wrap(&mirror, &source, WrapOptions::new()).unwrap_err();
        assert!(matches!(
            err,
            BeaconError::WrapEmptyTarget { name } if name == "upstream"
        ));

        // Without start_now the same wrap is fine.
        wrap(&mirror, &source, WrapOptions::new().with_start_now(false)).unwrap();
        source.set(5);
        assert_eq!(mirror.peek(), 5);
    }

    #[test]
    fn wrapping_twice_is_a_no_op() {
        let (rt, _clock) = Runtime::new_test();
        let source = rt.writable(0);
        let sink = rt.buffered_count::<i32>(10);

        wrap(&sink, &source, WrapOptions::new().with_start_now(false)).unwrap();
        wrap(&sink, &source, WrapOptions::new().with_start_now(false)).unwrap();

        source.set(1);
        assert_eq!(
            sink.current_buffer(),
            vec![1],
            "second wrap added no second subscription"
        );
    }

    #[test]
    fn wrap_with_maps_value_types() {
        let (rt, _clock) = Runtime::new_test();
        let source = rt.writable(21);
        let label = rt.lazy_writable::<String>();

        wrap_with(&label, &source, WrapOptions::new(), |n: &i32| {
            format!("n={n}")
        })
        .unwrap();
        assert_eq!(label.peek(), "n=21");

        source.set(42);
        assert_eq!(label.peek(), "n=42");
    }

    #[test]
    fn receiver_policy_applies_to_fed_values() {
        let (rt, _clock) = Runtime::new_test();
        let source = rt.writable(0);
        let debounced = rt.debounced_lazy::<i32>(Duration::from_millis(10));

        wrap(&debounced, &source, WrapOptions::new().with_start_now(false)).unwrap();

        source.set(1);
        source.set(2);
        assert!(debounced.is_empty(), "feeds are debounced like any write");

        rt.advance(Duration::from_millis(10)).unwrap();
        assert_eq!(debounced.peek(), 2);
    }

    #[test]
    fn receiver_dispose_releases_the_subscription() {
        let (rt, _clock) = Runtime::new_test();
        let source = rt.writable(0);
        let mirror = rt.lazy_writable::<i32>();
        wrap(&mirror, &source, WrapOptions::new().with_start_now(false)).unwrap();

        assert_eq!(source.listeners_count(), 1);
        mirror.dispose();
        assert_eq!(source.listeners_count(), 0);
    }

    #[test]
    fn dispose_together_tears_down_both_once() {
        let (rt, _clock) = Runtime::new_test();
        let source = rt.writable(0);
        let mirror = rt.lazy_writable::<i32>();
        wrap(
            &mirror,
            &source,
            WrapOptions::new().with_dispose_together(true),
        )
        .unwrap();

        source.dispose();
        assert!(mirror.is_disposed(), "receiver followed the target");
        assert!(source.is_disposed());
    }

    #[test]
    fn dispose_together_from_the_receiver_side() {
        let (rt, _clock) = Runtime::new_test();
        let source = rt.writable(0);
        let mirror = rt.lazy_writable::<i32>();
        wrap(
            &mirror,
            &source,
            WrapOptions::new().with_dispose_together(true),
        )
        .unwrap();

        mirror.dispose();
        assert!(source.is_disposed(), "target followed the receiver");
    }
}
