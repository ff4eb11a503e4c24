//! End-to-end scenarios across the whole cell zoo.
//!
//! Each test drives a small graph the way an application would — writes,
//! batches, timers, async computes — and asserts the externally observable
//! sequence of notifications:
//!
//! 1. Batched counter writes coalesce to one notification.
//! 2. Deferred-mode writes coalesce per flush turn.
//! 3. Debounce commits one settled value per burst.
//! 4. Throttle passes the first write and drops/queues the rest.
//! 5. Buffered-count commits exact snapshots.
//! 6. Async derivations follow Loading→Data with latest-wins.
//! 7. Undo/redo walks a bounded history ring.
//! 8. Cross-variant composition (wrap + derive + effect) stays consistent.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use web_time::Duration;

use lodestar::prelude::*;

#[test]
fn counter_batch_coalesces_to_final_value() {
    let (rt, _clock) = Runtime::new_test();
    let counter = rt.writable(0);
    let log = Rc::new(RefCell::new(Vec::new()));
    let log2 = Rc::clone(&log);
    let _sub = counter.subscribe_with(
        move |v| log2.borrow_mut().push(*v),
        SubscribeOptions::new().with_start_now(false),
    );

    rt.batch(|| {
        counter.set(1);
        counter.set(2);
        counter.set(3);
    });
    rt.flush().unwrap();

    assert_eq!(*log.borrow(), vec![3]);
    assert_eq!(counter.peek(), 3);
    // Writes mutate immediately inside the batch; only notification is
    // deferred, so previous() reflects the write before the last one.
    assert_eq!(counter.previous(), Some(2));
}

#[test]
fn deferred_mode_delivers_once_per_turn() {
    let (rt, _clock) = Runtime::new_test();
    let cell = rt.writable(0);
    let calls = Rc::new(RefCell::new(0u32));
    let calls2 = Rc::clone(&calls);
    let _sub = cell.subscribe_with(
        move |_| *calls2.borrow_mut() += 1,
        SubscribeOptions::new().with_start_now(false),
    );

    for v in 1..=5 {
        cell.set(v);
    }
    assert_eq!(*calls.borrow(), 0, "nothing before the turn completes");
    rt.flush().unwrap();
    assert_eq!(*calls.borrow(), 1);

    cell.set(9);
    rt.flush().unwrap();
    assert_eq!(*calls.borrow(), 2, "next turn delivers again");
}

#[test]
fn search_box_debounce_settles_on_the_last_keystroke() {
    let (rt, _clock) = Runtime::new_test();
    let query = rt.debounced(String::new(), Duration::from_millis(10));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen2 = Rc::clone(&seen);
    let _sub = query.subscribe_with(
        move |v: &String| seen2.borrow_mut().push(v.clone()),
        SubscribeOptions::new().with_start_now(false),
    );

    query.set("a".into());
    rt.advance(Duration::from_millis(1)).unwrap();
    query.set("ap".into());
    rt.advance(Duration::from_millis(1)).unwrap();
    query.set("apple".into());

    rt.advance(Duration::from_millis(15)).unwrap();
    assert_eq!(*seen.borrow(), vec!["apple".to_string()]);
}

#[test]
fn throttle_with_drop_passes_first_write_per_window() {
    let (rt, _clock) = Runtime::new_test();
    let cell = rt.throttled(0, Duration::from_millis(10), true);

    cell.set(1);
    cell.set(2);
    cell.set(3);
    assert_eq!(cell.peek(), 1);

    rt.advance(Duration::from_millis(11)).unwrap();
    cell.set(4);
    assert_eq!(cell.peek(), 4);
}

#[test]
fn buffered_count_commits_exact_snapshots() {
    let (rt, _clock) = Runtime::new_test();
    let buffer = rt.buffered_count::<i32>(3);

    buffer.add(1);
    buffer.add(2);
    buffer.add(3);
    assert_eq!(buffer.peek(), vec![1, 2, 3]);

    buffer.add(4);
    assert_eq!(buffer.peek(), vec![1, 2, 3], "partial batch pending");
    buffer.add(5);
    buffer.add(6);
    assert_eq!(buffer.peek(), vec![4, 5, 6]);
}

#[test]
fn async_derivation_reloads_and_keeps_latest() {
    let (rt, _clock) = Runtime::new_test();
    let input = rt.writable(1);
    let loaded = {
        let input = input.clone();
        let rt2 = rt.clone();
        rt.async_derived(move || {
            let v = input.get();
            let delay = rt2.delay(Duration::from_millis(20));
            async move {
                delay.await;
                Ok(v * 10)
            }
        })
    };
    let states = Rc::new(RefCell::new(Vec::new()));
    let states2 = Rc::clone(&states);
    let _sub = loaded.subscribe_with(
        move |v: &AsyncValue<i32>| states2.borrow_mut().push(v.clone()),
        SubscribeOptions::new().with_start_now(false),
    );

    rt.advance(Duration::from_millis(20)).unwrap();
    assert_eq!(loaded.status(), AsyncValue::Data(10));

    // Write during the reload; the first in-flight compute is superseded.
    input.set(2);
    rt.flush().unwrap();
    assert_eq!(
        loaded.status(),
        AsyncValue::Loading { previous: Some(10) }
    );
    input.set(3);
    rt.flush().unwrap();

    rt.advance(Duration::from_millis(40)).unwrap();
    assert_eq!(loaded.status(), AsyncValue::Data(30));

    let saw_data_20 = states
        .borrow()
        .iter()
        .any(|s| matches!(s, AsyncValue::Data(20)));
    assert!(!saw_data_20, "superseded run never committed");
}

#[test]
fn undo_redo_walks_bounded_history() {
    let (rt, _clock) = Runtime::new_test();
    let cell = rt.undo_redo(0, 3);

    for v in [1, 2, 3, 4] {
        cell.set(v);
    }
    assert_eq!(cell.history(), vec![2, 3, 4]);

    assert!(cell.undo());
    assert_eq!(cell.peek(), 3);
    assert!(cell.undo());
    assert_eq!(cell.peek(), 2);
    assert!(!cell.undo(), "bottom of the ring");

    assert!(cell.redo());
    assert!(cell.redo());
    assert_eq!(cell.peek(), 4);
    assert!(!cell.redo(), "top of the ring");
}

#[test]
fn wrap_derive_effect_compose() {
    let (rt, _clock) = Runtime::new_test();
    rt.use_sync();

    // Raw keystrokes feed a filtered mirror; a derivation formats it; an
    // effect records what the UI would render.
    let keystrokes = rt.writable(String::new());
    let non_empty = rt.filtered_lazy(|_prev, next: &String| !next.is_empty());
    wrap(&non_empty, &keystrokes, WrapOptions::new().with_start_now(false)).unwrap();

    let banner = {
        let non_empty = non_empty.clone();
        rt.derived(move || {
            non_empty
                .try_get()
                .map(|q| format!("searching: {q}"))
                .unwrap_or_else(|_| "idle".to_string())
        })
    };

    let rendered = Rc::new(RefCell::new(Vec::new()));
    let _fx = {
        let banner = banner.clone();
        let rendered = Rc::clone(&rendered);
        rt.effect(move || rendered.borrow_mut().push(banner.get()))
    };

    keystrokes.set("rust".to_string());
    keystrokes.set(String::new()); // filtered out downstream
    keystrokes.set("lodestar".to_string());

    assert_eq!(
        *rendered.borrow(),
        vec![
            "idle".to_string(),
            "searching: rust".to_string(),
            "searching: lodestar".to_string(),
        ]
    );
}

#[test]
fn group_owns_a_feature_scope() {
    let (rt, _clock) = Runtime::new_test();
    rt.use_sync();
    let group = rt.group();

    let count = group.writable(0);
    let label = group.derived({
        let count = count.clone();
        move || format!("count={}", count.get())
    });
    let effect_runs = Rc::new(RefCell::new(0u32));
    group.effect({
        let label = label.clone();
        let effect_runs = Rc::clone(&effect_runs);
        move || {
            let _ = label.get();
            *effect_runs.borrow_mut() += 1;
        }
    });

    count.set(2);
    assert_eq!(label.peek(), "count=2");
    assert_eq!(*effect_runs.borrow(), 2);

    group.reset_all();
    assert_eq!(count.peek(), 0);

    group.dispose_all();
    count.set(9);
    assert_eq!(*effect_runs.borrow(), 3, "reset notified once, then silence");
    assert!(count.is_disposed());
}

#[test]
fn sleeping_derivation_skips_work_while_unwatched() {
    let (rt, _clock) = Runtime::new_test();
    rt.use_sync();
    let base = rt.writable(1);
    let computes = Rc::new(RefCell::new(0u32));
    let derived = {
        let base = base.clone();
        let computes = Rc::clone(&computes);
        rt.derived(move || {
            *computes.borrow_mut() += 1;
            base.get() * 2
        })
    };

    let sub = derived.subscribe(|_| {});
    sub.dispose();

    let asleep_at = *computes.borrow();
    for v in 2..=10 {
        base.set(v);
    }
    assert_eq!(*computes.borrow(), asleep_at, "no recomputes while asleep");

    assert_eq!(derived.get(), 20, "wake sees the latest value");
    assert_eq!(*computes.borrow(), asleep_at + 1, "exactly one recompute");
}

#[test]
fn timestamped_values_follow_the_test_clock() {
    let (rt, clock) = Runtime::new_test();
    let status = rt.timestamped(Some("boot"));
    let t0 = status.timestamp().unwrap();

    rt.advance(Duration::from_millis(250)).unwrap();
    status.set("ready");

    assert_eq!(
        status.timestamp().unwrap().duration_since(t0),
        Duration::from_millis(250)
    );
    assert_eq!(status.timestamp().unwrap(), clock.now());
}

#[test]
fn streams_round_trip_through_the_graph() {
    use futures::channel::mpsc;
    use futures::StreamExt;

    let (rt, _clock) = Runtime::new_test();
    let (tx, rx) = mpsc::unbounded::<i32>();
    let inbound = rt.from_stream_raw(rx, Some(0), None);

    let doubled = {
        let inbound = inbound.clone();
        rt.derived(move || inbound.get() * 2)
    };
    let mut outbound = doubled.to_stream();

    tx.unbounded_send(1).unwrap();
    tx.unbounded_send(2).unwrap();
    rt.flush().unwrap();

    // Both inbound items land in one flush turn, so the derivation runs once
    // and the outbound stream sees the coalesced result.
    let collected = rt.run_until(async {
        let mut out = Vec::new();
        for _ in 0..2 {
            out.push(outbound.next().await.unwrap());
        }
        out
    });
    assert_eq!(collected, vec![0, 4]);
}
