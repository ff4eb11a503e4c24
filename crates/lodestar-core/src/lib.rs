#![forbid(unsafe_code)]

//! Reactive value graph engine.
//!
//! This crate is the dependency-tracking core of lodestar: observable cells
//! ("beacons"), derived computations, effects, and the scheduler that
//! propagates writes through the graph with minimal redundant work.
//!
//! - [`Runtime`] — one isolated graph: frame stack, scheduler, clock, timers.
//!   Also the creator: cells are built through its factory methods.
//! - [`Writable`] — equality-gated externally written cell.
//! - [`Derived`] — lazy, sleep-when-unwatched computed cell.
//! - [`Effect`] — side-effecting consumer re-run on dependency change.
//! - [`Beacon`] / [`WritableBeacon`] — the shared cell surface.
//! - [`ProducerCore`] / [`ConsumerCore`] — the building blocks richer cell
//!   variants (async cells, time operators) are assembled from.
//!
//! Everything is single-threaded: handles are `Rc`-backed and `!Send` by
//! construction. Dependencies are discovered by read-tracking — a consumer's
//! dependency set is whatever it actually read during its last run, never a
//! declaration.
//!
//! ```
//! use lodestar_core::{Beacon, Runtime, WritableBeacon};
//!
//! let (rt, _clock) = Runtime::new_test();
//! rt.use_sync();
//!
//! let price = rt.writable(10);
//! let qty = rt.writable(2);
//! let total = {
//!     let (price, qty) = (price.clone(), qty.clone());
//!     rt.derived(move || price.get() * qty.get())
//! };
//! assert_eq!(total.get(), 20);
//!
//! qty.set(5);
//! assert_eq!(total.get(), 50);
//! ```

pub mod beacon;
pub mod clock;
pub mod consumer;
pub mod derived;
pub mod effect;
pub mod error;
pub mod logging;
pub mod producer;
pub mod runtime;
pub mod scheduler;
pub mod subscription;
pub mod writable;

pub use beacon::{Beacon, WritableBeacon};
pub use clock::{Delay, TestClock, TimerHandle};
pub use consumer::{ConsumerCore, TrackMode};
pub use derived::{Derived, DerivedOptions};
pub use effect::{Effect, EffectOptions};
pub use error::BeaconError;
pub use producer::{AnyProducer, ProducerCore};
pub use runtime::Runtime;
pub use scheduler::SchedulerMode;
pub use subscription::{SubscribeOptions, Subscription};
pub use writable::Writable;
