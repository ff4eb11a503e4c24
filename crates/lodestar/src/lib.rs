#![forbid(unsafe_code)]

//! Lodestar public facade crate.
//!
//! A reactive value graph runtime: observable cells ("beacons"), derived
//! computations, effects, async derivations, and time operators, with
//! dependencies discovered by read-tracking and writes propagated by a
//! batching scheduler.
//!
//! ```
//! use lodestar::prelude::*;
//!
//! let (rt, _clock) = Runtime::new_test();
//! rt.use_sync();
//!
//! let first = rt.writable("Ada".to_string());
//! let last = rt.writable("Lovelace".to_string());
//! let full = {
//!     let (first, last) = (first.clone(), last.clone());
//!     rt.derived(move || format!("{} {}", first.get(), last.get()))
//! };
//!
//! assert_eq!(full.get(), "Ada Lovelace");
//! last.set("Byron".to_string());
//! assert_eq!(full.get(), "Ada Byron");
//! ```

pub use lodestar_core as core;
pub use lodestar_ops as ops;

pub mod prelude {
    pub use lodestar_core::{
        Beacon, BeaconError, Derived, DerivedOptions, Effect, EffectOptions, Runtime,
        SchedulerMode, SubscribeOptions, Subscription, TestClock, TrackMode, Writable,
        WritableBeacon,
    };
    pub use lodestar_ops::{
        wrap, wrap_with, AsyncBeacon, AsyncOptions, AsyncValue, BeaconOps, BufferedCount,
        BufferedTime, Debounced, Family, Feedable, Filtered, Group, ListBeacon, MapBeacon,
        NextValue, OpsRuntimeExt, SetBeacon, StreamBeacon, Throttled, Timestamped, UndoRedo,
        WrapOptions,
    };
}
