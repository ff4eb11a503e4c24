#![forbid(unsafe_code)]

//! Cell variants layered on the lodestar core engine.
//!
//! Everything here is assembled from `lodestar_core`'s `ProducerCore` /
//! `ConsumerCore` building blocks:
//!
//! - [`AsyncBeacon`] + [`AsyncValue`] — async derivations with latest-wins
//!   cancellation and stale-while-revalidate `previous` carry-over.
//! - Time operators — [`Debounced`], [`Throttled`], [`BufferedCount`],
//!   [`BufferedTime`], [`Filtered`], [`Timestamped`], [`UndoRedo`].
//! - Adapters — [`StreamBeacon`] / [`RawStreamBeacon`] inbound,
//!   [`BeaconStream`] / [`NextValue`] outbound.
//! - Collections — [`ListBeacon`], [`SetBeacon`], [`MapBeacon`].
//! - [`Family`] (keyed factory cache) and [`Group`] (bulk lifetime).
//! - [`wrap`] / [`wrap_with`] and the [`BeaconOps`] composition extensions.
//!
//! The factory surface lives on [`OpsRuntimeExt`], extending
//! `lodestar_core::Runtime`.

pub mod async_beacon;
pub mod async_value;
pub mod buffered;
pub mod collections;
pub mod creator;
pub mod debounced;
pub mod ext;
pub mod family;
pub mod filtered;
pub mod group;
pub mod logging;
pub mod stream;
pub mod throttled;
pub mod timestamped;
pub mod undo_redo;
pub mod wrap;

pub use async_beacon::{AsyncBeacon, AsyncOptions};
pub use async_value::{AsyncError, AsyncValue};
pub use buffered::{BufferedCount, BufferedTime};
pub use collections::{ListBeacon, MapBeacon, SetBeacon};
pub use creator::OpsRuntimeExt;
pub use debounced::Debounced;
pub use ext::BeaconOps;
pub use family::Family;
pub use filtered::Filtered;
pub use group::{Group, GroupMember};
pub use stream::{BeaconStream, NextValue, RawStreamBeacon, StreamBeacon};
pub use throttled::Throttled;
pub use timestamped::Timestamped;
pub use undo_redo::UndoRedo;
pub use wrap::{wrap, wrap_with, Feedable, WrapOptions};
