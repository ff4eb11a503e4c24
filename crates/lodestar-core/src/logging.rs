#![forbid(unsafe_code)]

//! Logging facade.
//!
//! With the `tracing` feature enabled, these re-export the `tracing` macros.
//! Without it, the no-op fallbacks below compile every call site away so the
//! engine carries no logging cost in minimal builds.

#[cfg(feature = "tracing")]
pub use tracing::{debug, trace, warn};

/// No-op `trace!` used when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{}};
}

/// No-op `debug!` used when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{}};
}

/// No-op `warn!` used when the `tracing` feature is disabled.
#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{}};
}
