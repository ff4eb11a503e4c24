#![forbid(unsafe_code)]

//! Semantic errors raised by the value graph.
//!
//! Every variant names the cell involved so failures stay diagnosable even
//! when they surface far from the triggering call (e.g. out of a deferred
//! flush). Errors raised inside a consumer run never corrupt the graph: the
//! failing write is rejected, the consumer's dependency set is rolled back,
//! and the scheduler keeps draining.

use thiserror::Error;

/// Errors produced by graph operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeaconError {
    /// A lazy cell was read before its first write.
    #[error("cannot read `{name}`: no value has been written yet")]
    LazyRead {
        /// Name of the empty cell.
        name: String,
    },

    /// A consumer wrote a producer it currently depends on, in the same run.
    #[error("`{consumer}` wrote `{name}` while depending on it in the same run")]
    CircularDependency {
        /// Name of the producer being written.
        name: String,
        /// Name of the consumer whose run performed the write.
        consumer: String,
    },

    /// `reset` was called on a lazy cell that was never written.
    #[error("cannot reset `{name}`: no value was ever written")]
    Uninitialized {
        /// Name of the never-written cell.
        name: String,
    },

    /// `wrap` with `start_now` targeted a cell that holds no value yet.
    #[error("cannot wrap empty `{name}` with start_now: the target has no value to feed")]
    WrapEmptyTarget {
        /// Name of the empty wrap target.
        name: String,
    },
}

impl BeaconError {
    /// Whether this error was produced by circular-dependency detection.
    #[must_use]
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_cell() {
        let err = BeaconError::LazyRead {
            name: "query".into(),
        };
        assert!(err.to_string().contains("`query`"));
    }

    #[test]
    fn circular_display_names_both_sides() {
        let err = BeaconError::CircularDependency {
            name: "count".into(),
            consumer: "effect#3".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`count`"));
        assert!(msg.contains("`effect#3`"));
        assert!(err.is_circular());
    }
}
