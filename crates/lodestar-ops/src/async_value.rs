#![forbid(unsafe_code)]

//! The async value lifecycle.
//!
//! [`AsyncValue`] is the observable state of every async cell: `Idle` before
//! a manual start, `Loading` while a compute is in flight, then `Data` or
//! `Error`. `Loading` and `Error` carry the last `Data` as `previous`, so
//! consumers can keep rendering stale data while a refresh is in flight.
//!
//! Errors are `anyhow::Error` behind an `Rc` so the whole value stays cheap
//! to clone through the graph.

use std::rc::Rc;

/// Shared failure payload of [`AsyncValue::Error`].
pub type AsyncError = Rc<anyhow::Error>;

/// State of an async computation, with stale-data carry-over.
pub enum AsyncValue<T> {
    /// Not started yet (manual-start cells).
    Idle,
    /// A compute is in flight. `previous` is the last committed data, if any.
    Loading {
        /// Last `Data` value, carried across the reload.
        previous: Option<T>,
    },
    /// The compute resolved.
    Data(T),
    /// The compute failed. `previous` is the last committed data, if any.
    Error {
        /// The failure.
        error: AsyncError,
        /// Last `Data` value, carried across the failure.
        previous: Option<T>,
    },
}

impl<T> AsyncValue<T> {
    /// Wrap a failure, preserving `previous`.
    pub fn from_error(error: anyhow::Error, previous: Option<T>) -> Self {
        Self::Error {
            error: Rc::new(error),
            previous,
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// The committed data, if currently in `Data`.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }

    /// The freshest data available: `Data` itself, or the `previous` carried
    /// by `Loading`/`Error`.
    #[must_use]
    pub fn last_data(&self) -> Option<&T> {
        match self {
            Self::Data(value) => Some(value),
            Self::Loading { previous } | Self::Error { previous, .. } => previous.as_ref(),
            Self::Idle => None,
        }
    }

    /// The failure, if currently in `Error`.
    #[must_use]
    pub fn error(&self) -> Option<&AsyncError> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Map the data (and carried `previous`) through `f`.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> AsyncValue<U> {
        match self {
            Self::Idle => AsyncValue::Idle,
            Self::Loading { previous } => AsyncValue::Loading {
                previous: previous.map(&mut f),
            },
            Self::Data(value) => AsyncValue::Data(f(value)),
            Self::Error { error, previous } => AsyncValue::Error {
                error,
                previous: previous.map(&mut f),
            },
        }
    }
}

impl<T: Clone> Clone for AsyncValue<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Idle => Self::Idle,
            Self::Loading { previous } => Self::Loading {
                previous: previous.clone(),
            },
            Self::Data(value) => Self::Data(value.clone()),
            Self::Error { error, previous } => Self::Error {
                error: Rc::clone(error),
                previous: previous.clone(),
            },
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading { previous } => f.debug_struct("Loading").field("previous", previous).finish(),
            Self::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Self::Error { error, previous } => f
                .debug_struct("Error")
                .field("error", error)
                .field("previous", previous)
                .finish(),
        }
    }
}

/// Errors compare by identity (same shared allocation), data by value.
impl<T: PartialEq> PartialEq for AsyncValue<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Idle, Self::Idle) => true,
            (Self::Loading { previous: a }, Self::Loading { previous: b }) => a == b,
            (Self::Data(a), Self::Data(b)) => a == b,
            (
                Self::Error {
                    error: ea,
                    previous: pa,
                },
                Self::Error {
                    error: eb,
                    previous: pb,
                },
            ) => Rc::ptr_eq(ea, eb) && pa == pb,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_data_follows_the_lifecycle() {
        let v: AsyncValue<i32> = AsyncValue::Idle;
        assert_eq!(v.last_data(), None);

        let v = AsyncValue::Loading { previous: Some(1) };
        assert_eq!(v.last_data(), Some(&1));

        let v = AsyncValue::Data(2);
        assert_eq!(v.last_data(), Some(&2));

        let v = AsyncValue::from_error(anyhow::anyhow!("boom"), Some(2));
        assert_eq!(v.last_data(), Some(&2));
        assert!(v.is_error());
    }

    #[test]
    fn map_carries_previous() {
        let v = AsyncValue::Loading { previous: Some(3) };
        let mapped = v.map(|n| n * 10);
        assert_eq!(mapped, AsyncValue::Loading { previous: Some(30) });
    }

    #[test]
    fn errors_compare_by_identity() {
        let shared = Rc::new(anyhow::anyhow!("boom"));
        let a = AsyncValue::<i32>::Error {
            error: Rc::clone(&shared),
            previous: None,
        };
        let b = AsyncValue::<i32>::Error {
            error: shared,
            previous: None,
        };
        let c = AsyncValue::<i32>::from_error(anyhow::anyhow!("boom"), None);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
