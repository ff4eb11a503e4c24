#![forbid(unsafe_code)]

//! Effects: side-effecting consumers with no value of their own.
//!
//! `effect(body)` runs the body once at creation to record its dependencies,
//! then re-runs it whenever one of them changes. The returned [`Effect`]
//! handle is the disposer: dropping it (or calling
//! [`dispose`](Effect::dispose)) clears the dependency subscriptions and
//! makes any queued re-run a no-op. [`Effect::forget`] keeps the effect
//! alive for the life of the graph.

use std::rc::Rc;

use crate::consumer::{ConsumerCore, TrackMode};
use crate::runtime::Runtime;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Creation options for [`Effect`]s.
#[derive(Debug, Clone)]
pub struct EffectOptions {
    pub(crate) name: Option<String>,
    pub(crate) support_conditional: bool,
}

impl Default for EffectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            support_conditional: true,
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Re-track dependencies on every run (`true`, default) or only on the
    /// first (`false`).
    #[must_use]
    pub fn with_conditional(mut self, support_conditional: bool) -> Self {
        self.support_conditional = support_conditional;
        self
    }
}

// ---------------------------------------------------------------------------
// Effect
// ---------------------------------------------------------------------------

/// Disposer handle for a side effect. Dropping it disposes the effect.
#[must_use = "dropping an Effect disposes it immediately; call .forget() to keep it running"]
pub struct Effect {
    consumer: Rc<ConsumerCore>,
}

impl Effect {
    pub(crate) fn create<F>(rt: &Runtime, options: EffectOptions, body: F) -> Self
    where
        F: FnMut() + 'static,
    {
        let mode = if options.support_conditional {
            TrackMode::Dynamic
        } else {
            TrackMode::Static
        };
        let consumer = ConsumerCore::new(rt, "effect", options.name, mode, body);
        consumer.run();
        Self { consumer }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.consumer.name()
    }

    /// Stop re-running and release all dependency subscriptions. Idempotent.
    pub fn dispose(&self) {
        self.consumer.dispose();
    }

    /// Whether the effect has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.consumer.is_disposed()
    }

    /// Number of producers the effect currently depends on.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.consumer.dependency_count()
    }

    /// Keep the effect running for the rest of the program without holding
    /// the handle.
    pub fn forget(self) {
        std::mem::forget(self);
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.consumer.dispose();
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("name", &self.consumer.name())
            .field("disposed", &self.consumer.is_disposed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
