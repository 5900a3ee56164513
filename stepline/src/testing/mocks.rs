//! Canned actions and doubles for testing pipelines.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::actions::Action;
use crate::control::{ManualClock, RunControl, Sleeper};
use crate::core::StepOutcome;
use crate::errors::ActionError;

/// Appends `suffix` to a string value.
#[must_use]
pub fn append(suffix: &str) -> Action<String> {
    let suffix = suffix.to_string();
    Action::unary(move |value: String| value + &suffix)
}

/// Always fails with `message`.
#[must_use]
pub fn fail<T: Send + 'static>(message: &str) -> Action<T> {
    let message = message.to_string();
    Action::fallible(move |_: T| Err::<T, _>(ActionError::new(message.clone())))
}

/// Replaces the value with `value` and short-circuits.
#[must_use]
pub fn short_circuit_with(value: &str) -> Action<String> {
    let value = value.to_string();
    Action::controlled(move |_: String, _: &mut RunControl| StepOutcome::ShortCircuit(value.clone()))
}

/// Shared, ordered log of step invocations.
#[derive(Debug, Clone, Default)]
pub struct InvocationLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl InvocationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns the entries in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Logs `tag` and passes the value through unchanged.
#[must_use]
pub fn record<T: Send + 'static>(log: &InvocationLog, tag: &str) -> Action<T> {
    let log = log.clone();
    let tag = tag.to_string();
    Action::unary(move |value: T| {
        log.push(tag.clone());
        value
    })
}

/// A sleeper that records requested delays instead of waiting.
///
/// When given a [`ManualClock`] it advances the clock by each delay, so
/// timings observe the "slept" time.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    clock: Option<Arc<ManualClock>>,
}

impl RecordingSleeper {
    /// Creates a sleeper that only records.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sleeper that also advances `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            delays: Mutex::new(Vec::new()),
            clock: Some(clock),
        }
    }

    /// Returns the requested delays in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
    }
}
