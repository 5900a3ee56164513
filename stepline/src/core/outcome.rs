//! The tagged result of invoking a single step.

use crate::errors::ActionError;
use std::time::Duration;

/// A request to move the main-section cursor to a labeled step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpSignal {
    /// The target label.
    pub label: String,
    /// How long to suspend the run before jumping.
    pub delay: Duration,
}

impl JumpSignal {
    /// Jumps immediately.
    #[must_use]
    pub fn now(label: impl Into<String>) -> Self {
        Self::after(label, Duration::ZERO)
    }

    /// Jumps after the given delay.
    #[must_use]
    pub fn after(label: impl Into<String>, delay: Duration) -> Self {
        Self {
            label: label.into(),
            delay,
        }
    }

    /// Returns true if the jump suspends the run first.
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        !self.delay.is_zero()
    }
}

/// What happened when a step was applied.
///
/// Control-flow signals and failures are distinct variants, so a redirect
/// is never mistaken for an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    /// The step produced the next value.
    Continue(T),
    /// The step produced a value and asked to jump.
    Jump {
        /// The value carried to the jump target.
        value: T,
        /// Where to go.
        signal: JumpSignal,
    },
    /// The step produced a final value and ended main.
    ShortCircuit(T),
    /// The step failed.
    Failure(ActionError),
}

impl<T> StepOutcome<T> {
    /// Creates a continue outcome.
    #[must_use]
    pub fn next(value: T) -> Self {
        Self::Continue(value)
    }

    /// Creates an immediate jump outcome.
    #[must_use]
    pub fn jump(value: T, label: impl Into<String>) -> Self {
        Self::Jump {
            value,
            signal: JumpSignal::now(label),
        }
    }

    /// Creates a delayed jump outcome.
    #[must_use]
    pub fn jump_after(value: T, label: impl Into<String>, delay: Duration) -> Self {
        Self::Jump {
            value,
            signal: JumpSignal::after(label, delay),
        }
    }

    /// Creates a short-circuit outcome.
    #[must_use]
    pub fn short_circuit(value: T) -> Self {
        Self::ShortCircuit(value)
    }

    /// Creates a failure outcome.
    #[must_use]
    pub fn fail(error: impl Into<ActionError>) -> Self {
        Self::Failure(error.into())
    }

    /// Returns true if this is a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns the outcome's value, if it carries one.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Continue(value) | Self::ShortCircuit(value) | Self::Jump { value, .. } => {
                Some(value)
            }
            Self::Failure(_) => None,
        }
    }
}

impl<T> From<Result<T, ActionError>> for StepOutcome<T> {
    fn from(result: Result<T, ActionError>) -> Self {
        match result {
            Ok(value) => Self::Continue(value),
            Err(error) => Self::Failure(error),
        }
    }
}
