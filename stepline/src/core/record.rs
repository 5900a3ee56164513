//! Immutable records produced by a run.

use super::Section;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// A captured step failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineError {
    /// The pipeline name.
    pub pipeline: String,
    /// The section the step belongs to.
    pub section: Section,
    /// The step's index within its section.
    pub index: usize,
    /// The step's diagnostic name.
    pub step_name: String,
    /// Description of the failure.
    pub message: String,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} step '{}' failed: {}",
            self.pipeline, self.section, self.step_name, self.message
        )
    }
}

/// Timing for one step invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionTiming {
    /// The section the step belongs to.
    pub section: Section,
    /// The step's index within its section.
    pub index: usize,
    /// The step's diagnostic name.
    pub step_name: String,
    /// Wall time spent in the step.
    pub elapsed: Duration,
    /// False if the invocation failed.
    pub success: bool,
}

/// The outcome of a full pipeline run.
///
/// Errors and timings are copies taken when the run finished, so a result
/// can be shared freely.
#[derive(Debug, Clone)]
pub struct PipelineResult<T> {
    /// The final value.
    pub value: T,
    /// True if main was ended early by a short-circuit or failure policy.
    pub short_circuited: bool,
    /// Failures in the order they were captured.
    pub errors: Vec<PipelineError>,
    /// One record per invocation, in invocation order.
    pub timings: Vec<ActionTiming>,
    /// Wall time for the whole run.
    pub total_duration: Duration,
    /// Identifier of the run that produced this result.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl<T> PipelineResult<T> {
    /// Returns true if any step failed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the step names in invocation order.
    #[must_use]
    pub fn invocation_order(&self) -> Vec<&str> {
        self.timings.iter().map(|t| t.step_name.as_str()).collect()
    }

    /// Consumes the result and returns the final value.
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }
}
