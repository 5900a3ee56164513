//! Metrics events emitted by the engine.

use crate::core::{PipelineError, Section};
use crate::utils::duration_ms;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

/// Identifies the run an event belongs to.
#[derive(Debug, Clone, Copy)]
pub struct RunKey<'a> {
    /// The pipeline name.
    pub pipeline: &'a str,
    /// The run identifier.
    pub run_id: Uuid,
}

/// Something observable that happened during a run.
#[derive(Debug, Clone, Copy)]
pub enum MetricsEvent<'a> {
    /// A run began.
    RunStarted {
        /// Run identity.
        key: RunKey<'a>,
    },
    /// A step is about to be invoked.
    StepStarted {
        /// Run identity.
        key: RunKey<'a>,
        /// Owning section.
        section: Section,
        /// Index within the section.
        index: usize,
        /// Diagnostic step name.
        step: &'a str,
    },
    /// A step invocation returned.
    StepFinished {
        /// Run identity.
        key: RunKey<'a>,
        /// Owning section.
        section: Section,
        /// Diagnostic step name.
        step: &'a str,
        /// Time spent in the step.
        elapsed: Duration,
        /// False if the step failed.
        success: bool,
    },
    /// A failure was captured.
    StepFailed {
        /// Run identity.
        key: RunKey<'a>,
        /// The captured error.
        error: &'a PipelineError,
    },
    /// A jump was accepted.
    JumpTaken {
        /// Run identity.
        key: RunKey<'a>,
        /// The step that signalled the jump.
        from: &'a str,
        /// The target label.
        label: &'a str,
        /// Delay before the jump.
        delay: Duration,
    },
    /// A run completed.
    RunFinished {
        /// Run identity.
        key: RunKey<'a>,
        /// Whether main ended early.
        short_circuited: bool,
        /// Number of captured errors.
        error_count: usize,
        /// Total run time.
        elapsed: Duration,
    },
}

impl<'a> MetricsEvent<'a> {
    /// The dotted event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "pipeline.start",
            Self::StepStarted { .. } => "step.start",
            Self::StepFinished { .. } => "step.end",
            Self::StepFailed { .. } => "step.error",
            Self::JumpTaken { .. } => "step.jump",
            Self::RunFinished { .. } => "pipeline.end",
        }
    }

    /// The run this event belongs to.
    #[must_use]
    pub fn key(&self) -> RunKey<'a> {
        match *self {
            Self::RunStarted { key }
            | Self::StepStarted { key, .. }
            | Self::StepFinished { key, .. }
            | Self::StepFailed { key, .. }
            | Self::JumpTaken { key, .. }
            | Self::RunFinished { key, .. } => key,
        }
    }

    /// Converts the event to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let key = self.key();
        let mut value = match self {
            Self::RunStarted { .. } => json!({}),
            Self::StepStarted {
                section, index, step, ..
            } => json!({ "section": section, "index": index, "step": step }),
            Self::StepFinished {
                section,
                step,
                elapsed,
                success,
                ..
            } => json!({
                "section": section,
                "step": step,
                "elapsedMs": duration_ms(*elapsed),
                "success": success,
            }),
            Self::StepFailed { error, .. } => json!({
                "section": error.section,
                "index": error.index,
                "step": error.step_name,
                "message": error.message,
            }),
            Self::JumpTaken {
                from, label, delay, ..
            } => json!({ "from": from, "label": label, "delayMs": duration_ms(*delay) }),
            Self::RunFinished {
                short_circuited,
                error_count,
                elapsed,
                ..
            } => json!({
                "shortCircuited": short_circuited,
                "errorCount": error_count,
                "elapsedMs": duration_ms(*elapsed),
            }),
        };
        if let Some(map) = value.as_object_mut() {
            map.insert("event".to_string(), self.event_type().into());
            map.insert("pipeline".to_string(), key.pipeline.into());
            map.insert("runId".to_string(), key.run_id.to_string().into());
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_carries_run_key() {
        let run_id = Uuid::new_v4();
        let key = RunKey { pipeline: "orders", run_id };
        let event = MetricsEvent::JumpTaken {
            key,
            from: "s2:poll",
            label: "poll",
            delay: Duration::from_millis(5),
        };
        let json = event.to_json();
        assert_eq!(json["event"], "step.jump");
        assert_eq!(json["pipeline"], "orders");
        assert_eq!(json["runId"], run_id.to_string());
        assert_eq!(json["label"], "poll");
    }

    #[test]
    fn test_event_types() {
        let key = RunKey { pipeline: "p", run_id: Uuid::nil() };
        assert_eq!(MetricsEvent::RunStarted { key }.event_type(), "pipeline.start");
        let finished = MetricsEvent::RunFinished {
            key,
            short_circuited: true,
            error_count: 2,
            elapsed: Duration::ZERO,
        };
        assert_eq!(finished.event_type(), "pipeline.end");
        assert_eq!(finished.to_json()["errorCount"], 2);
    }
}
