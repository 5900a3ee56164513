//! Per-run mutable bookkeeping.

use super::Clock;
use crate::core::{ActionTiming, PipelineError, PipelineResult, Section};
use crate::utils::{generate_run_id, now_utc, Timestamp};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The step currently being invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCursor {
    /// The section being executed.
    pub section: Section,
    /// The step's index within its section.
    pub index: usize,
    /// The step's diagnostic name.
    pub step_name: String,
}

/// State owned by exactly one run.
///
/// Steps may request a short-circuit and read the run's state. Errors and
/// timings are only written by the engine.
#[derive(Debug)]
pub struct RunControl {
    pipeline_name: String,
    run_id: Uuid,
    short_circuited: bool,
    errors: Vec<PipelineError>,
    timings: Vec<ActionTiming>,
    cursor: Option<StepCursor>,
    started_at: Timestamp,
    run_start: Instant,
    clock: Arc<dyn Clock>,
}

impl RunControl {
    pub(crate) fn new(pipeline_name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let run_start = clock.now();
        Self {
            pipeline_name: pipeline_name.into(),
            run_id: generate_run_id(),
            short_circuited: false,
            errors: Vec::new(),
            timings: Vec::new(),
            cursor: None,
            started_at: now_utc(),
            run_start,
            clock,
        }
    }

    /// Marks the run as short-circuited. The flag never resets within a run.
    pub fn short_circuit(&mut self) {
        self.short_circuited = true;
    }

    /// Returns true once the run has been short-circuited.
    #[must_use]
    pub fn is_short_circuited(&self) -> bool {
        self.short_circuited
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the step currently executing, if any.
    #[must_use]
    pub fn cursor(&self) -> Option<&StepCursor> {
        self.cursor.as_ref()
    }

    /// Errors captured so far.
    #[must_use]
    pub fn errors(&self) -> &[PipelineError] {
        &self.errors
    }

    /// Timings captured so far.
    #[must_use]
    pub fn timings(&self) -> &[ActionTiming] {
        &self.timings
    }

    /// When the run started.
    #[must_use]
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Time since the run started, as seen by the injected clock.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.run_start)
    }

    pub(crate) fn now(&self) -> Instant {
        self.clock.now()
    }

    pub(crate) fn begin_step(&mut self, section: Section, index: usize, step_name: &str) {
        self.cursor = Some(StepCursor {
            section,
            index,
            step_name: step_name.to_string(),
        });
    }

    /// Builds a [`PipelineError`] for the step under the cursor and appends it.
    pub(crate) fn record_error(&mut self, message: impl Into<String>) -> PipelineError {
        let (section, index, step_name) = match &self.cursor {
            Some(cursor) => (cursor.section, cursor.index, cursor.step_name.clone()),
            None => (Section::Main, 0, String::new()),
        };
        let error = PipelineError {
            pipeline: self.pipeline_name.clone(),
            section,
            index,
            step_name,
            message: message.into(),
        };
        self.errors.push(error.clone());
        error
    }

    pub(crate) fn record_timing(&mut self, started: Instant, success: bool) {
        let elapsed = self.clock.now().saturating_duration_since(started);
        if let Some(cursor) = &self.cursor {
            self.timings.push(ActionTiming {
                section: cursor.section,
                index: cursor.index,
                step_name: cursor.step_name.clone(),
                elapsed,
                success,
            });
        }
    }

    /// Starts over as a brand-new run.
    pub(crate) fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.pipeline_name), Arc::clone(&self.clock));
    }

    pub(crate) fn snapshot<T>(&self, value: T) -> PipelineResult<T> {
        PipelineResult {
            value,
            short_circuited: self.short_circuited,
            errors: self.errors.clone(),
            timings: self.timings.clone(),
            total_duration: self.elapsed(),
            run_id: self.run_id,
            started_at: self.started_at,
        }
    }

    pub(crate) fn into_result<T>(self, value: T) -> PipelineResult<T> {
        let total_duration = self.elapsed();
        PipelineResult {
            value,
            short_circuited: self.short_circuited,
            errors: self.errors,
            timings: self.timings,
            total_duration,
            run_id: self.run_id,
            started_at: self.started_at,
        }
    }
}
