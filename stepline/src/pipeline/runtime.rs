//! Incremental pipeline that applies each step as it is registered.

use super::{slot, ErrorHook, Pipeline, PipelineBuilder};
use crate::actions::{Action, RegisteredAction};
use crate::control::{Clock, RunControl, SystemClock};
use crate::core::{PipelineError, PipelineResult, Section, StepOutcome};
use crate::errors::{Result, SteplineError};
use std::sync::Arc;
use tracing::{debug, warn};

/// A mutable, single-owner pipeline for imperative flows.
///
/// `add_*` records the step and applies it to the live value straight away.
/// Once the session has ended (an explicit short-circuit, or a failure
/// under the short-circuit policy) further adds are no-ops. Steps cannot be
/// reordered or removed; [`RuntimePipeline::freeze`] exports them as an
/// immutable [`Pipeline`].
pub struct RuntimePipeline<T> {
    name: String,
    short_circuit_on_exception: bool,
    on_error: Option<Arc<ErrorHook<T>>>,
    clock: Arc<dyn Clock>,
    sections: [Vec<RegisteredAction<T>>; 3],
    value: T,
    control: RunControl,
    ended: bool,
}

impl<T: std::fmt::Debug> std::fmt::Debug for RuntimePipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimePipeline")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> RuntimePipeline<T> {
    /// Starts a session with `initial` as the live value.
    #[must_use]
    pub fn new(name: impl Into<String>, short_circuit_on_exception: bool, initial: T) -> Self {
        let name = name.into();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            control: RunControl::new(name.clone(), Arc::clone(&clock)),
            name,
            short_circuit_on_exception,
            on_error: None,
            clock,
            sections: [Vec::new(), Vec::new(), Vec::new()],
            value: initial,
            ended: false,
        }
    }

    /// Sets the recovery hook.
    #[must_use]
    pub fn with_on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(T, &PipelineError) -> T + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Sets the clock used for timings. Restarts the session's run control.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.control = RunControl::new(self.name.clone(), Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Records and applies a pre step.
    ///
    /// # Errors
    ///
    /// Fails if the step signals a jump.
    pub async fn add_pre(&mut self, action: Action<T>) -> Result<&T> {
        self.add(Section::Pre, action).await
    }

    /// Records and applies a main step.
    ///
    /// # Errors
    ///
    /// Fails if the step signals a jump.
    pub async fn add_action(&mut self, action: Action<T>) -> Result<&T> {
        self.add(Section::Main, action).await
    }

    /// Records and applies a post step.
    ///
    /// # Errors
    ///
    /// Fails if the step signals a jump.
    pub async fn add_post(&mut self, action: Action<T>) -> Result<&T> {
        self.add(Section::Post, action).await
    }

    async fn add(&mut self, section: Section, action: Action<T>) -> Result<&T> {
        if self.ended {
            debug!(pipeline = %self.name, %section, "session ended, ignoring step");
            return Ok(&self.value);
        }

        let index = self.sections[slot(section)].len();
        let step = RegisteredAction::new(action, None, section, index);

        self.control.begin_step(section, index, step.name());
        let started = self.control.now();
        let prior = self.value.clone();
        let outcome = step.action().invoke(prior.clone(), &mut self.control).await;
        self.control.record_timing(started, !outcome.is_failure());

        match outcome {
            StepOutcome::Continue(next) => {
                self.value = next;
                if self.control.is_short_circuited() {
                    self.ended = true;
                }
            }
            StepOutcome::ShortCircuit(next) => {
                self.value = next;
                self.control.short_circuit();
                self.ended = true;
            }
            StepOutcome::Jump { .. } => {
                return Err(SteplineError::JumpUnsupported {
                    pipeline: self.name.clone(),
                    step: step.name().to_string(),
                });
            }
            StepOutcome::Failure(err) => {
                let error = self.control.record_error(err.message);
                warn!(pipeline = %self.name, step = %error.step_name, error = %error.message, "step failed");
                self.value = match &self.on_error {
                    Some(hook) => hook(prior, &error),
                    None => prior,
                };
                if self.short_circuit_on_exception {
                    self.control.short_circuit();
                }
                self.ended = self.control.is_short_circuited();
            }
        }

        self.sections[slot(section)].push(step);
        Ok(&self.value)
    }

    /// The live value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns true once further adds are ignored.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// The session's run control.
    #[must_use]
    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Number of recorded steps in a section.
    #[must_use]
    pub fn recorded(&self, section: Section) -> usize {
        self.sections[slot(section)].len()
    }

    /// Snapshot of the session so far.
    #[must_use]
    pub fn result(&self) -> PipelineResult<T> {
        self.control.snapshot(self.value.clone())
    }

    /// Starts a new session from `value`, keeping the recorded steps.
    pub fn reset(&mut self, value: T) {
        self.value = value;
        self.ended = false;
        self.control.reset();
    }

    /// Drops every recorded step. The live value is kept.
    pub fn clear_recorded(&mut self) {
        for section in &mut self.sections {
            section.clear();
        }
    }

    /// Exports the recorded steps as an immutable pipeline with the same
    /// name, policy and recovery hook.
    ///
    /// # Errors
    ///
    /// Propagates builder validation errors.
    pub fn freeze(&self) -> Result<Pipeline<T>> {
        let mut builder = PipelineBuilder::new(self.name.clone())
            .short_circuit_on_exception(self.short_circuit_on_exception)
            .clock(Arc::clone(&self.clock));
        if let Some(hook) = &self.on_error {
            let hook = Arc::clone(hook);
            builder = builder.on_error(move |value, error| hook(value, error));
        }
        for section in Section::ALL {
            for step in &self.sections[slot(section)] {
                builder = builder.add(section, None, step.action().clone());
            }
        }
        builder.build()
    }
}
