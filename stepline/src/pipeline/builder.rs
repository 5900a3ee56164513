//! Pipeline builder with validation.

use super::{ErrorHook, Pipeline, PipelineInner, DEFAULT_MAX_JUMPS};
use crate::actions::{Action, RegisteredAction};
use crate::control::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::core::{PipelineError, Section};
use crate::errors::{PipelineValidationError, Result};
use crate::metrics::{MetricsSink, NoopMetrics};
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for creating validated pipelines.
pub struct PipelineBuilder<T> {
    name: String,
    short_circuit_on_exception: bool,
    entries: Vec<(Section, Option<String>, Action<T>)>,
    on_error: Option<Arc<ErrorHook<T>>>,
    max_jumps: usize,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<dyn MetricsSink>,
}

impl<T> std::fmt::Debug for PipelineBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("short_circuit_on_exception", &self.short_circuit_on_exception)
            .field("steps", &self.entries.len())
            .field("max_jumps", &self.max_jumps)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> PipelineBuilder<T> {
    /// Creates a new pipeline builder.
    ///
    /// Failures short-circuit by default and jumps are capped at
    /// [`DEFAULT_MAX_JUMPS`] per run.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            short_circuit_on_exception: true,
            entries: Vec::new(),
            on_error: None,
            max_jumps: DEFAULT_MAX_JUMPS,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Sets whether a failing step ends main.
    #[must_use]
    pub fn short_circuit_on_exception(mut self, enabled: bool) -> Self {
        self.short_circuit_on_exception = enabled;
        self
    }

    /// Appends a step to `section`, optionally labeled.
    #[must_use]
    pub fn add(mut self, section: Section, label: Option<String>, action: Action<T>) -> Self {
        self.entries.push((section, label, action));
        self
    }

    /// Appends a pre step.
    #[must_use]
    pub fn pre(self, action: Action<T>) -> Self {
        self.add(Section::Pre, None, action)
    }

    /// Appends a labeled pre step.
    #[must_use]
    pub fn pre_labeled(self, label: impl Into<String>, action: Action<T>) -> Self {
        self.add(Section::Pre, Some(label.into()), action)
    }

    /// Appends a main step.
    #[must_use]
    pub fn step(self, action: Action<T>) -> Self {
        self.add(Section::Main, None, action)
    }

    /// Appends a labeled main step. Main labels are jump and start targets.
    #[must_use]
    pub fn step_labeled(self, label: impl Into<String>, action: Action<T>) -> Self {
        self.add(Section::Main, Some(label.into()), action)
    }

    /// Appends a post step.
    #[must_use]
    pub fn post(self, action: Action<T>) -> Self {
        self.add(Section::Post, None, action)
    }

    /// Appends a labeled post step.
    #[must_use]
    pub fn post_labeled(self, label: impl Into<String>, action: Action<T>) -> Self {
        self.add(Section::Post, Some(label.into()), action)
    }

    /// Sets the recovery hook applied to every captured failure.
    ///
    /// The hook receives the value from before the failing step and returns
    /// the value the run continues with. Without a hook that value is kept.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(T, &PipelineError) -> T + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Caps accepted jumps per run. Zero disables jumps.
    #[must_use]
    pub fn max_jumps(mut self, max_jumps: usize) -> Self {
        self.max_jumps = max_jumps;
        self
    }

    /// Sets the clock used for timings.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the sleeper used for delayed jumps.
    #[must_use]
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sets the metrics sink.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validates the registration and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a label is blank or appears on more
    /// than one step in any section.
    pub fn build(self) -> Result<Pipeline<T>> {
        let mut sections: [Vec<RegisteredAction<T>>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let mut labels: HashMap<String, (Section, usize)> = HashMap::new();

        for (section, label, action) in self.entries {
            let index = sections[super::slot(section)].len();
            let registered = RegisteredAction::new(action, label, section, index);

            if let Some(label) = registered.label() {
                if label.trim().is_empty() {
                    return Err(PipelineValidationError::empty_label(registered.name()).into());
                }
                if let Some(&(other_section, other_index)) = labels.get(label) {
                    let first = &sections[super::slot(other_section)][other_index];
                    return Err(PipelineValidationError::duplicate_label(
                        label,
                        vec![first.name().to_string(), registered.name().to_string()],
                    )
                    .into());
                }
                labels.insert(label.to_string(), (section, index));
            }
            sections[super::slot(section)].push(registered);
        }

        Ok(Pipeline::from_inner(PipelineInner {
            name: self.name,
            short_circuit_on_exception: self.short_circuit_on_exception,
            sections,
            labels,
            on_error: self.on_error,
            max_jumps: self.max_jumps,
            clock: self.clock,
            sleeper: self.sleeper,
            metrics: self.metrics,
        }))
    }
}
