//! The execution engine: pre, the main jump/short-circuit machine, post.

use super::PipelineBuilder;
use crate::actions::RegisteredAction;
use crate::control::{Clock, RunControl, Sleeper};
use crate::core::{PipelineError, PipelineResult, Section, StepOutcome};
use crate::errors::{Result, SteplineError};
use crate::metrics::{MetricsEvent, MetricsSink, RunKey};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

/// Jumps accepted per run unless configured otherwise.
pub const DEFAULT_MAX_JUMPS: usize = 128;

/// Recovery hook: `(value before the failing step, error) -> next value`.
pub type ErrorHook<T> = dyn Fn(T, &PipelineError) -> T + Send + Sync;

pub(crate) const fn slot(section: Section) -> usize {
    match section {
        Section::Pre => 0,
        Section::Main => 1,
        Section::Post => 2,
    }
}

pub(crate) struct PipelineInner<T> {
    pub(crate) name: String,
    pub(crate) short_circuit_on_exception: bool,
    pub(crate) sections: [Vec<RegisteredAction<T>>; 3],
    pub(crate) labels: HashMap<String, (Section, usize)>,
    pub(crate) on_error: Option<Arc<ErrorHook<T>>>,
    pub(crate) max_jumps: usize,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) metrics: Arc<dyn MetricsSink>,
}

/// An immutable, validated pipeline.
///
/// Every run gets its own [`RunControl`], so one instance can serve many
/// concurrent runs. Cloning is cheap and shares the registration.
pub struct Pipeline<T> {
    inner: Arc<PipelineInner<T>>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.inner.name)
            .field("short_circuit_on_exception", &self.inner.short_circuit_on_exception)
            .field("pre", &self.inner.sections[0].len())
            .field("main", &self.inner.sections[1].len())
            .field("post", &self.inner.sections[2].len())
            .field("max_jumps", &self.inner.max_jumps)
            .finish()
    }
}

impl<T> Pipeline<T> {
    pub(crate) fn from_inner(inner: PipelineInner<T>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether a failing step ends main.
    #[must_use]
    pub fn short_circuit_on_exception(&self) -> bool {
        self.inner.short_circuit_on_exception
    }

    /// Maximum accepted jumps per run.
    #[must_use]
    pub fn max_jumps(&self) -> usize {
        self.inner.max_jumps
    }

    /// Number of main steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.sections[slot(Section::Main)].len()
    }

    /// Returns true if there are no main steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The registered steps of a section, in order.
    #[must_use]
    pub fn section(&self, section: Section) -> &[RegisteredAction<T>] {
        &self.inner.sections[slot(section)]
    }

    /// Diagnostic names of a section's steps, in order.
    #[must_use]
    pub fn step_names(&self, section: Section) -> Vec<&str> {
        self.section(section).iter().map(RegisteredAction::name).collect()
    }

    /// Resolves a label to a main-section index.
    ///
    /// # Errors
    ///
    /// Fails if the label is unknown or belongs to pre or post.
    pub fn main_index(&self, label: &str) -> Result<usize> {
        match self.inner.labels.get(label) {
            Some(&(Section::Main, index)) => Ok(index),
            Some(&(section, _)) => Err(SteplineError::InvalidJumpTarget {
                pipeline: self.inner.name.clone(),
                label: label.to_string(),
                section,
            }),
            None => Err(SteplineError::UnknownLabel {
                pipeline: self.inner.name.clone(),
                label: label.to_string(),
            }),
        }
    }
}

impl<T: Clone + Send + 'static> Pipeline<T> {
    /// Starts a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder<T> {
        PipelineBuilder::new(name)
    }

    /// Runs pre, main from its first step, then post.
    ///
    /// # Errors
    ///
    /// Step failures never surface here; they are recorded on the result.
    /// An error is returned only for misconfiguration found mid-run: a jump
    /// to an unknown or non-main label, or a jump signalled by a pre or post
    /// step.
    pub async fn run(&self, input: T) -> Result<PipelineResult<T>> {
        self.execute(input, 0).await
    }

    /// Runs the pipeline starting main at the step labeled `label`.
    ///
    /// # Errors
    ///
    /// Fails immediately if `label` is not a main-section label, otherwise
    /// as [`Pipeline::run`].
    pub async fn run_from(&self, label: &str, input: T) -> Result<PipelineResult<T>> {
        let start = self.main_index(label)?;
        self.execute(input, start).await
    }

    async fn execute(&self, input: T, start: usize) -> Result<PipelineResult<T>> {
        let mut control = RunControl::new(&self.inner.name, Arc::clone(&self.inner.clock));
        let span = info_span!(
            "pipeline.run",
            pipeline = %self.inner.name,
            run_id = %control.run_id(),
        );

        async move {
            self.emit(&MetricsEvent::RunStarted {
                key: self.key(&control),
            });

            let mut value = self.run_edge(Section::Pre, input, &mut control).await?;
            if control.is_short_circuited() {
                debug!("short-circuited in pre, skipping main");
            } else {
                value = self.run_main(value, start, &mut control).await?;
            }
            value = self.run_edge(Section::Post, value, &mut control).await?;

            let result = control.into_result(value);
            self.emit(&MetricsEvent::RunFinished {
                key: RunKey {
                    pipeline: &self.inner.name,
                    run_id: result.run_id,
                },
                short_circuited: result.short_circuited,
                error_count: result.errors.len(),
                elapsed: result.total_duration,
            });
            debug!(
                short_circuited = result.short_circuited,
                errors = result.errors.len(),
                steps = result.timings.len(),
                "pipeline finished"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Runs pre or post. Every step runs, except that a failure in post
    /// under the short-circuit policy skips the remaining post steps.
    async fn run_edge(&self, section: Section, input: T, control: &mut RunControl) -> Result<T> {
        let mut value = input;
        for step in self.section(section) {
            let prior = value.clone();
            match self.invoke(step, value, control).await {
                StepOutcome::Continue(next) => value = next,
                StepOutcome::ShortCircuit(next) => {
                    value = next;
                    control.short_circuit();
                }
                StepOutcome::Jump { .. } => {
                    return Err(SteplineError::JumpOutsideMain {
                        pipeline: self.inner.name.clone(),
                        section,
                        step: step.name().to_string(),
                    });
                }
                StepOutcome::Failure(err) => {
                    value = self.recover(prior, err.message, control);
                    if self.inner.short_circuit_on_exception {
                        control.short_circuit();
                        if section == Section::Post {
                            debug!(step = step.name(), "post step failed, skipping remaining post steps");
                            break;
                        }
                    }
                }
            }
        }
        Ok(value)
    }

    async fn run_main(&self, input: T, start: usize, control: &mut RunControl) -> Result<T> {
        let steps = self.section(Section::Main);
        let mut value = input;
        let mut index = start;
        let mut jumps = 0usize;

        while let Some(step) = steps.get(index) {
            let prior = value.clone();
            match self.invoke(step, value, control).await {
                StepOutcome::Continue(next) => {
                    value = next;
                    if control.is_short_circuited() {
                        debug!(step = step.name(), "short-circuit requested");
                        break;
                    }
                    index += 1;
                }
                StepOutcome::ShortCircuit(next) => {
                    value = next;
                    control.short_circuit();
                    debug!(step = step.name(), "short-circuit requested");
                    break;
                }
                StepOutcome::Jump { value: next, signal } => {
                    value = next;
                    if control.is_short_circuited() {
                        debug!(step = step.name(), label = %signal.label, "short-circuit requested, jump ignored");
                        break;
                    }
                    jumps += 1;
                    if jumps > self.inner.max_jumps {
                        let message = format!(
                            "jump budget of {} exceeded at '{}' (target '{}')",
                            self.inner.max_jumps,
                            step.name(),
                            signal.label
                        );
                        value = self.recover(value, message, control);
                        break;
                    }
                    self.emit(&MetricsEvent::JumpTaken {
                        key: self.key(control),
                        from: step.name(),
                        label: &signal.label,
                        delay: signal.delay,
                    });
                    if signal.is_delayed() {
                        debug!(label = %signal.label, delay_ms = ?signal.delay, "delaying jump");
                        self.inner.sleeper.sleep(signal.delay).await;
                    }
                    index = self.main_index(&signal.label)?;
                    debug!(from = step.name(), to = index, jumps, "jump taken");
                }
                StepOutcome::Failure(err) => {
                    value = self.recover(prior, err.message, control);
                    if self.inner.short_circuit_on_exception {
                        control.short_circuit();
                    }
                    if control.is_short_circuited() {
                        break;
                    }
                    index += 1;
                }
            }
        }
        Ok(value)
    }

    /// Invokes one step and records its timing.
    async fn invoke(&self, step: &RegisteredAction<T>, value: T, control: &mut RunControl) -> StepOutcome<T> {
        control.begin_step(step.section(), step.index(), step.name());
        self.emit(&MetricsEvent::StepStarted {
            key: self.key(control),
            section: step.section(),
            index: step.index(),
            step: step.name(),
        });

        let started = control.now();
        let outcome = step.action().invoke(value, control).await;
        let success = !outcome.is_failure();
        control.record_timing(started, success);

        if let Some(timing) = control.timings().last() {
            let elapsed = timing.elapsed;
            self.emit(&MetricsEvent::StepFinished {
                key: self.key(control),
                section: step.section(),
                step: step.name(),
                elapsed,
                success,
            });
        }
        outcome
    }

    /// Records a failure and routes it through the recovery hook.
    fn recover(&self, value: T, message: String, control: &mut RunControl) -> T {
        let error = control.record_error(message);
        warn!(
            step = %error.step_name,
            section = %error.section,
            error = %error.message,
            "step failed"
        );
        self.emit(&MetricsEvent::StepFailed {
            key: self.key(control),
            error: &error,
        });
        match &self.inner.on_error {
            Some(hook) => hook(value, &error),
            None => value,
        }
    }

    fn key<'a>(&'a self, control: &RunControl) -> RunKey<'a> {
        RunKey {
            pipeline: &self.inner.name,
            run_id: control.run_id(),
        }
    }

    fn emit(&self, event: &MetricsEvent<'_>) {
        let sink = &self.inner.metrics;
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink.record(event))).is_err() {
            warn!(
                pipeline = %self.inner.name,
                event_type = event.event_type(),
                "metrics sink panicked"
            );
        }
    }
}
