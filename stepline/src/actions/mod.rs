//! Actions: the units of work a pipeline runs.
//!
//! Every action normalizes to "apply(value) -> outcome". Three shapes exist:
//! - Unary transforms, plain functions of the value
//! - Controlled steps, which also see the run's [`RunControl`] and may
//!   signal jumps or short-circuits
//! - Remote delegates, which hand the value to a [`RemoteInvoker`]
//!
//! Stateful steps can be lent out per invocation from an [`ActionPool`].

mod pooled;
mod registry;
pub mod remote;
pub mod retry;

pub use pooled::{ActionPool, Resettable};
pub use registry::{ActionRegistry, ActionResolver};
pub use remote::{
    RemoteAction, RemoteDefaults, RemoteError, RemoteInvoker, RemoteRequest, RemoteSpec,
    RemoteTransport, RetryingInvoker,
};
#[cfg(feature = "remote")]
pub use remote::ReqwestTransport;
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig};

use crate::control::RunControl;
use crate::core::{Section, StepOutcome};
use crate::errors::ActionError;
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// A step that receives the run control.
///
/// Implement this for steps that need to short-circuit, jump, or await
/// other work. Closures can use [`Action::controlled`] instead.
#[async_trait]
pub trait Step<T: Send + 'static>: Send + Sync {
    /// Applies the step to the current value.
    async fn apply(&self, value: T, control: &mut RunControl) -> StepOutcome<T>;
}

/// A synchronous function-based step.
pub struct FnStep<F> {
    func: F,
}

impl<F> FnStep<F> {
    /// Creates a new function-based step.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, F> Step<T> for FnStep<F>
where
    T: Send + 'static,
    F: Fn(T, &mut RunControl) -> StepOutcome<T> + Send + Sync,
{
    async fn apply(&self, value: T, control: &mut RunControl) -> StepOutcome<T> {
        (self.func)(value, control)
    }
}

type UnaryFn<T> = dyn Fn(T) -> Result<T, ActionError> + Send + Sync;

/// The execution shape of an action.
pub enum ActionKind<T> {
    /// A plain transform.
    Unary(Arc<UnaryFn<T>>),
    /// A step that sees the run control.
    Controlled(Arc<dyn Step<T>>),
    /// A remote delegate.
    Remote(Arc<RemoteAction<T>>),
}

impl<T> Clone for ActionKind<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Unary(f) => Self::Unary(Arc::clone(f)),
            Self::Controlled(s) => Self::Controlled(Arc::clone(s)),
            Self::Remote(r) => Self::Remote(Arc::clone(r)),
        }
    }
}

/// A unit of work. Cheap to clone; clones share the underlying callable.
pub struct Action<T> {
    kind: ActionKind<T>,
    display_name: Option<String>,
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ActionKind::Unary(_) => "unary",
            ActionKind::Controlled(_) => "controlled",
            ActionKind::Remote(_) => "remote",
        };
        f.debug_struct("Action")
            .field("kind", &kind)
            .field("display_name", &self.display_name)
            .finish()
    }
}

impl<T: Send + 'static> Action<T> {
    fn from_kind(kind: ActionKind<T>) -> Self {
        Self {
            kind,
            display_name: None,
        }
    }

    /// An infallible transform.
    pub fn unary<F>(func: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        Self::from_kind(ActionKind::Unary(Arc::new(move |value| Ok(func(value)))))
    }

    /// A transform that may fail.
    pub fn fallible<F, E>(func: F) -> Self
    where
        F: Fn(T) -> Result<T, E> + Send + Sync + 'static,
        E: Into<ActionError>,
    {
        Self::from_kind(ActionKind::Unary(Arc::new(move |value| {
            func(value).map_err(Into::into)
        })))
    }

    /// A synchronous step that sees the run control.
    pub fn controlled<F>(func: F) -> Self
    where
        F: Fn(T, &mut RunControl) -> StepOutcome<T> + Send + Sync + 'static,
    {
        Self::step(FnStep::new(func))
    }

    /// Wraps a [`Step`] implementation.
    pub fn step<S>(step: S) -> Self
    where
        S: Step<T> + 'static,
    {
        Self::from_kind(ActionKind::Controlled(Arc::new(step)))
    }

    /// A remote delegate.
    pub fn remote(remote: RemoteAction<T>) -> Self {
        Self::from_kind(ActionKind::Remote(Arc::new(remote)))
    }

    /// Passes the value through, jumping to `label` when `predicate` holds.
    pub fn jump_when<P>(predicate: P, label: impl Into<String>, delay: Duration) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let label = label.into();
        Self::controlled(move |value: T, _control: &mut RunControl| {
            if predicate(&value) {
                StepOutcome::jump_after(value, label.clone(), delay)
            } else {
                StepOutcome::Continue(value)
            }
        })
    }

    /// Ends main with the current value when `predicate` holds.
    pub fn short_circuit_when<P>(predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::controlled(move |value: T, _control: &mut RunControl| {
            if predicate(&value) {
                StepOutcome::ShortCircuit(value)
            } else {
                StepOutcome::Continue(value)
            }
        })
    }

    /// Sets a display name appended to the positional step name (`pre1:double`).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Returns the display name, if one was set.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Returns the execution shape.
    #[must_use]
    pub fn kind(&self) -> &ActionKind<T> {
        &self.kind
    }

    /// Applies the action, converting panics into failures.
    pub(crate) async fn invoke(&self, value: T, control: &mut RunControl) -> StepOutcome<T> {
        let call = async {
            match &self.kind {
                ActionKind::Unary(func) => StepOutcome::from(func(value)),
                ActionKind::Controlled(step) => step.apply(value, control).await,
                ActionKind::Remote(remote) => StepOutcome::from(remote.call(value).await),
            }
        };
        AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| StepOutcome::Failure(ActionError::from_panic(payload.as_ref())))
    }
}

/// An action bound to its position in a pipeline.
pub struct RegisteredAction<T> {
    action: Action<T>,
    label: Option<String>,
    section: Section,
    index: usize,
    name: String,
}

impl<T> Clone for RegisteredAction<T> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            label: self.label.clone(),
            section: self.section,
            index: self.index,
            name: self.name.clone(),
        }
    }
}

impl<T> fmt::Debug for RegisteredAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("name", &self.name)
            .field("section", &self.section)
            .field("index", &self.index)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl<T> RegisteredAction<T> {
    pub(crate) fn new(action: Action<T>, label: Option<String>, section: Section, index: usize) -> Self {
        let suffix = action.display_name.as_deref().or(label.as_deref());
        let name = section.step_name(index, suffix);
        Self {
            action,
            label,
            section,
            index,
            name,
        }
    }

    /// The wrapped action.
    #[must_use]
    pub fn action(&self) -> &Action<T> {
        &self.action
    }

    /// The jump label, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The owning section.
    #[must_use]
    pub fn section(&self) -> Section {
        self.section
    }

    /// Zero-based index within the section.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Diagnostic name used in errors and timings.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
