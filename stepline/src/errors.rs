//! Error types for the stepline engine.
//!
//! Two families live here. [`SteplineError`] covers configuration and
//! contract violations: these abort the call that discovered them and never
//! become part of a run's recorded errors. [`ActionError`] is what an action
//! raises at run time; the engine captures it, routes it through the
//! recovery hook and records it on the run.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::Section;

/// The main error type for stepline operations.
#[derive(Debug, Error)]
pub enum SteplineError {
    /// A pipeline, pool or dispatch configuration failed validation.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A jump or start label does not name any registered step.
    #[error("Unknown label '{label}' in pipeline '{pipeline}'")]
    UnknownLabel {
        /// The pipeline name.
        pipeline: String,
        /// The label that failed to resolve.
        label: String,
    },

    /// A jump or start label names a step outside the main section.
    #[error("Label '{label}' in pipeline '{pipeline}' belongs to the {section} section; only main steps are jump targets")]
    InvalidJumpTarget {
        /// The pipeline name.
        pipeline: String,
        /// The offending label.
        label: String,
        /// The section that owns the label.
        section: Section,
    },

    /// A pre or post step signalled a jump.
    #[error("Step '{step}' in the {section} section of pipeline '{pipeline}' signalled a jump; jumps are only allowed in main")]
    JumpOutsideMain {
        /// The pipeline name.
        pipeline: String,
        /// The section the step belongs to.
        section: Section,
        /// The step name.
        step: String,
    },

    /// A step signalled a jump while being applied incrementally.
    #[error("Step '{step}' in runtime pipeline '{pipeline}' signalled a jump; runtime pipelines do not support jumps")]
    JumpUnsupported {
        /// The pipeline name.
        pipeline: String,
        /// The step name.
        step: String,
    },

    /// An action reference could not be resolved.
    #[error("Unresolved action reference '{reference}'")]
    UnresolvedAction {
        /// The reference that failed to resolve.
        reference: String,
    },

    /// A pooled borrow gave up waiting for a free instance.
    #[error("Timed out after {waited_ms}ms waiting for a pooled pipeline")]
    PoolTimeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The pool no longer hands out instances.
    #[error("Pipeline pool is closed")]
    PoolClosed,

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-001-DUPLICATE_LABEL").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON representation.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("code".to_string(), self.code.clone().into());
        map.insert("summary".to_string(), self.summary.clone().into());
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), hint.clone().into());
        }
        if !self.context.is_empty() {
            let context: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context));
        }
        serde_json::Value::Object(map)
    }
}

/// Error raised when a pipeline, pool or dispatch configuration is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Error for a label registered more than once.
    #[must_use]
    pub fn duplicate_label(label: &str, steps: Vec<String>) -> Self {
        Self::new(format!("Duplicate step label '{label}'"))
            .with_steps(steps)
            .with_error_info(
                ContractErrorInfo::new(
                    codes::DUPLICATE_LABEL,
                    format!("Label '{label}' is registered more than once"),
                )
                .with_fix_hint(ContractSuggestions::get(codes::DUPLICATE_LABEL))
                .with_context_entry("label", label),
            )
    }

    /// Error for a blank label.
    #[must_use]
    pub fn empty_label(step: &str) -> Self {
        Self::new(format!("Step '{step}' has an empty label"))
            .with_steps(vec![step.to_string()])
            .with_error_info(
                ContractErrorInfo::new(codes::EMPTY_LABEL, "Step labels must not be blank")
                    .with_fix_hint(ContractSuggestions::get(codes::EMPTY_LABEL)),
            )
    }

    /// Error for a pool configured with no capacity.
    #[must_use]
    pub fn pool_size(size: usize) -> Self {
        Self::new(format!("Pool size must be at least 1, got {size}")).with_error_info(
            ContractErrorInfo::new(codes::POOL_SIZE, "Pool size must be at least 1")
                .with_fix_hint(ContractSuggestions::get(codes::POOL_SIZE))
                .with_context_entry("size", size.to_string()),
        )
    }

    /// Error for a dispatch queue configured with no capacity.
    #[must_use]
    pub fn queue_capacity(capacity: usize) -> Self {
        Self::new(format!("Queue capacity must be at least 1, got {capacity}")).with_error_info(
            ContractErrorInfo::new(codes::QUEUE_CAPACITY, "Queue capacity must be at least 1")
                .with_fix_hint(ContractSuggestions::get(codes::QUEUE_CAPACITY))
                .with_context_entry("capacity", capacity.to_string()),
        )
    }
}

/// Contract error codes.
pub mod codes {
    /// A label appears on more than one step.
    pub const DUPLICATE_LABEL: &str = "CONTRACT-001-DUPLICATE_LABEL";
    /// A label is empty or whitespace.
    pub const EMPTY_LABEL: &str = "CONTRACT-001-EMPTY_LABEL";
    /// A pool was configured with zero instances.
    pub const POOL_SIZE: &str = "CONTRACT-002-POOL_SIZE";
    /// A dispatch queue was configured with zero capacity.
    pub const QUEUE_CAPACITY: &str = "CONTRACT-003-QUEUE_CAPACITY";
}

/// Fix suggestions keyed by contract code.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Returns the suggestion for a code, or a generic hint.
    #[must_use]
    pub fn get(code: &str) -> &'static str {
        match code {
            codes::DUPLICATE_LABEL => {
                "Labels are unique across pre, main and post. Rename one of the steps."
            }
            codes::EMPTY_LABEL => "Use the unlabeled registration method or pass a non-blank label.",
            codes::POOL_SIZE => "Use a pool size of at least 1, or PerRun mode to skip pooling.",
            codes::QUEUE_CAPACITY => "Use a queue capacity of at least 1.",
            _ => "Check the pipeline configuration.",
        }
    }
}

/// A failure raised by an action.
///
/// The engine never lets these escape a run: each one becomes a
/// [`PipelineError`](crate::core::PipelineError) on the result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    /// Description of the failure.
    pub message: String,
}

impl ActionError {
    /// Creates a new action error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Converts a caught panic payload into an action error.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::new(format!("panicked: {detail}"))
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Result type for stepline operations.
pub type Result<T> = std::result::Result<T, SteplineError>;
