//! # Stepline
//!
//! An embeddable step-pipeline execution engine.
//!
//! A pipeline threads one value through three ordered sections:
//!
//! - **pre**: every step runs; a short-circuit or policy failure here skips main
//! - **main**: a state machine that supports labeled jumps (optionally
//!   delayed), short-circuits and per-step failure capture
//! - **post**: runs after main no matter how main ended
//!
//! Each run owns its own [`control::RunControl`], so a built
//! [`pipeline::Pipeline`] can serve many concurrent callers. The
//! [`provider`] module manages instances under load (shared, pooled, or
//! per run) and [`dispatch`] puts a bounded, backpressured queue in front.
//!
//! ## Quick Start
//!
//! ```rust
//! use stepline::prelude::*;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let pipeline = PipelineBuilder::new("greeting")
//!     .pre(Action::unary(|s: String| s.trim().to_string()))
//!     .step_labeled("check", Action::jump_when(|s: &String| s.is_empty(), "fallback", Duration::ZERO))
//!     .step(Action::unary(|s: String| format!("hello, {s}")))
//!     .step(Action::short_circuit_when(|_: &String| true))
//!     .step_labeled("fallback", Action::unary(|_: String| "hello, stranger".to_string()))
//!     .build()?;
//!
//! let result = pipeline.run("  world ".to_string()).await?;
//! assert_eq!(result.value, "hello, world");
//! assert!(result.short_circuited);
//!
//! let result = pipeline.run("   ".to_string()).await?;
//! assert_eq!(result.value, "hello, stranger");
//! # Ok::<(), stepline::errors::SteplineError>(())
//! # }).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actions;
pub mod control;
pub mod core;
pub mod dispatch;
pub mod errors;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod provider;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actions::{
        Action, ActionPool, ActionRegistry, ActionResolver, RemoteAction, RemoteDefaults,
        RemoteSpec, Resettable, RetryConfig, RetryingInvoker, Step,
    };
    pub use crate::control::{Clock, ManualClock, RunControl, Sleeper, SystemClock};
    pub use crate::core::{
        ActionTiming, JumpSignal, PipelineError, PipelineResult, Section, StepOutcome,
    };
    pub use crate::dispatch::{
        DispatchConfig, DispatchConsumer, DispatchEngine, DispatchError, FnConsumer,
    };
    pub use crate::errors::{ActionError, PipelineValidationError, SteplineError};
    pub use crate::metrics::{metrics_summary_action, CollectingMetrics, LoggingMetrics, MetricsSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, RuntimePipeline};
    pub use crate::provider::{PipelineProvider, ProviderConfig, ProviderMode};
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
}
