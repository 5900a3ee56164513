//! Pipeline building and execution.
//!
//! This module provides:
//! - [`PipelineBuilder`] with label validation
//! - [`Pipeline`], the immutable engine with the main-section jump machine
//! - [`RuntimePipeline`], the incremental sibling that can be frozen

mod builder;
mod engine;
#[cfg(test)]
mod integration_tests;
mod runtime;

pub use builder::PipelineBuilder;
pub(crate) use engine::{slot, PipelineInner};
pub use engine::{ErrorHook, Pipeline, DEFAULT_MAX_JUMPS};
pub use runtime::RuntimePipeline;
