//! Core domain model types for stepline.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Pipeline sections and step naming
//! - The tagged step outcome and jump signal
//! - Error, timing and result records

mod outcome;
#[cfg(test)]
mod outcome_tests;
mod record;
mod section;

pub use outcome::{JumpSignal, StepOutcome};
pub use record::{ActionTiming, PipelineError, PipelineResult};
pub use section::Section;
