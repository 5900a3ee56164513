//! Run control and time sources.
//!
//! This module provides:
//! - [`RunControl`], the state owned by a single run
//! - Injectable clocks and sleepers for deterministic timing

mod clock;
mod run_control;

pub use clock::{Clock, ManualClock, Sleeper, SystemClock, TokioSleeper};
pub use run_control::{RunControl, StepCursor};
