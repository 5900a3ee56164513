//! Testing utilities for stepline pipelines.
//!
//! This module provides:
//! - Canned actions (append, fail, short-circuit, record)
//! - A sleeper double for delayed jumps
//! - Assertions over pipeline results

mod assertions;
mod mocks;

pub use assertions::{assert_error_count, assert_no_errors, assert_timing_names};
pub use mocks::{
    append, fail, record, short_circuit_with, InvocationLog, RecordingSleeper,
};
