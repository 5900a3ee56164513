//! Test assertions for pipeline results.

use crate::core::PipelineResult;

/// Asserts that the run captured no errors.
pub fn assert_no_errors<T>(result: &PipelineResult<T>) {
    assert!(
        result.errors.is_empty(),
        "Expected no errors, got: {:?}",
        result.errors
    );
}

/// Asserts the number of captured errors.
pub fn assert_error_count<T>(result: &PipelineResult<T>, expected: usize) {
    assert_eq!(
        result.errors.len(),
        expected,
        "Expected {} errors, got {:?}",
        expected,
        result.errors
    );
}

/// Asserts the invocation order by step name.
pub fn assert_timing_names<T>(result: &PipelineResult<T>, expected: &[&str]) {
    let actual = result.invocation_order();
    assert_eq!(
        actual, expected,
        "Expected invocation order {:?}, got {:?}",
        expected, actual
    );
}
