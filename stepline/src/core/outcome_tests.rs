//! Tests for step outcomes.

use super::*;
use crate::errors::ActionError;
use std::time::Duration;

#[test]
fn test_jump_signal_delay() {
    assert!(!JumpSignal::now("A").is_delayed());
    assert!(JumpSignal::after("A", Duration::from_millis(5)).is_delayed());
}

#[test]
fn test_outcome_values() {
    assert_eq!(StepOutcome::next(1).value(), Some(&1));
    assert_eq!(StepOutcome::jump(2, "L").value(), Some(&2));
    assert_eq!(StepOutcome::short_circuit(3).value(), Some(&3));
    assert_eq!(StepOutcome::<i32>::fail("x").value(), None);
}

#[test]
fn test_outcome_from_result() {
    let ok: StepOutcome<i32> = Ok(4).into();
    assert_eq!(ok, StepOutcome::Continue(4));

    let err: StepOutcome<i32> = Err(ActionError::new("bad")).into();
    assert!(err.is_failure());
}

#[test]
fn test_jump_after_carries_signal() {
    let outcome = StepOutcome::jump_after("v", "retry", Duration::from_secs(1));
    match outcome {
        StepOutcome::Jump { value, signal } => {
            assert_eq!(value, "v");
            assert_eq!(signal.label, "retry");
            assert_eq!(signal.delay, Duration::from_secs(1));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}
