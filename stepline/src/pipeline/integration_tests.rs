//! End-to-end tests for the pipeline engine.

use super::*;
use crate::actions::Action;
use crate::control::{ManualClock, RunControl};
use crate::core::{Section, StepOutcome};
use crate::errors::SteplineError;
use crate::metrics::{metrics_summary_with, CollectingMetrics};
use crate::testing::{
    append, assert_error_count, assert_no_errors, assert_timing_names, fail, record,
    short_circuit_with, InvocationLog, RecordingSleeper,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn failing_middle(short_circuit: bool) -> Pipeline<String> {
    PipelineBuilder::new("failing")
        .short_circuit_on_exception(short_circuit)
        .step(append("A"))
        .step(fail("boom"))
        .step(append("B"))
        .build()
        .unwrap()
}

fn branching(take_jump: bool) -> Pipeline<String> {
    PipelineBuilder::new("branching")
        .step_labeled(
            "A",
            Action::jump_when(move |_: &String| take_jump, "C", Duration::ZERO),
        )
        .step_labeled("B", append("b"))
        .step_labeled("C", append("c"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_failure_short_circuits_main() {
    let result = failing_middle(true).run("X".to_string()).await.unwrap();

    assert_eq!(result.value, "XA");
    assert!(result.short_circuited);
    assert_error_count(&result, 1);
    assert_eq!(result.errors[0].step_name, "s1");
    assert_eq!(result.errors[0].message, "boom");
    assert_timing_names(&result, &["s0", "s1"]);
}

#[tokio::test]
async fn test_failure_without_policy_continues() {
    let result = failing_middle(false).run("X".to_string()).await.unwrap();

    assert_eq!(result.value, "XAB");
    assert!(!result.short_circuited);
    assert_error_count(&result, 1);
    assert_timing_names(&result, &["s0", "s1", "s2"]);
    assert!(!result.timings[1].success);
}

#[tokio::test]
async fn test_pre_runs_fully_then_main_is_skipped() {
    let pipeline = PipelineBuilder::new("edges")
        .pre(short_circuit_with("P1"))
        .pre(append("P2"))
        .step(append("M"))
        .post(append("X"))
        .build()
        .unwrap();

    let result = pipeline.run("START".to_string()).await.unwrap();

    assert_eq!(result.value, "P1P2X");
    assert!(result.short_circuited);
    assert_no_errors(&result);
    assert_timing_names(&result, &["pre0", "pre1", "post0"]);
}

#[tokio::test]
async fn test_jump_skips_intermediate_step() {
    let taken = branching(true).run(String::new()).await.unwrap();
    assert_timing_names(&taken, &["s0:A", "s2:C"]);
    assert_eq!(taken.value, "c");

    let fallthrough = branching(false).run(String::new()).await.unwrap();
    assert_timing_names(&fallthrough, &["s0:A", "s1:B", "s2:C"]);
    assert_eq!(fallthrough.value, "bc");
}

#[tokio::test]
async fn test_backward_jump_loops_until_predicate_clears() {
    let pipeline = PipelineBuilder::new("loop")
        .step_labeled("inc", Action::unary(|n: u32| n + 1))
        .step(Action::jump_when(|n: &u32| *n < 5, "inc", Duration::ZERO))
        .step(Action::unary(|n: u32| n * 10))
        .build()
        .unwrap();

    let result = pipeline.run(0).await.unwrap();

    assert_eq!(result.value, 50);
    assert_no_errors(&result);
    assert_eq!(result.timings.len(), 11);
}

#[tokio::test]
async fn test_jump_budget_records_fatal_error() {
    let log = InvocationLog::new();
    let spin_log = log.clone();
    let pipeline = PipelineBuilder::new("spin")
        .max_jumps(3)
        .step_labeled(
            "A",
            Action::controlled(move |v: i32, _: &mut RunControl| {
                spin_log.push("A");
                StepOutcome::jump(v + 1, "A")
            }),
        )
        .step(record(&log, "after"))
        .post(record(&log, "post"))
        .build()
        .unwrap();

    let result = pipeline.run(0).await.unwrap();

    assert_eq!(log.entries(), vec!["A", "A", "A", "A", "post"]);
    assert_error_count(&result, 1);
    assert!(result.errors[0].message.contains("jump budget of 3 exceeded"));
    assert!(!result.short_circuited);
    assert_eq!(result.value, 4);
    assert!(result.timings.iter().all(|t| t.success));
}

#[tokio::test]
async fn test_zero_budget_disables_jumps() {
    let pipeline = PipelineBuilder::new("nojump")
        .max_jumps(0)
        .step_labeled("A", Action::unary(|v: i32| v))
        .step(Action::controlled(|v: i32, _: &mut RunControl| StepOutcome::jump(v, "A")))
        .build()
        .unwrap();

    let result = pipeline.run(7).await.unwrap();
    assert_error_count(&result, 1);
    assert_eq!(result.timings.len(), 2);
}

#[tokio::test]
async fn test_jump_to_unknown_label_is_an_error() {
    let pipeline = PipelineBuilder::new("lost")
        .step(Action::controlled(|v: i32, _: &mut RunControl| StepOutcome::jump(v, "nowhere")))
        .build()
        .unwrap();

    let err = pipeline.run(1).await.unwrap_err();
    assert!(matches!(err, SteplineError::UnknownLabel { ref label, .. } if label == "nowhere"));
}

#[tokio::test]
async fn test_jump_to_post_label_is_rejected() {
    let pipeline = PipelineBuilder::new("cross")
        .step(Action::controlled(|v: i32, _: &mut RunControl| StepOutcome::jump(v, "audit")))
        .post_labeled("audit", Action::unary(|v: i32| v))
        .build()
        .unwrap();

    let err = pipeline.run(1).await.unwrap_err();
    assert!(matches!(
        err,
        SteplineError::InvalidJumpTarget {
            section: Section::Post,
            ..
        }
    ));
}

#[tokio::test]
async fn test_jump_from_pre_is_rejected() {
    let pipeline = PipelineBuilder::new("prejump")
        .pre(Action::controlled(|v: i32, _: &mut RunControl| StepOutcome::jump(v, "A")))
        .step_labeled("A", Action::unary(|v: i32| v))
        .build()
        .unwrap();

    let err = pipeline.run(1).await.unwrap_err();
    assert!(matches!(
        err,
        SteplineError::JumpOutsideMain {
            section: Section::Pre,
            ..
        }
    ));
}

#[tokio::test]
async fn test_run_from_starts_at_label() {
    let pipeline = PipelineBuilder::new("resume")
        .pre(append("<"))
        .step_labeled("first", append("1"))
        .step_labeled("second", append("2"))
        .post(append(">"))
        .build()
        .unwrap();

    let result = pipeline.run_from("second", String::new()).await.unwrap();
    assert_eq!(result.value, "<2>");
    assert_timing_names(&result, &["pre0", "s1:second", "post0"]);

    let err = pipeline.run_from("missing", String::new()).await.unwrap_err();
    assert!(matches!(err, SteplineError::UnknownLabel { .. }));
}

#[tokio::test]
async fn test_runs_are_independent() {
    let pipeline = failing_middle(true);

    let first = pipeline.run("X".to_string()).await.unwrap();
    let second = pipeline.run("X".to_string()).await.unwrap();

    assert_eq!(first.value, second.value);
    assert_eq!(first.errors.len(), second.errors.len());
    assert_eq!(first.invocation_order(), second.invocation_order());
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_concurrent_runs_share_one_pipeline() {
    let pipeline = PipelineBuilder::new("shared")
        .step(Action::unary(|v: u64| v * 2))
        .step(Action::unary(|v: u64| v + 1))
        .build()
        .unwrap();

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run(i).await })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.value, i as u64 * 2 + 1);
    }
}

#[tokio::test]
async fn test_post_runs_after_main_failure() {
    let pipeline = PipelineBuilder::new("cleanup")
        .step(fail("main broke"))
        .post(append("-cleaned"))
        .build()
        .unwrap();

    let result = pipeline.run("v".to_string()).await.unwrap();
    assert_eq!(result.value, "v-cleaned");
    assert!(result.short_circuited);
    assert_error_count(&result, 1);
}

#[tokio::test]
async fn test_post_failure_stops_remaining_post_steps() {
    let pipeline = PipelineBuilder::new("post")
        .step(append("m"))
        .post(append("1"))
        .post(fail("post broke"))
        .post(append("3"))
        .build()
        .unwrap();

    let result = pipeline.run(String::new()).await.unwrap();
    assert_eq!(result.value, "m1");
    assert_timing_names(&result, &["s0", "post0", "post1"]);
    assert_eq!(result.errors[0].section, Section::Post);
}

#[tokio::test]
async fn test_recovery_hook_replaces_value() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook_seen = Arc::clone(&seen);
    let pipeline = PipelineBuilder::new("recover")
        .short_circuit_on_exception(false)
        .step(append("A"))
        .step(fail("bad input"))
        .step(append("B"))
        .on_error(move |value: String, error| {
            hook_seen.lock().push(error.step_name.clone());
            format!("{value}[recovered]")
        })
        .build()
        .unwrap();

    let result = pipeline.run("X".to_string()).await.unwrap();
    assert_eq!(result.value, "XA[recovered]B");
    assert_eq!(*seen.lock(), vec!["s1".to_string()]);
}

#[tokio::test]
async fn test_panicking_step_is_captured() {
    let pipeline = PipelineBuilder::new("panic")
        .step(Action::unary(|_: i32| -> i32 { panic!("exploded") }))
        .post(Action::unary(|v: i32| v + 1))
        .build()
        .unwrap();

    let result = pipeline.run(1).await.unwrap();
    assert_eq!(result.value, 2);
    assert_eq!(result.errors[0].message, "panicked: exploded");
}

#[tokio::test]
async fn test_control_short_circuit_stops_main() {
    let pipeline = PipelineBuilder::new("control")
        .step(Action::controlled(|v: String, control: &mut RunControl| {
            control.short_circuit();
            StepOutcome::Continue(v + "1")
        }))
        .step(append("2"))
        .post(append("!"))
        .build()
        .unwrap();

    let result = pipeline.run(String::new()).await.unwrap();
    assert_eq!(result.value, "1!");
    assert!(result.short_circuited);
}

#[tokio::test]
async fn test_short_circuit_then_jump_stops_main() {
    let log = InvocationLog::new();
    let pipeline = PipelineBuilder::new("flag-then-jump")
        .step(Action::controlled(|v: String, control: &mut RunControl| {
            control.short_circuit();
            StepOutcome::jump(v + "A", "B")
        }))
        .step(record(&log, "skipped"))
        .step_labeled("B", record(&log, "B"))
        .post(append("!"))
        .build()
        .unwrap();

    let result = pipeline.run(String::new()).await.unwrap();
    assert!(log.is_empty(), "main ran after short-circuit: {:?}", log.entries());
    assert_eq!(result.value, "A!");
    assert!(result.short_circuited);
    assert_no_errors(&result);
    assert_timing_names(&result, &["s0", "post0"]);
}

#[tokio::test]
async fn test_short_circuit_then_failure_stops_main_without_policy() {
    let log = InvocationLog::new();
    let pipeline = PipelineBuilder::new("flag-then-fail")
        .short_circuit_on_exception(false)
        .step(append("A"))
        .step(Action::controlled(|_v: String, control: &mut RunControl| {
            control.short_circuit();
            StepOutcome::fail("stopped")
        }))
        .step(record(&log, "next"))
        .build()
        .unwrap();

    let result = pipeline.run(String::new()).await.unwrap();
    assert!(log.is_empty(), "main ran after short-circuit: {:?}", log.entries());
    assert_eq!(result.value, "A");
    assert!(result.short_circuited);
    assert_error_count(&result, 1);
}

#[tokio::test]
async fn test_delayed_jump_uses_sleeper_and_clock() {
    let clock = Arc::new(ManualClock::new());
    let sleeper = Arc::new(RecordingSleeper::with_clock(Arc::clone(&clock)));
    let pipeline = PipelineBuilder::new("delayed")
        .clock(clock.clone())
        .sleeper(sleeper.clone())
        .step(Action::jump_when(|n: &u32| *n == 0, "done", Duration::from_millis(250)))
        .step(Action::unary(|n: u32| n + 100))
        .step_labeled("done", Action::unary(|n: u32| n + 1))
        .build()
        .unwrap();

    let result = pipeline.run(0).await.unwrap();

    assert_eq!(result.value, 1);
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(250)]);
    assert_eq!(result.total_duration, Duration::from_millis(250));
    assert!(result.timings.iter().all(|t| t.elapsed == Duration::ZERO));
}

#[tokio::test]
async fn test_real_sleep_for_delayed_jump() {
    let pipeline = PipelineBuilder::new("sleepy")
        .step(Action::jump_when(|n: &u32| *n == 0, "end", Duration::from_millis(10)))
        .step_labeled("end", Action::unary(|n: u32| n + 1))
        .build()
        .unwrap();

    let result = pipeline.run(0).await.unwrap();
    assert_eq!(result.value, 1);
    assert!(result.total_duration >= Duration::from_millis(10));
}

#[tokio::test]
async fn test_metrics_events_follow_run() {
    let metrics = Arc::new(CollectingMetrics::new());
    let pipeline = PipelineBuilder::new("observed")
        .metrics(metrics.clone())
        .step_labeled("A", Action::jump_when(|_: &i32| true, "C", Duration::ZERO))
        .step(Action::unary(|v: i32| v))
        .step_labeled("C", Action::fallible(|_: i32| Err::<i32, _>("nope")))
        .build()
        .unwrap();

    let result = pipeline.run(1).await.unwrap();

    assert_eq!(
        metrics.event_types(),
        vec![
            "pipeline.start",
            "step.start",
            "step.end",
            "step.jump",
            "step.start",
            "step.end",
            "step.error",
            "pipeline.end",
        ]
    );
    let end = &metrics.events_of_type("pipeline.end")[0];
    assert_eq!(end["runId"], Value::String(result.run_id.to_string()));
    assert_eq!(end["pipeline"], "observed");
}

#[tokio::test]
async fn test_summary_post_action_reports_run() {
    let summaries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&summaries);
    let pipeline = PipelineBuilder::new("summary")
        .short_circuit_on_exception(false)
        .step(append("a"))
        .step(fail("oops"))
        .post(metrics_summary_with(move |summary| sink.lock().push(summary)))
        .build()
        .unwrap();

    let result = pipeline.run(String::new()).await.unwrap();
    assert_timing_names(&result, &["s0", "s1", "post0:metrics"]);

    let summaries = summaries.lock();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary["pipeline"], "summary");
    assert_eq!(summary["errorCount"], 1);
    assert_eq!(summary["shortCircuited"], false);
    let latency = summary["actionLatencyMs"].as_object().unwrap();
    assert!(latency.contains_key("s0"));
    assert!(latency.contains_key("s1"));
    assert!(!latency.contains_key("post0:metrics"));
}

#[tokio::test]
async fn test_manual_clock_drives_timings() {
    let clock = Arc::new(ManualClock::new());
    let step_clock = Arc::clone(&clock);
    let pipeline = PipelineBuilder::new("timed")
        .clock(clock.clone())
        .step(Action::unary(move |v: i32| {
            step_clock.advance(Duration::from_millis(40));
            v
        }))
        .step(Action::unary(|v: i32| v))
        .build()
        .unwrap();

    let result = pipeline.run(0).await.unwrap();
    assert_eq!(result.timings[0].elapsed, Duration::from_millis(40));
    assert_eq!(result.timings[1].elapsed, Duration::ZERO);
    assert_eq!(result.total_duration, Duration::from_millis(40));
}
