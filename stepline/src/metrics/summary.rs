//! Run summary as an ordinary post-action.

use crate::actions::Action;
use crate::control::RunControl;
use crate::core::StepOutcome;
use crate::utils::duration_ms;
use serde_json::{json, Map, Value};
use tracing::info;

/// Builds a JSON summary of the run so far.
///
/// Latencies of steps visited more than once are summed.
#[must_use]
pub fn summarize(control: &RunControl) -> Value {
    let mut latency = Map::new();
    for timing in control.timings() {
        let ms = duration_ms(timing.elapsed);
        let total = latency
            .get(&timing.step_name)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            + ms;
        latency.insert(timing.step_name.clone(), json!(total));
    }
    json!({
        "pipeline": control.pipeline_name(),
        "runId": control.run_id().to_string(),
        "shortCircuited": control.is_short_circuited(),
        "errorCount": control.errors().len(),
        "pipelineLatencyMs": duration_ms(control.elapsed()),
        "actionLatencyMs": Value::Object(latency),
    })
}

/// A post-action that logs the run summary and passes the value through.
#[must_use]
pub fn metrics_summary_action<T: Send + 'static>() -> Action<T> {
    metrics_summary_with(|summary| {
        info!(summary = %summary, "pipeline metrics");
    })
}

/// A post-action that hands the run summary to `report`.
#[must_use]
pub fn metrics_summary_with<T, F>(report: F) -> Action<T>
where
    T: Send + 'static,
    F: Fn(Value) + Send + Sync + 'static,
{
    Action::controlled(move |value: T, control: &mut RunControl| {
        report(summarize(control));
        StepOutcome::Continue(value)
    })
    .with_name("metrics")
}
