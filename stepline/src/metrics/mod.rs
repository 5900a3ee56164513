//! Metrics events, sinks and the run summary post-action.

mod event;
mod sink;
mod summary;

pub use event::{MetricsEvent, RunKey};
pub use sink::{CollectingMetrics, LoggingMetrics, MetricsSink, NoopMetrics};
pub use summary::{metrics_summary_action, metrics_summary_with, summarize};
