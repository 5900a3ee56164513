//! Metrics sink trait and implementations.

use super::MetricsEvent;
use parking_lot::RwLock;
use tracing::{debug, info, trace, Level};

/// Receives metrics events synchronously at well-defined points of a run.
///
/// Implementations must be cheap; they run inline with the steps.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Records one event.
    fn record(&self, event: &MetricsEvent<'_>);
}

/// A sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: &MetricsEvent<'_>) {}
}

/// A sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingMetrics {
    level: Level,
}

impl Default for LoggingMetrics {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingMetrics {
    /// Creates a new logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl MetricsSink for LoggingMetrics {
    fn record(&self, event: &MetricsEvent<'_>) {
        let event_type = event.event_type();
        let key = event.key();
        let data = event.to_json();
        match self.level {
            Level::TRACE => trace!(
                event_type,
                pipeline = key.pipeline,
                run_id = %key.run_id,
                event_data = %data,
                "metrics"
            ),
            Level::DEBUG => debug!(
                event_type,
                pipeline = key.pipeline,
                run_id = %key.run_id,
                event_data = %data,
                "metrics"
            ),
            _ => info!(
                event_type,
                pipeline = key.pipeline,
                run_id = %key.run_id,
                event_data = %data,
                "metrics"
            ),
        }
    }
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingMetrics {
    events: RwLock<Vec<(String, serde_json::Value)>>,
}

impl CollectingMetrics {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.read().clone()
    }

    /// Returns the event types in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns events of one type.
    #[must_use]
    pub fn events_of_type(&self, event_type: &str) -> Vec<serde_json::Value> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl MetricsSink for CollectingMetrics {
    fn record(&self, event: &MetricsEvent<'_>) {
        self.events
            .write()
            .push((event.event_type().to_string(), event.to_json()));
    }
}
