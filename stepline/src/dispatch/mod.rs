//! Bounded-queue dispatch with producer backpressure.
//!
//! A [`DispatchEngine`] sits in front of a consumer (typically a
//! [`PipelineProvider`](crate::provider::PipelineProvider)) and feeds it one
//! item at a time in publish order.

mod consumer;
mod engine;

pub use consumer::{DispatchConsumer, FnConsumer};
pub use engine::{
    DispatchConfig, DispatchEngine, DispatchMetrics, FailureHandler, DEFAULT_QUEUE_CAPACITY,
};

use thiserror::Error;

/// A rejected publish. The item is handed back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError<T> {
    /// The engine is shutting down or has stopped.
    #[error("dispatch engine is shut down")]
    ShutDown(T),
    /// The queue is full (non-blocking publish only).
    #[error("dispatch queue is full")]
    Full(T),
}

impl<T> DispatchError<T> {
    /// Recovers the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::ShutDown(item) | Self::Full(item) => item,
        }
    }
}
