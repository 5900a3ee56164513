//! Bounded-queue dispatch engine.

use super::{DispatchConsumer, DispatchError};
use crate::errors::{ActionError, PipelineValidationError, Result};
use crate::provider::PipelineProvider;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Handles a consumer failure.
pub type FailureHandler = dyn Fn(&anyhow::Error) + Send + Sync;

/// Dispatch engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Name used in logs.
    pub name: String,
    /// Maximum number of queued items.
    pub capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            name: "dispatch".to_string(),
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DispatchConfig {
    /// Creates a config with the default capacity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    published: AtomicU64,
    consumed: AtomicU64,
    failed: AtomicU64,
    blocked_publishes: AtomicU64,
}

impl DispatchMetrics {
    /// Items accepted into the queue.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Items handed to the consumer, failed or not.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// Items whose consumption failed or panicked.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Publishes that found the queue full and had to wait.
    pub fn blocked_publishes(&self) -> u64 {
        self.blocked_publishes.load(Ordering::Relaxed)
    }
}

/// A bounded queue drained by a single background consumer.
///
/// Items are consumed in FIFO order, one at a time. `publish` waits while
/// the queue is full; tokio's channel wakes blocked producers in order.
/// [`DispatchEngine::shutdown`] stops intake and drains what is queued.
pub struct DispatchEngine<T> {
    name: String,
    capacity: usize,
    sender: mpsc::Sender<T>,
    closing: AtomicBool,
    shutdown: Arc<Notify>,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
    metrics: Arc<DispatchMetrics>,
}

impl<T> fmt::Debug for DispatchEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> DispatchEngine<T> {
    /// Starts the consumption loop. Failures are logged at warn level.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the capacity is zero.
    pub fn start<C>(config: DispatchConfig, consumer: C) -> Result<Self>
    where
        C: DispatchConsumer<T> + 'static,
    {
        let name = config.name.clone();
        Self::start_with_handler(config, consumer, move |err: &anyhow::Error| {
            warn!(dispatch = %name, error = %err, "consumer failed");
        })
    }

    /// Starts the consumption loop with a custom failure handler.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the capacity is zero.
    pub fn start_with_handler<C, H>(config: DispatchConfig, consumer: C, on_error: H) -> Result<Self>
    where
        C: DispatchConsumer<T> + 'static,
        H: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        if config.capacity == 0 {
            return Err(PipelineValidationError::queue_capacity(0).into());
        }

        let (sender, receiver) = mpsc::channel(config.capacity);
        let shutdown = Arc::new(Notify::new());
        let metrics = Arc::new(DispatchMetrics::default());
        let worker = Worker {
            name: config.name.clone(),
            consumer: Arc::new(consumer),
            on_error: Arc::new(on_error),
            metrics: Arc::clone(&metrics),
        };
        let handle = tokio::spawn(worker.run(receiver, Arc::clone(&shutdown)));
        info!(dispatch = %config.name, capacity = config.capacity, "dispatch engine started");

        Ok(Self {
            name: config.name,
            capacity: config.capacity,
            sender,
            closing: AtomicBool::new(false),
            shutdown,
            worker: AsyncMutex::new(Some(handle)),
            metrics,
        })
    }

    /// Appends `item`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the item in [`DispatchError::ShutDown`] if the engine is
    /// shutting down, including when it shuts down while this call waits.
    pub async fn publish(&self, item: T) -> std::result::Result<(), DispatchError<T>> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(DispatchError::ShutDown(item));
        }
        if self.sender.capacity() == 0 {
            self.metrics.blocked_publishes.fetch_add(1, Ordering::Relaxed);
            debug!(dispatch = %self.name, "queue full, producer waiting");
        }
        self.sender
            .send(item)
            .await
            .map_err(|mpsc::error::SendError(item)| DispatchError::ShutDown(item))?;
        self.metrics.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Appends `item` only if there is room.
    ///
    /// # Errors
    ///
    /// Returns the item in [`DispatchError::Full`] or
    /// [`DispatchError::ShutDown`].
    pub fn try_publish(&self, item: T) -> std::result::Result<(), DispatchError<T>> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(DispatchError::ShutDown(item));
        }
        self.sender.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(item) => DispatchError::Full(item),
            mpsc::error::TrySendError::Closed(item) => DispatchError::ShutDown(item),
        })?;
        self.metrics.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stops accepting items, waits for the in-flight item, then consumes
    /// everything already queued before returning. Idempotent; concurrent
    /// callers all return once the drain has finished.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        let mut worker = self.worker.lock().await;
        if let Some(handle) = worker.as_mut() {
            if let Err(err) = handle.await {
                warn!(dispatch = %self.name, error = %err, "dispatch worker ended abnormally");
            }
            *worker = None;
            info!(dispatch = %self.name, consumed = self.metrics.consumed(), "dispatch engine stopped");
        }
    }

    /// Approximate number of queued items.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Returns true until shutdown starts.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.closing.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dispatch counters.
    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }
}

impl<T: Clone + Send + Sync + 'static> DispatchEngine<T> {
    /// Starts an engine that runs every item through `provider`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the capacity is zero.
    pub fn for_provider(config: DispatchConfig, provider: PipelineProvider<T>) -> Result<Self> {
        Self::start(config, provider)
    }
}

struct Worker<T: Send + 'static> {
    name: String,
    consumer: Arc<dyn DispatchConsumer<T>>,
    on_error: Arc<FailureHandler>,
    metrics: Arc<DispatchMetrics>,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(self, mut receiver: mpsc::Receiver<T>, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                biased;
                () = shutdown.notified() => {
                    receiver.close();
                    let mut drained = 0usize;
                    while let Some(item) = receiver.recv().await {
                        self.consume(item).await;
                        drained += 1;
                    }
                    debug!(dispatch = %self.name, drained, "queue drained");
                    break;
                }
                received = receiver.recv() => match received {
                    Some(item) => self.consume(item).await,
                    None => break,
                },
            }
        }
    }

    async fn consume(&self, item: T) {
        let outcome = AssertUnwindSafe(self.consumer.consume(item))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(anyhow::Error::new(ActionError::from_panic(payload.as_ref()))));
        self.metrics.consumed.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = outcome {
            self.metrics.failed.fetch_add(1, Ordering::Relaxed);
            let handler = &self.on_error;
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&err))).is_err() {
                warn!(dispatch = %self.name, "failure handler panicked");
            }
        }
    }
}
