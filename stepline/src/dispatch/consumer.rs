//! Consumers fed by the dispatch loop.

use crate::provider::PipelineProvider;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use tracing::debug;

/// Receives dispatched items one at a time.
#[async_trait]
pub trait DispatchConsumer<T: Send + 'static>: Send + Sync {
    /// Consumes one item. An error is reported and the loop moves on.
    async fn consume(&self, item: T) -> anyhow::Result<()>;
}

/// Runs each item through the provider. Captured step failures are part of
/// the result and do not count as consumer failures; configuration errors do.
#[async_trait]
impl<T: Clone + Send + Sync + 'static> DispatchConsumer<T> for PipelineProvider<T> {
    async fn consume(&self, item: T) -> anyhow::Result<()> {
        let result = self.run(item).await?;
        if result.has_errors() {
            debug!(
                run_id = %result.run_id,
                errors = result.errors.len(),
                "dispatched run captured errors"
            );
        }
        Ok(())
    }
}

/// An async closure consumer.
pub struct FnConsumer<F, T> {
    func: F,
    _item: PhantomData<fn(T)>,
}

impl<F, Fut, T> FnConsumer<F, T>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    /// Wraps `func`.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _item: PhantomData,
        }
    }
}

impl<F, T> fmt::Debug for FnConsumer<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnConsumer").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, T> DispatchConsumer<T> for FnConsumer<F, T>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn consume(&self, item: T) -> anyhow::Result<()> {
        (self.func)(item).await
    }
}
