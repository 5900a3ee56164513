//! Pipeline instance lifecycle under concurrent load.
//!
//! A [`PipelineProvider`] hands each run a pipeline instance according to a
//! [`ProviderMode`]:
//! - `Shared`: one instance for everyone (runs never share run control)
//! - `Pooled`: a bounded [`PipelinePool`] with borrow/return per run
//! - `PerRun`: a fresh instance per call

mod config;
mod pool;

pub use config::{default_pool_max, ProviderConfig, ProviderMode, MAX_DEFAULT_POOL};
pub(crate) use pool::CreationSlot;
pub use pool::{PipelineFactory, PipelinePool, PoolStats, PooledPipeline};

use crate::core::PipelineResult;
use crate::errors::Result;
use crate::pipeline::Pipeline;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

enum Source<T> {
    Shared(Pipeline<T>),
    Pooled(PipelinePool<T>),
    PerRun(Arc<PipelineFactory<T>>),
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Shared(pipeline) => Self::Shared(pipeline.clone()),
            Self::Pooled(pool) => Self::Pooled(pool.clone()),
            Self::PerRun(factory) => Self::PerRun(Arc::clone(factory)),
        }
    }
}

/// Resolves a pipeline instance per run and executes it.
///
/// Cloning is cheap: clones share the same instance, pool or factory.
pub struct PipelineProvider<T> {
    source: Source<T>,
}

impl<T> Clone for PipelineProvider<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T> fmt::Debug for PipelineProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("PipelineProvider");
        out.field("mode", &self.mode());
        if let Source::Pooled(pool) = &self.source {
            out.field("pool", &pool.stats());
        }
        out.finish()
    }
}

impl<T> PipelineProvider<T> {
    /// The lifecycle mode.
    #[must_use]
    pub fn mode(&self) -> ProviderMode {
        match self.source {
            Source::Shared(_) => ProviderMode::Shared,
            Source::Pooled(_) => ProviderMode::Pooled,
            Source::PerRun(_) => ProviderMode::PerRun,
        }
    }

    /// Pool counters, for pooled providers.
    #[must_use]
    pub fn pool_stats(&self) -> Option<PoolStats> {
        match &self.source {
            Source::Pooled(pool) => Some(pool.stats()),
            _ => None,
        }
    }
}

impl<T: Clone + Send + 'static> PipelineProvider<T> {
    /// One instance reused by all callers.
    #[must_use]
    pub fn shared(pipeline: Pipeline<T>) -> Self {
        Self {
            source: Source::Shared(pipeline),
        }
    }

    /// A bounded pool of at most `max` instances built by `factory`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `max` is zero.
    pub fn pooled<F>(max: usize, factory: F) -> Result<Self>
    where
        F: Fn() -> Result<Pipeline<T>> + Send + Sync + 'static,
    {
        Ok(Self {
            source: Source::Pooled(PipelinePool::new(max, factory)?),
        })
    }

    /// A pool sized by [`default_pool_max`].
    ///
    /// # Errors
    ///
    /// Never fails in practice; the default size is at least one.
    pub fn pooled_default<F>(factory: F) -> Result<Self>
    where
        F: Fn() -> Result<Pipeline<T>> + Send + Sync + 'static,
    {
        Self::pooled(default_pool_max(), factory)
    }

    /// A fresh instance per run.
    #[must_use]
    pub fn per_run<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Pipeline<T>> + Send + Sync + 'static,
    {
        Self {
            source: Source::PerRun(Arc::new(factory)),
        }
    }

    /// Builds a provider from configuration. `Shared` invokes the factory
    /// once, up front.
    ///
    /// # Errors
    ///
    /// Propagates factory errors and pool size validation.
    pub fn from_config<F>(config: &ProviderConfig, factory: F) -> Result<Self>
    where
        F: Fn() -> Result<Pipeline<T>> + Send + Sync + 'static,
    {
        let source = match config.mode {
            ProviderMode::Shared => Source::Shared(factory()?),
            ProviderMode::Pooled => Source::Pooled(PipelinePool::from_factory(
                config.effective_pool_max(),
                Arc::new(factory),
            )?),
            ProviderMode::PerRun => Source::PerRun(Arc::new(factory)),
        };
        debug!(mode = ?config.mode, "pipeline provider configured");
        Ok(Self { source })
    }

    /// Runs `input` on an instance resolved per the mode. A pooled instance
    /// is returned to the pool when the run completes.
    ///
    /// # Errors
    ///
    /// Fails on pool or factory errors, or as [`Pipeline::run`] does.
    pub async fn run(&self, input: T) -> Result<PipelineResult<T>> {
        self.execute(None, input).await
    }

    /// Like [`PipelineProvider::run`], starting main at `label`.
    ///
    /// # Errors
    ///
    /// As [`PipelineProvider::run`] and [`Pipeline::run_from`].
    pub async fn run_from(&self, label: &str, input: T) -> Result<PipelineResult<T>> {
        self.execute(Some(label), input).await
    }

    async fn execute(&self, label: Option<&str>, input: T) -> Result<PipelineResult<T>> {
        match &self.source {
            Source::Shared(pipeline) => start(pipeline, label, input).await,
            Source::Pooled(pool) => {
                let borrowed = pool.borrow().await?;
                start(&borrowed, label, input).await
            }
            Source::PerRun(factory) => {
                let pipeline = factory()?;
                start(&pipeline, label, input).await
            }
        }
    }
}

async fn start<T: Clone + Send + 'static>(
    pipeline: &Pipeline<T>,
    label: Option<&str>,
    input: T,
) -> Result<PipelineResult<T>> {
    match label {
        Some(label) => pipeline.run_from(label, input).await,
        None => pipeline.run(input).await,
    }
}
