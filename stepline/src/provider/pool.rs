//! Bounded pool of pipeline instances.

use crate::errors::{PipelineValidationError, Result, SteplineError};
use crate::pipeline::Pipeline;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Builds a new pipeline instance on demand.
pub type PipelineFactory<T> = dyn Fn() -> Result<Pipeline<T>> + Send + Sync;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured maximum.
    pub max: usize,
    /// Instances constructed and not rolled back.
    pub created: usize,
    /// Instances waiting in the idle set.
    pub idle: usize,
    /// Instances currently borrowed.
    pub in_use: usize,
}

struct PoolInner<T> {
    max: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Pipeline<T>>>,
    created: AtomicUsize,
    factory: Arc<PipelineFactory<T>>,
}

/// A semaphore-guarded free list of pipelines.
///
/// The semaphore holds one permit per instance slot, so at most `max`
/// borrowers hold an instance at once and waiters are served in FIFO order.
/// Instances are created lazily: a borrower takes an idle instance if there
/// is one, otherwise it constructs a new one. A failed construction rolls the
/// creation counter back.
pub struct PipelinePool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for PipelinePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for PipelinePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelinePool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<T> PipelinePool<T> {
    /// Creates an empty pool holding at most `max` instances.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `max` is zero.
    pub fn new<F>(max: usize, factory: F) -> Result<Self>
    where
        F: Fn() -> Result<Pipeline<T>> + Send + Sync + 'static,
    {
        Self::from_factory(max, Arc::new(factory))
    }

    pub(crate) fn from_factory(max: usize, factory: Arc<PipelineFactory<T>>) -> Result<Self> {
        if max == 0 {
            return Err(PipelineValidationError::pool_size(max).into());
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                max,
                permits: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(Vec::with_capacity(max)),
                created: AtomicUsize::new(0),
                factory,
            }),
        })
    }

    /// Borrows an instance, waiting while every slot is in use.
    ///
    /// # Errors
    ///
    /// Fails if the pool was closed or the factory failed.
    pub async fn borrow(&self) -> Result<PooledPipeline<T>> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| SteplineError::PoolClosed)?;
        self.checkout(permit)
    }

    /// Like [`PipelinePool::borrow`], giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SteplineError::PoolTimeout`] if no slot freed up in time.
    pub async fn borrow_timeout(&self, timeout: Duration) -> Result<PooledPipeline<T>> {
        match tokio::time::timeout(timeout, self.borrow()).await {
            Ok(borrowed) => borrowed,
            Err(_) => Err(SteplineError::PoolTimeout {
                waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<PooledPipeline<T>> {
        let reused = self.inner.idle.lock().pop();
        let pipeline = match reused {
            Some(pipeline) => pipeline,
            None => {
                // holding a permit with an empty idle set means created < max
                let slot = CreationSlot::claim(&self.inner.created);
                match (self.inner.factory)() {
                    Ok(pipeline) => {
                        let slot = slot.commit();
                        debug!(pipeline = %pipeline.name(), slot, max = self.inner.max, "pool created instance");
                        pipeline
                    }
                    Err(err) => {
                        warn!(error = %err, "pool factory failed");
                        return Err(err);
                    }
                }
            }
        };
        Ok(PooledPipeline {
            pipeline,
            pool: Arc::clone(&self.inner),
            permit: Some(permit),
        })
    }

    /// Stops handing out instances. Pending and later borrows fail with
    /// [`SteplineError::PoolClosed`]; outstanding borrows are unaffected.
    pub fn close(&self) {
        self.inner.permits.close();
    }

    /// Returns true once [`PipelinePool::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let created = self.inner.created.load(Ordering::SeqCst);
        let idle = self.inner.idle.lock().len();
        PoolStats {
            max: self.inner.max,
            created,
            idle,
            in_use: created.saturating_sub(idle),
        }
    }
}

/// One reserved increment of a creation counter. Dropped without
/// [`CreationSlot::commit`], including while unwinding out of a panicking
/// factory, it gives the increment back.
pub(crate) struct CreationSlot<'a> {
    created: &'a AtomicUsize,
    index: usize,
    committed: bool,
}

impl<'a> CreationSlot<'a> {
    pub(crate) fn claim(created: &'a AtomicUsize) -> Self {
        let index = created.fetch_add(1, Ordering::SeqCst);
        Self {
            created,
            index,
            committed: false,
        }
    }

    /// Keeps the increment and returns the zero-based slot index.
    pub(crate) fn commit(mut self) -> usize {
        self.committed = true;
        self.index
    }
}

impl Drop for CreationSlot<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.created.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A borrowed pipeline. Dropping it returns the instance to the pool.
pub struct PooledPipeline<T> {
    pipeline: Pipeline<T>,
    pool: Arc<PoolInner<T>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<T> fmt::Debug for PooledPipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledPipeline").field(&self.pipeline).finish()
    }
}

impl<T> Deref for PooledPipeline<T> {
    type Target = Pipeline<T>;

    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

impl<T> Drop for PooledPipeline<T> {
    fn drop(&mut self) {
        self.pool.idle.lock().push(self.pipeline.clone());
        // the instance must be idle before the next waiter wakes
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::pipeline::PipelineBuilder;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::panic::AssertUnwindSafe;

    fn counting_factory(counter: Arc<AtomicUsize>) -> impl Fn() -> Result<Pipeline<u32>> + Send + Sync {
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            PipelineBuilder::new(format!("pooled-{n}"))
                .step(Action::unary(|v: u32| v + 1))
                .build()
        }
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let err = PipelinePool::new(0, counting_factory(Arc::default())).unwrap_err();
        assert!(matches!(err, SteplineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_instances_are_reused() {
        let built = Arc::new(AtomicUsize::new(0));
        let pool = PipelinePool::new(2, counting_factory(Arc::clone(&built))).unwrap();

        let first = pool.borrow().await.unwrap();
        let name = first.name().to_string();
        drop(first);

        let again = pool.borrow().await.unwrap();
        assert_eq!(again.name(), name);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(
            pool.stats(),
            PoolStats {
                max: 2,
                created: 1,
                idle: 0,
                in_use: 1
            }
        );
    }

    #[tokio::test]
    async fn test_factory_failure_rolls_back_counter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = Arc::clone(&calls);
        let pool = PipelinePool::new(1, move || {
            if factory_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(SteplineError::Internal("factory down".into()));
            }
            PipelineBuilder::new("ok").step(Action::unary(|v: u32| v)).build()
        })
        .unwrap();

        assert!(pool.borrow().await.is_err());
        assert_eq!(pool.stats().created, 0);

        let borrowed = pool.borrow().await.unwrap();
        assert_eq!(borrowed.name(), "ok");
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_factory_panic_rolls_back_counter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = Arc::clone(&calls);
        let pool = PipelinePool::new(1, move || {
            assert!(factory_calls.fetch_add(1, Ordering::SeqCst) > 0, "factory exploded");
            PipelineBuilder::new("ok").step(Action::unary(|v: u32| v)).build()
        })
        .unwrap();

        let first = AssertUnwindSafe(pool.borrow()).catch_unwind().await;
        assert!(first.is_err());
        assert_eq!(pool.stats().created, 0);

        let borrowed = pool.borrow().await.unwrap();
        assert_eq!(borrowed.name(), "ok");
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_borrow_timeout_when_exhausted() {
        let pool = PipelinePool::new(1, counting_factory(Arc::default())).unwrap();
        let _held = pool.borrow().await.unwrap();

        let err = pool.borrow_timeout(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, SteplineError::PoolTimeout { waited_ms: 20 }));
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_borrows() {
        let pool = PipelinePool::new(1, counting_factory(Arc::default())).unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.borrow().await.unwrap_err(), SteplineError::PoolClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_instance_is_shared_between_borrowers() {
        const MAX: usize = 3;
        const CALLERS: usize = 16;

        let built = Arc::new(AtomicUsize::new(0));
        let pool = PipelinePool::new(MAX, counting_factory(Arc::clone(&built))).unwrap();
        let in_use = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let pool = pool.clone();
                let in_use = Arc::clone(&in_use);
                tokio::spawn(async move {
                    let borrowed = pool.borrow().await.unwrap();
                    let name = borrowed.name().to_string();
                    assert!(in_use.lock().insert(name.clone()), "{name} handed out twice");
                    let result = borrowed.run(1).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_use.lock().remove(&name);
                    drop(borrowed);
                    result.value
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 2);
        }

        let stats = pool.stats();
        assert!(stats.created <= MAX);
        assert_eq!(stats.created, built.load(Ordering::SeqCst));
        assert_eq!(stats.in_use, 0);
    }
}
