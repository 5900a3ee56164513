//! Pools of step instances.
//!
//! A stateful step cannot be shared by concurrent runs. An [`ActionPool`]
//! keeps a bounded set of instances and lends one to each invocation, so
//! pipelines built from the same pool (or resolved from the same registry
//! entry) never touch one instance at the same time.

use super::{Action, Step};
use crate::control::RunControl;
use crate::core::StepOutcome;
use crate::errors::{PipelineValidationError, Result};
use crate::provider::{default_pool_max, CreationSlot, PoolStats};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// A step instance that can be reused after clearing its per-run state.
pub trait Resettable {
    /// Called when an invocation completes, before the instance goes back
    /// to the pool.
    fn reset(&mut self) {}
}

type StepFactory<S> = dyn Fn() -> S + Send + Sync;

struct ActionPoolInner<S> {
    max: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<S>>,
    created: AtomicUsize,
    factory: Box<StepFactory<S>>,
}

/// A semaphore-guarded free list of step instances.
///
/// Instances are created lazily up to `max`; further invocations wait for a
/// release. An invocation that panics discards its instance.
pub struct ActionPool<S> {
    inner: Arc<ActionPoolInner<S>>,
}

impl<S> Clone for ActionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for ActionPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<S: Send + 'static> ActionPool<S> {
    /// Creates an empty pool of at most `max` instances.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `max` is zero.
    pub fn new<F>(max: usize, factory: F) -> Result<Self>
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        if max == 0 {
            return Err(PipelineValidationError::pool_size(max).into());
        }
        Ok(Self {
            inner: Arc::new(ActionPoolInner {
                max,
                permits: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(Vec::with_capacity(max)),
                created: AtomicUsize::new(0),
                factory: Box::new(factory),
            }),
        })
    }

    /// A pool sized by [`default_pool_max`].
    ///
    /// # Errors
    ///
    /// Never fails in practice; the default size is at least one.
    pub fn with_default_max<F>(factory: F) -> Result<Self>
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self::new(default_pool_max(), factory)
    }

    /// Wraps the pool as an action. Every clone of the action draws from
    /// this pool.
    #[must_use]
    pub fn into_action<T>(self) -> Action<T>
    where
        T: Send + 'static,
        S: Step<T> + Resettable,
    {
        Action::step(PooledStep { pool: self })
    }

    async fn lease(&self) -> Option<Lease<S>> {
        let permit = Arc::clone(&self.inner.permits).acquire_owned().await.ok()?;
        let reused = self.inner.idle.lock().pop();
        let instance = match reused {
            Some(instance) => instance,
            None => {
                let slot = CreationSlot::claim(&self.inner.created);
                let instance = (self.inner.factory)();
                let slot = slot.commit();
                debug!(slot, max = self.inner.max, "action pool created instance");
                instance
            }
        };
        Some(Lease {
            instance: Some(instance),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

impl<S> ActionPool<S> {
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

/// One borrowed instance. Dropped without [`Lease::release`] the instance
/// is discarded and its creation slot freed.
struct Lease<S> {
    instance: Option<S>,
    pool: Arc<ActionPoolInner<S>>,
    _permit: OwnedSemaphorePermit,
}

impl<S: Resettable> Lease<S> {
    fn release(mut self) {
        if let Some(instance) = self.instance.as_mut() {
            instance.reset();
        }
        if let Some(instance) = self.instance.take() {
            self.pool.idle.lock().push(instance);
        }
    }
}

impl<S> Drop for Lease<S> {
    fn drop(&mut self) {
        if self.instance.take().is_some() {
            self.pool.created.fetch_sub(1, Ordering::SeqCst);
            debug!("discarded pooled instance after an unfinished invocation");
        }
        // the permit field is released after this body runs
    }
}

struct PooledStep<S> {
    pool: ActionPool<S>,
}

#[async_trait]
impl<T, S> Step<T> for PooledStep<S>
where
    T: Send + 'static,
    S: Step<T> + Resettable + 'static,
{
    async fn apply(&self, value: T, control: &mut RunControl) -> StepOutcome<T> {
        let Some(lease) = self.pool.lease().await else {
            return StepOutcome::fail("action pool is closed");
        };
        let outcome = match lease.instance.as_ref() {
            Some(instance) => instance.apply(value, control).await,
            None => StepOutcome::fail("pooled instance missing"),
        };
        lease.release();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Counts its own invocations and flags any overlapping use.
    struct Tally {
        busy: AtomicBool,
        seen: AtomicUsize,
        overlap: Arc<AtomicBool>,
        resets: Arc<AtomicUsize>,
    }

    impl Tally {
        fn factory(
            overlap: &Arc<AtomicBool>,
            resets: &Arc<AtomicUsize>,
        ) -> impl Fn() -> Self + Send + Sync + 'static {
            let overlap = Arc::clone(overlap);
            let resets = Arc::clone(resets);
            move || Self {
                busy: AtomicBool::new(false),
                seen: AtomicUsize::new(0),
                overlap: Arc::clone(&overlap),
                resets: Arc::clone(&resets),
            }
        }
    }

    #[async_trait]
    impl Step<u32> for Tally {
        async fn apply(&self, value: u32, _control: &mut RunControl) -> StepOutcome<u32> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlap.store(true, Ordering::SeqCst);
            }
            let seen = self.seen.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.busy.store(false, Ordering::SeqCst);
            StepOutcome::Continue(value + u32::try_from(seen).unwrap_or(u32::MAX))
        }
    }

    impl Resettable for Tally {
        fn reset(&mut self) {
            *self.seen.get_mut() = 0;
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Exploding;

    #[async_trait]
    impl Step<u32> for Exploding {
        async fn apply(&self, _value: u32, _control: &mut RunControl) -> StepOutcome<u32> {
            panic!("instance exploded")
        }
    }

    impl Resettable for Exploding {}

    #[test]
    fn test_zero_size_is_rejected() {
        assert!(ActionPool::new(0, || Exploding).is_err());
    }

    #[tokio::test]
    async fn test_reset_runs_on_every_release() {
        let overlap = Arc::new(AtomicBool::new(false));
        let resets = Arc::new(AtomicUsize::new(0));
        let pool = ActionPool::new(2, Tally::factory(&overlap, &resets)).unwrap();
        let pipeline = PipelineBuilder::new("pooled-step")
            .step(pool.clone().into_action::<u32>())
            .build()
            .unwrap();

        for _ in 0..3 {
            // a reset instance always starts from zero
            assert_eq!(pipeline.run(10).await.unwrap().value, 10);
        }
        assert_eq!(resets.load(Ordering::SeqCst), 3);
        assert_eq!(
            pool.stats(),
            PoolStats {
                max: 2,
                created: 1,
                idle: 1,
                in_use: 0
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_runs_never_share_an_instance() {
        const MAX: usize = 3;
        let overlap = Arc::new(AtomicBool::new(false));
        let resets = Arc::new(AtomicUsize::new(0));
        let pool = ActionPool::new(MAX, Tally::factory(&overlap, &resets)).unwrap();
        let action = pool.clone().into_action::<u32>();
        let pipeline = PipelineBuilder::new("shared-pool")
            .step(action.clone())
            .step(action)
            .build()
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.run(0).await })
            })
            .collect();
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert!(!result.has_errors());
            assert_eq!(result.value, 0);
        }

        assert!(!overlap.load(Ordering::SeqCst), "an instance served two invocations at once");
        assert_eq!(resets.load(Ordering::SeqCst), 32);
        let stats = pool.stats();
        assert!(stats.created <= MAX);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_panicking_instance_is_discarded() {
        let pool = ActionPool::new(1, || Exploding).unwrap();
        let pipeline = PipelineBuilder::new("exploding")
            .step(pool.clone().into_action::<u32>())
            .build()
            .unwrap();

        let result = pipeline.run(1).await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(pool.stats().created, 0);
        assert_eq!(pool.stats().idle, 0);

        // the freed permit lets the next invocation build a fresh instance
        let again = pipeline.run(1).await.unwrap();
        assert_eq!(again.errors.len(), 1);
    }
}
