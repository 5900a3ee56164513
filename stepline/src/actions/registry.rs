//! Named action registry.
//!
//! Declarative pipeline loaders refer to local steps by name. The registry
//! is populated at startup and resolves those names without any runtime
//! type lookup.

use super::{Action, ActionPool, Resettable, Step};
use crate::errors::{Result, SteplineError};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Resolves a declarative reference to an action.
pub trait ActionResolver<T>: Send + Sync {
    /// Returns the action for `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`SteplineError::UnresolvedAction`] naming the reference when
    /// nothing is registered under it.
    fn resolve(&self, reference: &str) -> Result<Action<T>>;
}

type ActionFactory<T> = Arc<dyn Fn() -> Action<T> + Send + Sync>;

enum Entry<T> {
    Shared(Action<T>),
    Factory(ActionFactory<T>),
}

/// Concurrent map from reference names to actions.
pub struct ActionRegistry<T> {
    entries: DashMap<String, Entry<T>>,
}

impl<T> Default for ActionRegistry<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<T> fmt::Debug for ActionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl<T> ActionRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action shared by every pipeline that resolves it.
    ///
    /// Replaces any previous entry with the same name.
    pub fn register(&self, name: impl Into<String>, action: Action<T>) {
        self.entries.insert(name.into(), Entry::Shared(action));
    }

    /// Registers a factory invoked on every resolve, so each pipeline gets
    /// its own instance.
    pub fn register_factory<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Action<T> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Entry::Factory(Arc::new(factory)));
    }

    /// Registers a pool of step instances. Every pipeline that resolves
    /// `name` draws from the same pool, so one instance never serves two
    /// invocations at once.
    pub fn register_pooled<S>(&self, name: impl Into<String>, pool: ActionPool<S>)
    where
        T: Send + 'static,
        S: Step<T> + Resettable + 'static,
    {
        self.entries.insert(name.into(), Entry::Shared(pool.into_action()));
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Send + Sync> ActionResolver<T> for ActionRegistry<T> {
    fn resolve(&self, reference: &str) -> Result<Action<T>> {
        let entry = self
            .entries
            .get(reference)
            .ok_or_else(|| SteplineError::UnresolvedAction {
                reference: reference.to_string(),
            })?;
        Ok(match entry.value() {
            Entry::Shared(action) => action.clone(),
            Entry::Factory(factory) => factory(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::RunControl;
    use crate::core::StepOutcome;
    use crate::pipeline::PipelineBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_resolve_registered_and_missing() {
        let registry = ActionRegistry::<String>::new();
        registry.register("trim", Action::unary(|s: String| s.trim().to_string()));

        assert!(registry.contains("trim"));
        assert!(registry.resolve("trim").is_ok());

        match registry.resolve("nope") {
            Err(SteplineError::UnresolvedAction { reference }) => assert_eq!(reference, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_factory_runs_per_resolve() {
        let registry = ActionRegistry::<i32>::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        registry.register_factory("inc", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Action::unary(|v: i32| v + 1)
        });

        registry.resolve("inc").unwrap();
        registry.resolve("inc").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    struct Stamp {
        id: usize,
    }

    #[async_trait::async_trait]
    impl Step<Vec<usize>> for Stamp {
        async fn apply(&self, mut value: Vec<usize>, _control: &mut RunControl) -> StepOutcome<Vec<usize>> {
            value.push(self.id);
            StepOutcome::Continue(value)
        }
    }

    impl Resettable for Stamp {}

    #[tokio::test]
    async fn test_pooled_entry_shares_one_pool() {
        let registry = ActionRegistry::<Vec<usize>>::new();
        let next_id = Arc::new(AtomicUsize::new(0));
        let ids = Arc::clone(&next_id);
        let pool = ActionPool::new(2, move || Stamp {
            id: ids.fetch_add(1, Ordering::SeqCst),
        })
        .unwrap();
        registry.register_pooled("stamp", pool.clone());

        let first = PipelineBuilder::new("first")
            .step(registry.resolve("stamp").unwrap())
            .build()
            .unwrap();
        let second = PipelineBuilder::new("second")
            .step(registry.resolve("stamp").unwrap())
            .build()
            .unwrap();

        assert_eq!(first.run(Vec::new()).await.unwrap().value, vec![0]);
        assert_eq!(second.run(Vec::new()).await.unwrap().value, vec![0]);
        assert_eq!(next_id.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().created, 1);
    }

    #[test]
    fn test_names_sorted() {
        let registry = ActionRegistry::<i32>::new();
        registry.register("b", Action::unary(|v: i32| v));
        registry.register("a", Action::unary(|v: i32| v));
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }
}
