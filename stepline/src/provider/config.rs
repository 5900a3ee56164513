//! Provider configuration.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Upper bound for the computed default pool size.
pub const MAX_DEFAULT_POOL: usize = 256;

/// How a provider obtains a pipeline instance for each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    /// One instance reused by every caller.
    #[default]
    Shared,
    /// A bounded pool; each run borrows an instance and returns it.
    Pooled,
    /// A fresh instance per run, discarded afterwards.
    PerRun,
}

/// Configuration for a [`PipelineProvider`](super::PipelineProvider).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Instance lifecycle strategy.
    pub mode: ProviderMode,
    /// Pool size for [`ProviderMode::Pooled`]. `None` uses [`default_pool_max`].
    pub pool_max: Option<usize>,
}

impl ProviderConfig {
    /// Creates a config for `mode`.
    #[must_use]
    pub fn new(mode: ProviderMode) -> Self {
        Self {
            mode,
            pool_max: None,
        }
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_pool_max(mut self, pool_max: usize) -> Self {
        self.pool_max = Some(pool_max);
        self
    }

    /// The pool size in effect.
    #[must_use]
    pub fn effective_pool_max(&self) -> usize {
        self.pool_max.unwrap_or_else(default_pool_max)
    }
}

/// Eight instances per logical core, clamped to `[1, 256]`.
#[must_use]
pub fn default_pool_max() -> usize {
    let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    cores.saturating_mul(8).clamp(1, MAX_DEFAULT_POOL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_pool_max_is_clamped() {
        let max = default_pool_max();
        assert!((8..=MAX_DEFAULT_POOL).contains(&max));
        assert_eq!(max % 8, 0);
    }

    #[test]
    fn test_config_from_json() {
        let config: ProviderConfig =
            serde_json::from_str(r#"{"mode": "pooled", "pool_max": 4}"#).unwrap();
        assert_eq!(config.mode, ProviderMode::Pooled);
        assert_eq!(config.effective_pool_max(), 4);

        let config: ProviderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.mode, ProviderMode::Shared);
        assert_eq!(config.effective_pool_max(), default_pool_max());
    }

    #[test]
    fn test_per_run_serializes_snake_case() {
        let json = serde_json::to_string(&ProviderMode::PerRun).unwrap();
        assert_eq!(json, "\"per_run\"");
    }
}
