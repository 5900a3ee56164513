//! Retry utilities with configurable backoff and jitter strategies.
//!
//! Used by remote delegates to repeat a failed request. An operation is
//! attempted at most `max_attempts` times and the last error is returned.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The schedule used by remote delegates: `retries + 1` attempts,
    /// linear backoff from `backoff_ms`, no jitter.
    #[must_use]
    pub fn for_remote(retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: retries as usize + 1,
            base_delay_ms: backoff_ms,
            max_delay_ms: backoff_ms.saturating_mul(u64::from(retries) + 1),
            backoff_strategy: BackoffStrategy::Linear,
            jitter_strategy: JitterStrategy::None,
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }
}

/// State tracking for retry operations.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Number of failed attempts so far.
    pub attempt: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculates the delay before the next attempt.
    #[must_use]
    pub fn calculate_delay(&self, config: &RetryConfig) -> Duration {
        let base = config.base_delay_ms;
        let max = config.max_delay_ms;
        let attempt = self.attempt;

        let delay = match config.backoff_strategy {
            BackoffStrategy::Exponential => {
                let exp = u32::try_from(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exp)).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64 + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match config.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts left.
    GiveUp,
    /// The error is not retryable.
    NotRetryable,
}

/// Decides what to do after a failed attempt.
#[must_use]
pub fn should_retry(state: &mut RetryState, config: &RetryConfig) -> RetryDecision {
    if state.attempt + 1 >= config.max_attempts.max(1) {
        return RetryDecision::GiveUp;
    }
    let delay = state.calculate_delay(config);
    state.attempt += 1;
    RetryDecision::Retry(delay)
}

/// Executes an operation with retry logic.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, key: &str, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(config, key, |_| true, operation).await
}

/// Executes an operation with retry logic, retrying only errors accepted by
/// `retryable`.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    key: &str,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new();

    loop {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        let decision = if retryable(&err) {
            should_retry(&mut state, config)
        } else {
            RetryDecision::NotRetryable
        };
        match decision {
            RetryDecision::Retry(delay) => {
                tracing::debug!(
                    key = %key,
                    attempt = state.attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying after error"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            RetryDecision::GiveUp | RetryDecision::NotRetryable => return Err(err),
        }
    }
}
