//! Bounded retries with exponential backoff for transient provider errors.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use cloudfetch_common::{Error, Result};

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Spread each delay by up to 25% either way.
    pub jitter: bool,
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let doubled = self
            .initial_delay
            .checked_mul(2u32.saturating_pow(retry))
            .unwrap_or(self.max_delay);
        let delay = doubled.min(self.max_delay);

        if self.jitter {
            delay.mul_f64(0.75 + rand::random::<f64>() * 0.5)
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Runs an operation until it succeeds, fails permanently, or runs out
/// of retries.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying errors for which `is_transient` holds.
    ///
    /// The error of the last attempt is returned once retries are spent.
    pub async fn execute<F, Fut, T, C>(&self, operation: F, is_transient: C) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let mut retry = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retry > 0 {
                        tracing::debug!(retries = retry, "Succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !is_transient(&err) || retry >= self.config.max_retries {
                if retry > 0 {
                    tracing::warn!(attempts = retry + 1, error = %err, "Giving up");
                }
                return Err(err);
            }

            let delay = self.config.backoff(retry);
            retry += 1;
            tracing::warn!(
                attempt = retry,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
