// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded retries with capped backoff.
//!
//! ```text
//! attempt   exponential (delay=100ms, max=1s)   linear (delay=100ms, max=1s)
//! ───────────────────────────────────────────────────────────────────────────
//!    1              100ms                              100ms
//!    2              200ms                              200ms
//!    3              400ms                              300ms
//!    5                1s (capped)                      500ms
//! ```

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    Exponential,
    Linear,
}

impl fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffKind::Exponential => write!(f, "exponential"),
            BackoffKind::Linear => write!(f, "linear"),
        }
    }
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(BackoffKind::Exponential),
            "linear" => Ok(BackoffKind::Linear),
            other => Err(format!("unknown backoff '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub backoff: BackoffKind,
    /// Base delay.
    pub delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            backoff: BackoffKind::Exponential,
            delay: Duration::from_millis(8_000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the `attempt`-th failure (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = match self.backoff {
            BackoffKind::Exponential => 2u32.saturating_pow(attempt.saturating_sub(1)),
            BackoffKind::Linear => attempt.max(1),
        };
        self.delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    /// Calls `op` until it succeeds or `max_retries` attempts have failed.
    ///
    /// Errors that are not retryable are returned as-is after the attempt that
    /// produced them. Exhausting the budget yields
    /// [`PipelineError::MaxRetriesExceeded`] wrapping the last failure.
    pub async fn execute<F, Fut, T>(
        &self,
        mut op: F,
        config: &RetryConfig,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let max_attempts = config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                debug!("RESILIENCE | Attempt {attempt} failed with a non-retryable error: {error}");
                return Err(error);
            }

            if attempt >= max_attempts {
                return Err(PipelineError::MaxRetriesExceeded {
                    attempts: attempt,
                    cause: Box::new(error),
                });
            }

            let delay = config.delay_for(attempt);
            warn!(
                "RESILIENCE | Attempt {attempt}/{max_attempts} failed, retrying in {} ms: {error}",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
