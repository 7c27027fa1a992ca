// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Circuit breaker wrapping a bounded retry policy.
//!
//! The breaker sees one outcome per [`ResilienceExecutor::run`] call: the
//! final result of the whole retry loop, not every individual attempt.

pub mod circuit_breaker;
pub mod clock;
pub mod retry;

use std::future::Future;
use std::sync::Arc;

use crate::error::PipelineError;
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use clock::Clock;
use retry::{RetryConfig, RetryPolicy};

#[derive(Debug)]
pub struct ResilienceExecutor {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ResilienceExecutor {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        ResilienceExecutor {
            breaker: CircuitBreaker::new(config),
            retry: RetryPolicy,
        }
    }

    #[must_use]
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        ResilienceExecutor {
            breaker: CircuitBreaker::with_clock(config, clock),
            retry: RetryPolicy,
        }
    }

    pub async fn run<F, Fut, T>(
        &self,
        op: F,
        retry_config: &RetryConfig,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        self.breaker
            .execute(|| self.retry.execute(op, retry_config))
            .await
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuit_breaker::CircuitState;
    use clock::ManualClock;
    use retry::BackoffKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn quick_retries(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff: BackoffKind::Linear,
            delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_count_as_one_breaker_failure() {
        let executor = ResilienceExecutor::with_clock(
            CircuitBreakerConfig {
                threshold: 2,
                timeout: Duration::from_secs(1),
                half_open_trials: 1,
            },
            Arc::new(ManualClock::new()),
        );
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let failing = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(PipelineError::Export {
                exporter: "test".to_string(),
                message: "down".to_string(),
                retryable: true,
            })
        };

        let first = executor.run(failing, &quick_retries(3)).await;
        assert!(matches!(
            first,
            Err(PipelineError::MaxRetriesExceeded { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.breaker().failure_count(), 1);
        assert_eq!(executor.breaker().state(), CircuitState::Closed);

        let _ = executor.run(failing, &quick_retries(3)).await;
        assert_eq!(executor.breaker().state(), CircuitState::Open);

        let rejected = executor.run(failing, &quick_retries(3)).await;
        assert!(matches!(rejected, Err(PipelineError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let executor = ResilienceExecutor::new(CircuitBreakerConfig::default());
        let value = executor
            .run(|| async { Ok::<_, PipelineError>("ok") }, &quick_retries(1))
            .await
            .unwrap();
        assert_eq!(value, "ok");
    }
}
