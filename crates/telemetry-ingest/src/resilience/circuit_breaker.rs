// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Circuit breaker guarding the export path.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────> Open
//!     ^                               │  │ ^
//!     │ trial succeeds                │  │ │ trial fails
//!     │              timeout elapsed  │  v │
//!     └──────────────────────────── HalfOpen
//! ```
//!
//! Any success resets the failure counter. While open, calls fail fast with
//! [`PipelineError::CircuitOpen`] without invoking the operation.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::clock::{Clock, TokioClock};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,
    /// Time since the last failure before a trial call is allowed.
    pub timeout: Duration,
    /// Concurrent trial calls admitted while half-open.
    pub half_open_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_millis(10_000),
            half_open_trials: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trials_in_flight: u32,
    /// Bumped on every entry into half-open, so stale trial permits from an
    /// earlier round cannot release slots of the current one.
    half_open_round: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

/// Releases a half-open trial slot if the call never settled.
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    round: Option<u64>,
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if let Some(round) = self.round {
            let mut inner = self.breaker.lock();
            if inner.half_open_round == round && inner.state == CircuitState::HalfOpen {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            }
        }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    #[must_use]
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        CircuitBreaker {
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trials_in_flight: 0,
                half_open_round: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored state. An expired open circuit only moves to half-open when the
    /// next call arrives.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `op` unless the circuit rejects the call.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let permit = self.admit()?;
        let result = op().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(e) => self.on_failure(e),
        }
        drop(permit);
        result
    }

    fn admit(&self) -> Result<TrialPermit<'_>, PipelineError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure
                .map_or(Duration::MAX, |last| now.saturating_duration_since(last));
            if elapsed < self.config.timeout {
                return Err(PipelineError::CircuitOpen);
            }
            inner.state = CircuitState::HalfOpen;
            inner.trials_in_flight = 0;
            inner.half_open_round += 1;
            info!("RESILIENCE | Circuit breaker half-open, allowing a trial call");
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.trials_in_flight >= self.config.half_open_trials.max(1) {
                debug!("RESILIENCE | Circuit breaker half-open, trial already in flight");
                return Err(PipelineError::CircuitOpen);
            }
            inner.trials_in_flight += 1;
            return Ok(TrialPermit {
                breaker: self,
                round: Some(inner.half_open_round),
            });
        }

        Ok(TrialPermit {
            breaker: self,
            round: None,
        })
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.trials_in_flight = 0;
            info!("RESILIENCE | Circuit breaker closed after a successful trial");
        }
    }

    fn on_failure(&self, error: &PipelineError) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.trials_in_flight = 0;
                warn!("RESILIENCE | Circuit breaker trial failed, reopening: {error}");
            }
            CircuitState::Closed if inner.failure_count >= self.config.threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    failure_count = inner.failure_count,
                    "RESILIENCE | Circuit breaker opened: {error}"
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failure() -> PipelineError {
        PipelineError::Export {
            exporter: "test".to_string(),
            message: "unavailable".to_string(),
            retryable: true,
        }
    }

    fn breaker(threshold: u32, clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::with_clock(
            CircuitBreakerConfig {
                threshold,
                timeout: Duration::from_millis(1_000),
                half_open_trials: 1,
            },
            clock,
        )
    }

    #[tokio::test]
    async fn test_stays_closed_on_success() {
        let breaker = breaker(3, Arc::new(ManualClock::new()));
        let result = breaker.execute(|| async { Ok::<_, PipelineError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_rejects_then_recovers() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(3, Arc::clone(&clock));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let result = breaker
                .execute(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(failure())
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);

        // Rejected without invoking the operation
        let rejected = breaker
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, PipelineError>(())
            })
            .await;
        assert!(matches!(rejected, Err(PipelineError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Still open just before the timeout
        clock.advance(Duration::from_millis(999));
        assert!(matches!(
            breaker.execute(|| async { Ok::<_, PipelineError>(()) }).await,
            Err(PipelineError::CircuitOpen)
        ));

        clock.advance(Duration::from_millis(1));
        let trial = breaker
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, PipelineError>(())
            })
            .await;
        assert!(trial.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens_and_refreshes_timestamp() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(1, Arc::clone(&clock));

        let _ = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(1_000));
        let _ = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // The timeout restarts from the failed trial
        clock.advance(Duration::from_millis(500));
        assert!(matches!(
            breaker.execute(|| async { Ok::<_, PipelineError>(()) }).await,
            Err(PipelineError::CircuitOpen)
        ));
        clock.advance(Duration::from_millis(500));
        assert!(breaker
            .execute(|| async { Ok::<_, PipelineError>(()) })
            .await
            .is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(3, Arc::new(ManualClock::new()));
        let _ = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
        let _ = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
        assert_eq!(breaker.failure_count(), 2);

        let _ = breaker.execute(|| async { Ok::<_, PipelineError>(()) }).await;
        assert_eq!(breaker.failure_count(), 0);

        let _ = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_one_trial_at_a_time() {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(breaker(1, Arc::clone(&clock)));
        let _ = breaker.execute(|| async { Err::<(), _>(failure()) }).await;
        clock.advance(Duration::from_millis(1_000));

        let (release, pending) = tokio::sync::oneshot::channel::<()>();
        let trial_breaker = Arc::clone(&breaker);
        let trial = tokio::spawn(async move {
            trial_breaker
                .execute(|| async move {
                    let _ = pending.await;
                    Ok::<_, PipelineError>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(matches!(
            breaker.execute(|| async { Ok::<_, PipelineError>(()) }).await,
            Err(PipelineError::CircuitOpen)
        ));

        release.send(()).unwrap();
        assert!(trial.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
