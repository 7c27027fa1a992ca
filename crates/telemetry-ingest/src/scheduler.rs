// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Timer-driven drain of the ring buffer.
//!
//! Every `flush_interval` the scheduler drains the buffer, splits the records
//! into contiguous chunks of at most `max_batch_size` and hands the chunks to
//! the [`BatchProcessor`]. At most one cycle runs at a time: a tick that finds
//! a cycle in flight is skipped, while a manual [`BatchScheduler::flush`]
//! waits for it and then runs its own cycle.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as TokioMutex, MutexGuard as TokioMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::buffer::{with_buffer, SharedBuffer};
use crate::error::{error_chain, PipelineError};
use crate::record::LogRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub flush_interval: Duration,
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(10_000),
            max_batch_size: 100,
        }
    }
}

/// Consumer of drained chunks.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, chunks: Vec<Vec<LogRecord>>) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another cycle was still running.
    Skipped,
    /// The buffer was empty; the processor was not called.
    Empty,
    Processed { records: usize, chunks: usize },
}

/// Splits `records` into contiguous chunks of at most `size` records.
#[must_use]
pub fn chunk(records: Vec<LogRecord>, size: usize) -> Vec<Vec<LogRecord>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(records.len().div_ceil(size));
    let mut records = records.into_iter();
    loop {
        let next: Vec<LogRecord> = records.by_ref().take(size).collect();
        if next.is_empty() {
            return chunks;
        }
        chunks.push(next);
    }
}

struct Timer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct BatchScheduler {
    buffer: SharedBuffer,
    processor: Arc<dyn BatchProcessor>,
    config: BatchConfig,
    in_flight: TokioMutex<()>,
    timer: Mutex<Option<Timer>>,
}

impl BatchScheduler {
    #[must_use]
    pub fn new(
        buffer: SharedBuffer,
        processor: Arc<dyn BatchProcessor>,
        config: BatchConfig,
    ) -> Self {
        BatchScheduler {
            buffer,
            processor,
            config,
            in_flight: TokioMutex::new(()),
            timer: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Periodic entry point. Never waits for a running cycle.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(guard) = self.in_flight.try_lock() else {
            debug!("SCHEDULER | Previous flush still running, skipping tick");
            return TickOutcome::Skipped;
        };
        self.cycle(guard).await
    }

    /// Manual entry point. Waits for a running cycle to settle, then runs one.
    pub async fn flush(&self) -> TickOutcome {
        let guard = self.in_flight.lock().await;
        self.cycle(guard).await
    }

    // The guard is held until the processor settles and is released on drop,
    // including when the processor panics.
    async fn cycle(&self, _guard: TokioMutexGuard<'_, ()>) -> TickOutcome {
        let records = with_buffer(&self.buffer, |buffer| buffer.drain());
        if records.is_empty() {
            return TickOutcome::Empty;
        }

        let total = records.len();
        let chunks = chunk(records, self.config.max_batch_size);
        let chunk_count = chunks.len();
        debug!("SCHEDULER | Flushing {total} records in {chunk_count} chunks");

        if let Err(e) = self.processor.process(chunks).await {
            error!("SCHEDULER | Batch processing failed: {}", error_chain(&e));
        }

        TickOutcome::Processed {
            records: total,
            chunks: chunk_count,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Starts the periodic timer. Calling it while running is a no-op; calling
    /// it after [`stop`](Self::stop) starts a fresh timer.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            debug!("SCHEDULER | Timer already running");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let scheduler = Arc::clone(self);
        let period = self.config.flush_interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut flush_interval = interval(period);
            flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            flush_interval.tick().await; // discard first tick, which is instantaneous

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = flush_interval.tick() => {
                        // Each tick runs on its own task so a slow flush
                        // surfaces as skipped ticks instead of a stalled timer
                        let scheduler = Arc::clone(&scheduler);
                        tokio::spawn(async move {
                            scheduler.tick().await;
                        });
                    }
                }
            }
            debug!("SCHEDULER | Timer stopped");
        });

        info!(
            "SCHEDULER | Flushing every {} ms, up to {} records per chunk",
            period.as_millis(),
            self.config.max_batch_size
        );
        *timer = Some(Timer { cancel, task });
    }

    fn take_timer(&self) -> Option<Timer> {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Signals the timer to stop. In-flight cycles are not interrupted and no
    /// final flush is performed.
    pub fn stop(&self) {
        if let Some(timer) = self.take_timer() {
            timer.cancel.cancel();
        }
    }

    /// Stops the timer and waits for its task to exit.
    pub async fn destroy(&self) {
        if let Some(timer) = self.take_timer() {
            timer.cancel.cancel();
            if let Err(e) = timer.task.await {
                error!("SCHEDULER | Timer task failed: {e}");
            }
        }
    }
}
