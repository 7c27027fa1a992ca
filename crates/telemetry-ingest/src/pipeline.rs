// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Orchestrator wiring buffer, scheduler, resilience and exporters together.
//!
//! ```text
//!   Created ──start()──> Running ──shutdown()──> Stopped
//!      │                                            ^
//!      └──────────────────shutdown()────────────────┘
//! ```
//!
//! Records can be enqueued and flushed manually while `Created`; the timer
//! only runs while `Running`. Once `Stopped`, enqueued records are dropped.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, debug_span, error, info, warn, Instrument};

use crate::buffer::{with_buffer, Admission, BufferStats, SamplingBuffer, SharedBuffer};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::exporters::manager::{ExportManager, ExporterHealth};
use crate::record::LogRecord;
use crate::resilience::retry::RetryConfig;
use crate::scheduler::{BatchProcessor, BatchScheduler, TickOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub state: PipelineState,
    pub buffer: BufferStats,
    /// Breaker state of each exporter, in registration order.
    pub exporters: Vec<ExporterHealth>,
}

/// Hands each drained chunk to the export manager, which retries and
/// breaks per exporter.
struct ExportProcessor {
    manager: Arc<ExportManager>,
    retry: RetryConfig,
}

#[async_trait]
impl BatchProcessor for ExportProcessor {
    async fn process(&self, chunks: Vec<Vec<LogRecord>>) -> Result<(), PipelineError> {
        let total = chunks.len();
        for (index, chunk) in chunks.iter().enumerate() {
            let span = debug_span!("export", chunk = index + 1, total, records = chunk.len());
            let report = self
                .manager
                .emit_batch_with_retry(chunk, &self.retry)
                .instrument(span)
                .await;

            if report.is_fully_delivered() {
                debug!(
                    "PIPELINE | Chunk {}/{total} exported to {} exporters",
                    index + 1,
                    report.delivered
                );
            } else if report.delivered == 0 {
                error!(
                    "PIPELINE | Dropping chunk {}/{total} of {} records: no exporter delivered it",
                    index + 1,
                    chunk.len()
                );
            } else {
                warn!(
                    "PIPELINE | Chunk {}/{total} exported to {}/{} exporters, failed for {}",
                    index + 1,
                    report.delivered,
                    report.attempted,
                    report.failed_exporters.join(",")
                );
            }
        }
        Ok(())
    }
}

pub struct LogPipeline {
    buffer: SharedBuffer,
    scheduler: Arc<BatchScheduler>,
    manager: Arc<ExportManager>,
    config: PipelineConfig,
    state: Mutex<PipelineState>,
}

impl LogPipeline {
    /// Validates `config` and builds a pipeline exporting through `manager`.
    pub fn new(config: PipelineConfig, manager: Arc<ExportManager>) -> Result<Self, PipelineError> {
        config.validate()?;
        let buffer = SamplingBuffer::new(config.buffer_capacity);
        Ok(Self::with_parts(config, manager, buffer))
    }

    /// Builds a pipeline around a caller-supplied buffer, e.g. a seeded one.
    #[must_use]
    pub fn with_parts(
        config: PipelineConfig,
        manager: Arc<ExportManager>,
        buffer: SamplingBuffer,
    ) -> Self {
        let buffer = buffer.shared();
        let processor = Arc::new(ExportProcessor {
            manager: Arc::clone(&manager),
            retry: config.retry.clone(),
        });
        let scheduler = Arc::new(BatchScheduler::new(
            Arc::clone(&buffer),
            processor,
            config.batch.clone(),
        ));

        LogPipeline {
            buffer,
            scheduler,
            manager,
            config,
            state: Mutex::new(PipelineState::Created),
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn export_manager(&self) -> &Arc<ExportManager> {
        &self.manager
    }

    /// Starts the flush timer. Must be called from within a tokio runtime.
    ///
    /// A pipeline that was shut down cannot be restarted.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            PipelineState::Created => {
                self.scheduler.start();
                *state = PipelineState::Running;
                info!(
                    "PIPELINE | Started with buffer capacity {}",
                    self.config.buffer_capacity
                );
                Ok(())
            }
            PipelineState::Running => {
                debug!("PIPELINE | Already running");
                Ok(())
            }
            PipelineState::Stopped => Err(PipelineError::NotRunning),
        }
    }

    /// Admits `record` into the buffer. Never blocks and never fails; records
    /// arriving after shutdown are logged and dropped.
    pub fn enqueue(&self, record: LogRecord) {
        if self.state() == PipelineState::Stopped {
            warn!(
                "PIPELINE | Buffer not available, dropping record {}",
                record.id
            );
            return;
        }

        if let Admission::StoredWithEviction = with_buffer(&self.buffer, |b| b.push(record)) {
            debug!("PIPELINE | Buffer full, oldest record overwritten");
        }
    }

    /// Runs one drain-chunk-export cycle, waiting for an in-flight one first.
    pub async fn flush(&self) -> TickOutcome {
        self.scheduler.flush().await
    }

    /// Stops the timer, flushes what is left when configured to, then shuts
    /// the export manager down. Later calls are no-ops.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == PipelineState::Stopped {
                return;
            }
            *state = PipelineState::Stopped;
        }

        info!("PIPELINE | Shutting down");
        self.scheduler.destroy().await;

        if self.config.flush_on_shutdown {
            match self.flush().await {
                TickOutcome::Processed { records, .. } => {
                    info!("PIPELINE | Flushed {records} records on shutdown");
                }
                TickOutcome::Empty | TickOutcome::Skipped => {}
            }
        } else {
            let pending = with_buffer(&self.buffer, |b| b.len());
            if pending > 0 {
                warn!("PIPELINE | Discarding {pending} buffered records on shutdown");
            }
        }

        self.manager.shutdown().await;
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            state: self.state(),
            buffer: with_buffer(&self.buffer, |b| b.stats()),
            exporters: self.manager.health(),
        }
    }
}
