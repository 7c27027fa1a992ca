// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Owner of the registered exporters.
//!
//! ```text
//!                     ┌──> [breaker+retry] kafka         ──> outcome
//!   emit_batch(chunk) ┼──> [breaker+retry] search-index  ──> outcome   (join_all)
//!                     └──> ...
//!                                   │
//!                                   v
//!                              EmitReport
//! ```
//!
//! Every exporter runs in its own lane with its own circuit breaker and retry
//! budget. A failing exporter is retried alone, its open breaker only sheds
//! its own batches, and the other lanes deliver each batch exactly once.

use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::search_index::SearchIndexExporter;
use super::{ExportResult, Exporter};
use crate::config::PipelineConfig;
use crate::error::{error_chain, PipelineError};
use crate::record::LogRecord;
use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use crate::resilience::retry::RetryConfig;
use crate::resilience::ResilienceExecutor;

/// Per-exporter tally of one `emit_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Exporters the batch was handed to.
    pub attempted: usize,
    /// Exporters that delivered every record.
    pub delivered: usize,
    /// Exporters still failing once their retry budget ran out.
    pub retryable_failures: usize,
    /// Exporters whose failures will not clear up by resending.
    pub permanent_failures: usize,
    /// Exporters whose breaker was open, so the batch was not sent to them.
    pub circuit_open: usize,
    /// Names of the exporters counted in `retryable_failures` or `circuit_open`.
    pub failed_exporters: Vec<String>,
    /// The manager was shutting down and did not hand the batch to anyone.
    pub dropped: bool,
}

impl EmitReport {
    #[must_use]
    pub fn is_fully_delivered(&self) -> bool {
        self.delivered == self.attempted && !self.dropped
    }
}

/// Breaker and retry state of one exporter lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterHealth {
    pub name: String,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
}

enum Outcome {
    Delivered,
    Permanent,
}

/// Classifies one export attempt. Failures worth resending come back as a
/// retryable error so the lane's retry policy and breaker see them.
fn outcome_of(
    name: &str,
    expected: usize,
    result: Result<Vec<ExportResult>, PipelineError>,
) -> Result<Outcome, PipelineError> {
    let results = match result {
        Ok(results) => results,
        Err(e) if e.is_retryable() => return Err(e),
        Err(e) => {
            error!("EXPORT | {name} failed to export batch: {e}");
            return Ok(Outcome::Permanent);
        }
    };

    if results.len() != expected {
        warn!(
            "EXPORT | {name} returned {} results for {expected} records",
            results.len()
        );
    }
    let failed: Vec<&ExportResult> = results.iter().filter(|r| !r.success).collect();
    if failed.is_empty() && results.len() >= expected {
        Ok(Outcome::Delivered)
    } else if results.len() < expected || failed.iter().any(|r| r.is_retryable_failure()) {
        Err(PipelineError::Export {
            exporter: name.to_string(),
            message: format!("{} of {expected} records not delivered", failed.len()),
            retryable: true,
        })
    } else {
        Ok(Outcome::Permanent)
    }
}

struct ExporterLane {
    exporter: Arc<dyn Exporter>,
    resilience: ResilienceExecutor,
}

impl ExporterLane {
    async fn attempt(&self, records: &[LogRecord]) -> Result<Outcome, PipelineError> {
        let name = self.exporter.name();
        outcome_of(name, records.len(), self.exporter.export(records).await)
    }
}

pub struct ExportManager {
    lanes: Vec<ExporterLane>,
    shutting_down: AtomicBool,
}

impl ExportManager {
    /// Registers `exporters`, each behind a breaker with the default settings.
    #[must_use]
    pub fn new(exporters: Vec<Arc<dyn Exporter>>) -> Self {
        Self::with_breaker(exporters, CircuitBreakerConfig::default())
    }

    /// Registers `exporters`, giving each its own breaker built from `breaker`.
    #[must_use]
    pub fn with_breaker(exporters: Vec<Arc<dyn Exporter>>, breaker: CircuitBreakerConfig) -> Self {
        let lanes = exporters
            .into_iter()
            .map(|exporter| ExporterLane {
                exporter,
                resilience: ResilienceExecutor::new(breaker.clone()),
            })
            .collect();
        ExportManager {
            lanes,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Builds the exporters enabled by `config`. No sink configured means no
    /// exporters, which is not an error.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let mut exporters: Vec<Arc<dyn Exporter>> = Vec::new();

        if let Some(kafka) = &config.kafka {
            #[cfg(feature = "kafka")]
            {
                exporters.push(Arc::new(super::kafka::kafka_exporter(kafka.clone())));
            }
            #[cfg(not(feature = "kafka"))]
            {
                warn!(
                    "EXPORT | KAFKA_BROKERS is set ({}) but Kafka support is not compiled in",
                    kafka.brokers
                );
            }
        }

        if let Some(search_index) = &config.search_index {
            exporters.push(Arc::new(SearchIndexExporter::new(search_index.clone())?));
        }

        if exporters.is_empty() {
            info!("EXPORT | No exporters configured, batches will be discarded");
        }
        Ok(Self::with_breaker(exporters, config.circuit_breaker.clone()))
    }

    pub fn exporters(&self) -> impl Iterator<Item = &Arc<dyn Exporter>> {
        self.lanes.iter().map(|lane| &lane.exporter)
    }

    #[must_use]
    pub fn health(&self) -> Vec<ExporterHealth> {
        self.lanes
            .iter()
            .map(|lane| ExporterHealth {
                name: lane.exporter.name().to_string(),
                circuit_state: lane.resilience.breaker().state(),
                failure_count: lane.resilience.breaker().failure_count(),
            })
            .collect()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Connects every exporter. Failures are logged; those exporters connect
    /// lazily on their next export.
    pub async fn connect_all(&self) {
        let results = join_all(self.lanes.iter().map(|lane| async move {
            (lane.exporter.name().to_string(), lane.exporter.connect().await)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(()) => debug!("EXPORT | {name} connected"),
                Err(e) => warn!("EXPORT | {name} failed to connect, will retry on export: {e}"),
            }
        }
    }

    pub async fn emit(&self, record: LogRecord) -> EmitReport {
        self.emit_batch(std::slice::from_ref(&record)).await
    }

    /// Hands `records` to every exporter once, still honouring each breaker.
    pub async fn emit_batch(&self, records: &[LogRecord]) -> EmitReport {
        let single_attempt = RetryConfig {
            max_retries: 1,
            ..RetryConfig::default()
        };
        self.emit_batch_with_retry(records, &single_attempt).await
    }

    /// Hands `records` to every exporter, retrying each failing exporter on its
    /// own under `retry` while the others are left alone.
    pub async fn emit_batch_with_retry(
        &self,
        records: &[LogRecord],
        retry: &RetryConfig,
    ) -> EmitReport {
        if self.is_shutting_down() {
            warn!(
                "EXPORT | Export manager is shutting down, dropping {} records",
                records.len()
            );
            return EmitReport {
                dropped: true,
                ..Default::default()
            };
        }
        if records.is_empty() {
            return EmitReport::default();
        }

        let outcomes = join_all(self.lanes.iter().map(|lane| async move {
            let result = lane.resilience.run(|| lane.attempt(records), retry).await;
            (lane.exporter.name().to_string(), result)
        }))
        .await;

        let mut report = EmitReport {
            attempted: outcomes.len(),
            ..Default::default()
        };
        for (name, outcome) in outcomes {
            match outcome {
                Ok(Outcome::Delivered) => report.delivered += 1,
                Ok(Outcome::Permanent) => {
                    warn!("EXPORT | {name} permanently rejected part of a batch");
                    report.permanent_failures += 1;
                }
                Err(PipelineError::CircuitOpen) => {
                    debug!(
                        "EXPORT | {name} circuit open, skipping {} records",
                        records.len()
                    );
                    report.circuit_open += 1;
                    report.failed_exporters.push(name);
                }
                Err(e) => {
                    error!(
                        "EXPORT | Dropping {} records for {name}: {}",
                        records.len(),
                        error_chain(&e)
                    );
                    report.retryable_failures += 1;
                    report.failed_exporters.push(name);
                }
            }
        }
        report
    }

    /// Stops accepting batches and shuts every exporter down, isolating
    /// failures. Calling it again is harmless.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);

        let results = join_all(self.lanes.iter().map(|lane| async move {
            (lane.exporter.name().to_string(), lane.exporter.shutdown().await)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = result {
                error!("EXPORT | {name} failed to shut down: {e}");
            }
        }
        info!("EXPORT | Export manager shut down");
    }
}
