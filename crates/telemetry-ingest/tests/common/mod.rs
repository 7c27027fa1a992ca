// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use telemetry_ingest::buffer::SamplingBuffer;
use telemetry_ingest::config::PipelineConfig;
use telemetry_ingest::exporters::manager::ExportManager;
use telemetry_ingest::exporters::message_queue::{
    MessageQueueExporter, QueueError, QueueErrorKind, QueueMessage, QueueProducer,
};
use telemetry_ingest::exporters::Exporter;
use telemetry_ingest::resilience::circuit_breaker::CircuitBreakerConfig;
use telemetry_ingest::resilience::retry::{BackoffKind, RetryConfig};
use telemetry_ingest::scheduler::BatchConfig;
use telemetry_ingest::LogPipeline;

/// One `send` call as seen by the producer.
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub topic: String,
    pub messages: Vec<QueueMessage>,
}

/// Queue producer that records every send and fails on demand.
#[derive(Default)]
pub struct RecordingProducer {
    sent: Mutex<Vec<SentBatch>>,
    attempts: Mutex<usize>,
    failures: Mutex<VecDeque<QueueErrorKind>>,
}

impl RecordingProducer {
    /// Makes the next `send` calls fail with `kinds`, in order.
    pub fn fail_next(&self, kinds: impl IntoIterator<Item = QueueErrorKind>) {
        self.failures.lock().unwrap().extend(kinds);
    }

    pub fn sent(&self) -> Vec<SentBatch> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl QueueProducer for RecordingProducer {
    async fn connect(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn send(&self, topic: &str, messages: Vec<QueueMessage>) -> Result<(), QueueError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(kind) = self.failures.lock().unwrap().pop_front() {
            return Err(QueueError::new(kind, "injected failure"));
        }
        self.sent.lock().unwrap().push(SentBatch {
            topic: topic.to_string(),
            messages,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

pub const TOPIC: &str = "telemetry-events";

/// Config with short delays so paused-time tests stay readable.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        buffer_capacity: 100,
        batch: BatchConfig {
            flush_interval: Duration::from_millis(1_000),
            max_batch_size: 10,
        },
        retry: RetryConfig {
            max_retries: 3,
            backoff: BackoffKind::Exponential,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        },
        circuit_breaker: CircuitBreakerConfig {
            threshold: 2,
            timeout: Duration::from_millis(10_000),
            half_open_trials: 1,
        },
        ..Default::default()
    }
}

pub type QueueExporter = MessageQueueExporter<RecordingProducer>;

/// Pipeline exporting to a single in-memory queue; error-level records are
/// always admitted by the default sampling table.
pub fn queue_pipeline(config: PipelineConfig) -> (LogPipeline, Arc<QueueExporter>) {
    let exporter = Arc::new(MessageQueueExporter::new(
        "kafka",
        TOPIC,
        RecordingProducer::default(),
    ));
    let manager = Arc::new(ExportManager::with_breaker(
        vec![Arc::clone(&exporter) as Arc<dyn Exporter>],
        config.circuit_breaker.clone(),
    ));
    let pipeline = LogPipeline::with_parts(
        config.clone(),
        manager,
        SamplingBuffer::with_seed(config.buffer_capacity, 7),
    );
    (pipeline, exporter)
}

/// Pipeline exporting to two in-memory queues registered as `healthy` and
/// `broken`, each behind its own breaker.
pub fn twin_queue_pipeline(
    config: PipelineConfig,
) -> (LogPipeline, Arc<QueueExporter>, Arc<QueueExporter>) {
    let healthy = Arc::new(MessageQueueExporter::new(
        "healthy",
        TOPIC,
        RecordingProducer::default(),
    ));
    let broken = Arc::new(MessageQueueExporter::new(
        "broken",
        TOPIC,
        RecordingProducer::default(),
    ));
    let manager = Arc::new(ExportManager::with_breaker(
        vec![
            Arc::clone(&healthy) as Arc<dyn Exporter>,
            Arc::clone(&broken) as Arc<dyn Exporter>,
        ],
        config.circuit_breaker.clone(),
    ));
    let pipeline = LogPipeline::with_parts(
        config.clone(),
        manager,
        SamplingBuffer::with_seed(config.buffer_capacity, 7),
    );
    (pipeline, healthy, broken)
}
