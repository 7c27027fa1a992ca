// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Message-queue sink.
//!
//! Each record becomes one message:
//!
//! ```text
//! key     = record.source, or record.id when there is no source
//! value   = record JSON (ISO-8601 timestamps)
//! headers = traceparent: 00-<traceId>-10   (only when the record carries a trace id)
//! ```
//!
//! The whole batch is published as a single `send`. A failed send marks every
//! record of the batch with the same retryable classification.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ExportResult, Exporter};
use crate::error::PipelineError;
use crate::record::LogRecord;

pub use crate::tracer::TRACEPARENT_HEADER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueErrorKind {
    Connection,
    Timeout,
    MessageTooLarge,
    InvalidMessage,
    Authorization,
    Serialization,
    Other,
}

impl QueueErrorKind {
    /// Malformed or rejected-by-validation messages will fail again as-is.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            QueueErrorKind::InvalidMessage
                | QueueErrorKind::MessageTooLarge
                | QueueErrorKind::Authorization
                | QueueErrorKind::Serialization
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct QueueError {
    pub kind: QueueErrorKind,
    pub message: String,
}

impl QueueError {
    pub fn new(kind: QueueErrorKind, message: impl Into<String>) -> Self {
        QueueError {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::new(QueueErrorKind::Serialization, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub key: String,
    pub value: String,
    pub headers: Vec<(String, String)>,
}

impl QueueMessage {
    pub fn from_record(record: &LogRecord) -> Result<Self, QueueError> {
        let key = record.source.clone().unwrap_or_else(|| record.id.clone());
        let headers = record
            .trace_id()
            .map(|trace_id| vec![(TRACEPARENT_HEADER.to_string(), traceparent(trace_id))])
            .unwrap_or_default();
        Ok(QueueMessage {
            key,
            value: record.to_json()?,
            headers,
        })
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[must_use]
pub fn traceparent(trace_id: &str) -> String {
    format!("00-{trace_id}-10")
}

/// Transport underneath [`MessageQueueExporter`].
#[async_trait]
pub trait QueueProducer: Send + Sync {
    async fn connect(&self) -> Result<(), QueueError>;

    async fn send(&self, topic: &str, messages: Vec<QueueMessage>) -> Result<(), QueueError>;

    async fn disconnect(&self) -> Result<(), QueueError>;
}

pub struct MessageQueueExporter<P> {
    name: String,
    topic: String,
    producer: P,
    connected: Mutex<bool>,
}

impl<P: QueueProducer> MessageQueueExporter<P> {
    pub fn new(name: impl Into<String>, topic: impl Into<String>, producer: P) -> Self {
        MessageQueueExporter {
            name: name.into(),
            topic: topic.into(),
            producer,
            connected: Mutex::new(false),
        }
    }

    #[must_use]
    pub fn producer(&self) -> &P {
        &self.producer
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    async fn ensure_connected(&self) -> Result<(), QueueError> {
        let mut connected = self.connected.lock().await;
        if !*connected {
            self.producer.connect().await?;
            *connected = true;
            info!("EXPORT | {} connected, topic {}", self.name, self.topic);
        }
        Ok(())
    }

    async fn publish(&self, records: &[LogRecord]) -> Result<(), QueueError> {
        let messages = records
            .iter()
            .map(QueueMessage::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        self.ensure_connected().await?;
        self.producer.send(&self.topic, messages).await
    }
}

#[async_trait]
impl<P: QueueProducer> Exporter for MessageQueueExporter<P> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), PipelineError> {
        Ok(self.ensure_connected().await?)
    }

    async fn export(&self, records: &[LogRecord]) -> Result<Vec<ExportResult>, PipelineError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        match self.publish(records).await {
            Ok(()) => {
                debug!("EXPORT | {} published {} records", self.name, records.len());
                Ok(records.iter().map(|_| ExportResult::delivered()).collect())
            }
            Err(e) => {
                let retryable = e.is_retryable();
                warn!(
                    retryable,
                    "EXPORT | {} failed to publish {} records: {e}",
                    self.name,
                    records.len()
                );
                Ok(records
                    .iter()
                    .map(|_| ExportResult::failed(e.to_string(), retryable))
                    .collect())
            }
        }
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        let mut connected = self.connected.lock().await;
        if *connected {
            self.producer.disconnect().await?;
            *connected = false;
            info!("EXPORT | {} disconnected", self.name);
        }
        Ok(())
    }
}
