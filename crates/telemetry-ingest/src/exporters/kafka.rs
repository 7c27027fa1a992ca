// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Kafka transport for the message-queue exporter, built on `rdkafka`.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

use super::message_queue::{
    MessageQueueExporter, QueueError, QueueErrorKind, QueueMessage, QueueProducer,
};
use crate::config::KafkaConfig;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// `FutureProducer` created on first connect and dropped on disconnect.
pub struct KafkaProducer {
    config: KafkaConfig,
    producer: RwLock<Option<FutureProducer>>,
}

impl KafkaProducer {
    #[must_use]
    pub fn new(config: KafkaConfig) -> Self {
        KafkaProducer {
            config,
            producer: RwLock::new(None),
        }
    }

    fn current(&self) -> Option<FutureProducer> {
        self.producer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Exporter publishing to the configured Kafka topic.
#[must_use]
pub fn kafka_exporter(config: KafkaConfig) -> MessageQueueExporter<KafkaProducer> {
    let topic = config.topic.clone();
    MessageQueueExporter::new("kafka", topic, KafkaProducer::new(config))
}

fn classify(error: &KafkaError) -> QueueErrorKind {
    match error.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge | RDKafkaErrorCode::InvalidMessageSize,
        ) => QueueErrorKind::MessageTooLarge,
        Some(RDKafkaErrorCode::InvalidMessage | RDKafkaErrorCode::InvalidRecord) => {
            QueueErrorKind::InvalidMessage
        }
        Some(
            RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => QueueErrorKind::Authorization,
        Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            QueueErrorKind::Timeout
        }
        Some(RDKafkaErrorCode::BrokerTransportFailure | RDKafkaErrorCode::AllBrokersDown) => {
            QueueErrorKind::Connection
        }
        _ => QueueErrorKind::Other,
    }
}

fn queue_error(error: &KafkaError) -> QueueError {
    QueueError::new(classify(error), error.to_string())
}

#[async_trait]
impl QueueProducer for KafkaProducer {
    async fn connect(&self) -> Result<(), QueueError> {
        if self.current().is_some() {
            return Ok(());
        }

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .create()
            .map_err(|e| QueueError::new(QueueErrorKind::Connection, e.to_string()))?;

        info!(
            brokers = %self.config.brokers,
            topic = %self.config.topic,
            "EXPORT | Kafka producer created"
        );
        *self.producer.write().unwrap_or_else(PoisonError::into_inner) = Some(producer);
        Ok(())
    }

    async fn send(&self, topic: &str, messages: Vec<QueueMessage>) -> Result<(), QueueError> {
        let Some(producer) = self.current() else {
            return Err(QueueError::new(
                QueueErrorKind::Connection,
                "Kafka producer is not connected",
            ));
        };

        let deliveries = messages.iter().map(|message| {
            let headers = message
                .headers
                .iter()
                .fold(OwnedHeaders::new(), |headers, (key, value)| {
                    headers.insert(Header {
                        key: key.as_str(),
                        value: Some(value.as_str()),
                    })
                });
            let record = FutureRecord::to(topic)
                .key(message.key.as_str())
                .payload(message.value.as_str())
                .headers(headers);
            producer.send(record, Duration::from_secs(0))
        });
        let results = futures::future::join_all(deliveries).await;

        let mut failed = 0;
        let mut first_error = None;
        for result in results {
            if let Err((err, _)) = result {
                warn!(error = %err, "EXPORT | Kafka message delivery failed");
                failed += 1;
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            None => Ok(()),
            Some(err) => {
                let error = queue_error(&err);
                Err(QueueError::new(
                    error.kind,
                    format!("{failed} of {} messages failed: {}", messages.len(), error.message),
                ))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), QueueError> {
        let producer = self
            .producer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(producer) = producer {
            producer.flush(FLUSH_TIMEOUT).map_err(|e| queue_error(&e))?;
            info!("EXPORT | Kafka producer flushed and closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error_codes() {
        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert_eq!(classify(&too_large), QueueErrorKind::MessageTooLarge);
        assert!(!queue_error(&too_large).is_retryable());

        let invalid = KafkaError::MessageProduction(RDKafkaErrorCode::InvalidRecord);
        assert_eq!(classify(&invalid), QueueErrorKind::InvalidMessage);

        let timeout = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert!(queue_error(&timeout).is_retryable());

        let down = KafkaError::MessageProduction(RDKafkaErrorCode::AllBrokersDown);
        assert_eq!(classify(&down), QueueErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_send_before_connect_is_a_connection_error() {
        let producer = KafkaProducer::new(KafkaConfig::default());
        let err = producer.send("topic", Vec::new()).await.unwrap_err();
        assert_eq!(err.kind, QueueErrorKind::Connection);
    }
}
