// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;
use crate::exporters::search_index::SearchIndexConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::{BackoffKind, RetryConfig};
use crate::scheduler::BatchConfig;

/// Kafka connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` list
    pub brokers: String,
    pub topic: String,
    pub client_id: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "telemetry-events".to_string(),
            client_id: "telemetry-client-id".to_string(),
        }
    }
}

/// Configuration for the ingestion pipeline and its exporters
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Ring buffer capacity
    pub buffer_capacity: usize,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Run a final flush when the pipeline shuts down
    pub flush_on_shutdown: bool,
    /// Message-queue sink, enabled when brokers are configured
    pub kafka: Option<KafkaConfig>,
    /// Search-index sink, enabled when a node is configured
    pub search_index: Option<SearchIndexConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            buffer_capacity: 1000,
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            flush_on_shutdown: true,
            kafka: None,
            search_index: None,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn millis_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    lookup(key)
        .and_then(|val| val.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

impl PipelineConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source. Values that
    /// fail to parse fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let defaults = Self::default();

        let log_level = lookup("TELEMETRY_LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or(defaults.log_level);

        let batch = BatchConfig {
            flush_interval: millis_or(&lookup, "FLUSH_INTERVAL_MS", defaults.batch.flush_interval),
            max_batch_size: parse_or(&lookup, "MAX_BATCH_SIZE", defaults.batch.max_batch_size),
        };

        let retry = RetryConfig {
            max_retries: parse_or(&lookup, "RETRY_MAX_RETRIES", defaults.retry.max_retries),
            backoff: parse_or::<BackoffKind>(&lookup, "RETRY_BACKOFF", defaults.retry.backoff),
            delay: millis_or(&lookup, "RETRY_DELAY_MS", defaults.retry.delay),
            max_delay: millis_or(&lookup, "RETRY_MAX_DELAY_MS", defaults.retry.max_delay),
        };

        let circuit_breaker = CircuitBreakerConfig {
            threshold: parse_or(
                &lookup,
                "CIRCUIT_BREAKER_THRESHOLD",
                defaults.circuit_breaker.threshold,
            ),
            timeout: millis_or(
                &lookup,
                "CIRCUIT_BREAKER_TIMEOUT_MS",
                defaults.circuit_breaker.timeout,
            ),
            half_open_trials: parse_or(
                &lookup,
                "CIRCUIT_BREAKER_HALF_OPEN_TRIALS",
                defaults.circuit_breaker.half_open_trials,
            ),
        };

        let flush_on_shutdown = lookup("FLUSH_ON_SHUTDOWN")
            .map(|val| val.trim().to_lowercase() != "false")
            .unwrap_or(defaults.flush_on_shutdown);

        let kafka = non_empty(&lookup, "KAFKA_BROKERS").map(|brokers| {
            let kafka_defaults = KafkaConfig::default();
            KafkaConfig {
                brokers,
                topic: non_empty(&lookup, "KAFKA_TOPIC").unwrap_or(kafka_defaults.topic),
                client_id: non_empty(&lookup, "KAFKA_CLIENT_ID")
                    .unwrap_or(kafka_defaults.client_id),
            }
        });

        let search_index = non_empty(&lookup, "ELASTICSEARCH_NODE").map(|node| {
            let search_defaults = SearchIndexConfig::default();
            SearchIndexConfig {
                node,
                index_prefix: non_empty(&lookup, "ELASTICSEARCH_INDEX_PREFIX")
                    .unwrap_or(search_defaults.index_prefix),
                username: non_empty(&lookup, "ELASTICSEARCH_USERNAME"),
                password: non_empty(&lookup, "ELASTICSEARCH_PASSWORD"),
                timeout: millis_or(&lookup, "ELASTICSEARCH_TIMEOUT_MS", search_defaults.timeout),
            }
        });

        let config = Self {
            log_level,
            buffer_capacity: parse_or(&lookup, "BUFFER_CAPACITY", defaults.buffer_capacity),
            batch,
            retry,
            circuit_breaker,
            flush_on_shutdown,
            kafka,
            search_index,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |message: &str| Err(PipelineError::InvalidConfig(message.to_string()));

        if self.buffer_capacity == 0 {
            return invalid("BUFFER_CAPACITY must be greater than 0");
        }
        if self.batch.max_batch_size == 0 {
            return invalid("MAX_BATCH_SIZE must be greater than 0");
        }
        if self.batch.flush_interval.is_zero() {
            return invalid("FLUSH_INTERVAL_MS must be greater than 0");
        }
        if self.retry.max_retries == 0 {
            return invalid("RETRY_MAX_RETRIES must be greater than 0");
        }
        if self.retry.delay > self.retry.max_delay {
            return invalid("RETRY_DELAY_MS cannot exceed RETRY_MAX_DELAY_MS");
        }
        if self.circuit_breaker.threshold == 0 {
            return invalid("CIRCUIT_BREAKER_THRESHOLD must be greater than 0");
        }
        if self.circuit_breaker.half_open_trials == 0 {
            return invalid("CIRCUIT_BREAKER_HALF_OPEN_TRIALS must be greater than 0");
        }

        if let Some(search_index) = &self.search_index {
            let node = &search_index.node;
            if !node.starts_with("http://") && !node.starts_with("https://") {
                return Err(PipelineError::InvalidConfig(format!(
                    "ELASTICSEARCH_NODE must be an http(s) URL, got '{}'",
                    search_index.node
                )));
            }
        }

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
