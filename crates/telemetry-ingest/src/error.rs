// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::exporters::message_queue::QueueError;
use std::error::Error as StdError;

/// Errors raised along the export path of the pipeline.
///
/// Admission drops (sampling, ring eviction) are not errors and never appear
/// here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Circuit breaker is open, operation cannot be performed")]
    CircuitOpen,

    #[error("Operation failed after {attempts} attempts")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        cause: Box<PipelineError>,
    },

    #[error("Export to {exporter} failed: {message}")]
    Export {
        exporter: String,
        message: String,
        retryable: bool,
    },

    #[error("Message queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pipeline has been shut down")]
    NotRunning,
}

impl PipelineError {
    /// Whether repeating the same operation may succeed.
    ///
    /// Breaker rejections and exhausted retries are terminal for the batch that
    /// produced them; malformed input will never succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Export { retryable, .. } => *retryable,
            PipelineError::Queue(e) => e.is_retryable(),
            PipelineError::Http(e) => !e.is_builder() && !e.is_decode(),
            PipelineError::InvalidConfig(_)
            | PipelineError::CircuitOpen
            | PipelineError::MaxRetriesExceeded { .. }
            | PipelineError::Serialization(_)
            | PipelineError::NotRunning => false,
        }
    }
}

/// Renders an error followed by every `source()` in its chain, separated by
/// `": "`. Used when logging terminal batch failures.
#[must_use]
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
