// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pluggable sinks for drained batches.
//!
//! Every sink implements [`Exporter`] and reports one [`ExportResult`] per
//! record it was handed. The [`manager::ExportManager`] owns the registered
//! sinks and fans every batch out to all of them independently.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod manager;
pub mod message_queue;
pub mod search_index;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::record::LogRecord;

/// Delivery outcome for a single record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportResult {
    pub success: bool,
    pub error: Option<String>,
    /// Whether resending the record may succeed. Only set on failures.
    pub retryable: Option<bool>,
    pub status_code: Option<u16>,
}

impl ExportResult {
    #[must_use]
    pub fn delivered() -> Self {
        ExportResult {
            success: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>, retryable: bool) -> Self {
        ExportResult {
            success: false,
            error: Some(error.into()),
            retryable: Some(retryable),
            status_code: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    #[must_use]
    pub fn is_retryable_failure(&self) -> bool {
        !self.success && self.retryable.unwrap_or(true)
    }
}

/// Sink adapter.
///
/// `connect` and `shutdown` are idempotent; `export` connects lazily when
/// needed and returns exactly one result per input record. An `Err` from
/// `export` means the exporter could not produce per-record results at all.
#[async_trait]
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), PipelineError>;

    async fn export(&self, records: &[LogRecord]) -> Result<Vec<ExportResult>, PipelineError>;

    async fn shutdown(&self) -> Result<(), PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors() {
        let ok = ExportResult::delivered();
        assert!(ok.success);
        assert!(!ok.is_retryable_failure());

        let transient = ExportResult::failed("timeout", true).with_status(503);
        assert!(transient.is_retryable_failure());
        assert_eq!(transient.status_code, Some(503));

        let permanent = ExportResult::failed("bad request", false);
        assert!(!permanent.is_retryable_failure());
    }
}
