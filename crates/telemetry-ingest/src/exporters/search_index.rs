// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Search-index sink speaking the Elasticsearch `_bulk` API.
//!
//! A batch becomes one NDJSON request:
//!
//! ```text
//! POST {node}/_bulk
//! {"index":{"_index":"logs-2024.05.01","_id":"<record id>"}}
//! {"id":"<record id>","timestamp":"2024-05-01T12:00:00.000Z",...}
//! ...
//! ```
//!
//! Records land in a daily index named after their own timestamp. Per-record
//! outcomes come from the `items` array of the response.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExportResult, Exporter};
use crate::error::PipelineError;
use crate::record::LogRecord;

const NAME: &str = "search-index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchIndexConfig {
    /// Base URL of the cluster, e.g. `http://localhost:9200`.
    pub node: String,
    pub index_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl Default for SearchIndexConfig {
    fn default() -> Self {
        Self {
            node: "http://localhost:9200".to_string(),
            index_prefix: "logs".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Too-many-requests and server-side failures may clear up on their own.
fn is_retryable_status(status: u16) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS.as_u16() || status >= 500
}

#[must_use]
pub fn index_name(prefix: &str, record: &LogRecord) -> String {
    format!("{prefix}-{}", record.timestamp.format("%Y.%m.%d"))
}

pub struct SearchIndexExporter {
    client: reqwest::Client,
    config: SearchIndexConfig,
    connected: AtomicBool,
}

impl SearchIndexExporter {
    pub fn new(config: SearchIndexConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(SearchIndexExporter {
            client,
            config,
            connected: AtomicBool::new(false),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.node.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(username) => request.basic_auth(username, self.config.password.as_ref()),
            None => request,
        }
    }

    fn bulk_body(&self, records: &[LogRecord]) -> Result<String, PipelineError> {
        let mut body = String::new();
        for record in records {
            let action = serde_json::json!({
                "index": {
                    "_index": index_name(&self.config.index_prefix, record),
                    "_id": record.id,
                }
            });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&record.to_json()?);
            body.push('\n');
        }
        Ok(body)
    }

    async fn send_bulk(&self, records: &[LogRecord]) -> Result<Vec<ExportResult>, PipelineError> {
        let body = self.bulk_body(records)?;
        let response = self
            .authorize(self.client.post(self.endpoint("_bulk")))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retryable = is_retryable_status(status.as_u16());
            let text = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                retryable, "EXPORT | {NAME} bulk request rejected: {text}"
            );
            return Ok(records
                .iter()
                .map(|_| {
                    ExportResult::failed(format!("bulk request failed with {status}"), retryable)
                        .with_status(status.as_u16())
                })
                .collect());
        }

        let bulk: BulkResponse = response.json().await?;
        Ok(item_results(records.len(), bulk))
    }
}

fn item_results(expected: usize, bulk: BulkResponse) -> Vec<ExportResult> {
    let mut results: Vec<ExportResult> = bulk
        .items
        .into_iter()
        .take(expected)
        .map(|item| {
            let Some(outcome) = item.into_values().next() else {
                return ExportResult::failed("empty bulk item", true);
            };
            if (200..300).contains(&outcome.status) {
                return ExportResult::delivered().with_status(outcome.status);
            }
            let reason = outcome
                .error
                .as_ref()
                .and_then(|e| e.get("reason").and_then(|r| r.as_str()).map(str::to_string))
                .or_else(|| outcome.error.as_ref().map(ToString::to_string))
                .unwrap_or_else(|| format!("status {}", outcome.status));
            ExportResult::failed(reason, is_retryable_status(outcome.status))
                .with_status(outcome.status)
        })
        .collect();

    // Items missing from the response are reported as undelivered
    results.resize_with(expected, || {
        ExportResult::failed("no result for record in bulk response", true)
    });
    results
}

#[async_trait]
impl Exporter for SearchIndexExporter {
    fn name(&self) -> &str {
        NAME
    }

    async fn connect(&self) -> Result<(), PipelineError> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let response = self
            .authorize(self.client.get(self.endpoint("")))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Export {
                exporter: NAME.to_string(),
                message: format!("cluster responded with {status}"),
                retryable: is_retryable_status(status.as_u16()),
            });
        }

        self.connected.store(true, Ordering::Release);
        info!("EXPORT | {NAME} connected to {}", self.config.node);
        Ok(())
    }

    async fn export(&self, records: &[LogRecord]) -> Result<Vec<ExportResult>, PipelineError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = match self.connect().await {
            Ok(()) => self.send_bulk(records).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(results) => {
                debug!(
                    "EXPORT | {NAME} indexed {}/{} records",
                    results.iter().filter(|r| r.success).count(),
                    records.len()
                );
                Ok(results)
            }
            Err(PipelineError::Serialization(e)) => Err(PipelineError::Serialization(e)),
            Err(e) => {
                let retryable = e.is_retryable();
                warn!(retryable, "EXPORT | {NAME} request failed: {e}");
                Ok(records
                    .iter()
                    .map(|_| ExportResult::failed(e.to_string(), retryable))
                    .collect())
            }
        }
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("EXPORT | {NAME} closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;
    use chrono::{TimeZone, Utc};

    fn record_on(day: u32) -> LogRecord {
        let mut record = LogRecord::new(LogLevel::Warn, "disk almost full");
        record.timestamp = Utc.with_ymd_and_hms(2024, 5, day, 8, 30, 0).unwrap();
        record
    }

    #[test]
    fn test_daily_index_name() {
        assert_eq!(index_name("logs", &record_on(1)), "logs-2024.05.01");
        assert_eq!(index_name("audit", &record_on(21)), "audit-2024.05.21");
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let exporter = SearchIndexExporter::new(SearchIndexConfig::default()).unwrap();
        let records = vec![record_on(1), record_on(2)];
        let body = exporter.bulk_body(&records).unwrap();

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        let action: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "logs-2024.05.01");
        assert_eq!(action["index"]["_id"], records[0].id.as_str());
        let doc: serde_json::Value = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(doc["timestamp"], "2024-05-02T08:30:00.000Z");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_item_results_classification() {
        let bulk: BulkResponse = serde_json::from_value(serde_json::json!({
            "errors": true,
            "items": [
                {"index": {"_id": "a", "status": 201}},
                {"index": {"_id": "b", "status": 429, "error": {"type": "es_rejected_execution_exception", "reason": "queue full"}}},
                {"index": {"_id": "c", "status": 400, "error": {"type": "mapper_parsing_exception", "reason": "bad field"}}}
            ]
        }))
        .unwrap();

        let results = item_results(4, bulk);
        assert_eq!(results.len(), 4);
        assert!(results[0].success);
        assert_eq!(results[0].status_code, Some(201));
        assert_eq!(results[1].error.as_deref(), Some("queue full"));
        assert_eq!(results[1].retryable, Some(true));
        assert_eq!(results[2].retryable, Some(false));
        assert_eq!(results[2].status_code, Some(400));
        assert!(!results[3].success);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }
}
