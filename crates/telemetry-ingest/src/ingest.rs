// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns inbound payloads into enriched [`LogRecord`]s.
//!
//! Enrichment runs in a fixed order: body (level, message, user, error),
//! request context, response context, then the tracer. The transport layer
//! that produced the payload is not part of this crate; it only hands over
//! the parsed body and whatever request/response context it has.

use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::record::{ErrorInfo, LogLevel, LogRecord, RequestInfo, ResponseInfo, UserInfo};
use crate::sampling::{SamplingPolicy, SAMPLING_HEADER};
use crate::tracer::{TraceContext, Tracer, TRACEPARENT_HEADER};

const REQUEST_ID_HEADER: &str = "x-request-id";
const CORRELATION_ID_HEADER: &str = "x-correlation-id";
const USER_AGENT_HEADER: &str = "user-agent";

/// Raw error as reported by the producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Multi-line stack trace.
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub cause: Option<Box<ErrorInput>>,
}

/// Inbound record body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogInput {
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub user: Option<UserInfo>,
    #[serde(default)]
    pub error: Option<ErrorInput>,
    #[serde(default)]
    pub request: Option<RequestContext>,
    #[serde(default)]
    pub response: Option<ResponseContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContext {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Sanitizes a raw error: trimmed non-empty stack frames, `"Error"` and
/// `"No message provided"` as fallbacks, causes handled recursively.
#[must_use]
pub fn sanitize_error(error: &ErrorInput) -> ErrorInfo {
    ErrorInfo {
        id: Uuid::new_v4().to_string(),
        name: non_empty(error.name.as_deref()).unwrap_or_else(|| "Error".to_string()),
        message: non_empty(error.message.as_deref())
            .unwrap_or_else(|| "No message provided".to_string()),
        stack: error
            .stack
            .as_deref()
            .map(|stack| {
                stack
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        cause: error.cause.as_deref().map(|cause| Box::new(sanitize_error(cause))),
    }
}

fn enrich_with_body(record: &mut LogRecord, input: &LogInput) {
    record.source = non_empty(input.source.as_deref());
    record.user = input.user.clone();
    if record.level == LogLevel::Error {
        record.error = input.error.as_ref().map(sanitize_error);
    }
}

/// Applies request details and returns the inbound trace parent, if any.
fn enrich_with_request(record: &mut LogRecord, request: &RequestContext) -> Option<TraceContext> {
    record.request = Some(RequestInfo {
        id: non_empty(request.header(REQUEST_ID_HEADER))
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        url: request.url.clone(),
        method: request.method.to_uppercase(),
        user_agent: non_empty(request.header(USER_AGENT_HEADER)),
        ip: non_empty(request.ip.as_deref()),
        correlation_id: non_empty(request.header(CORRELATION_ID_HEADER)),
    });
    record.sampling_policy = SamplingPolicy::from_header(request.header(SAMPLING_HEADER));
    request
        .header(TRACEPARENT_HEADER)
        .and_then(TraceContext::parse_traceparent)
}

fn enrich_with_response(record: &mut LogRecord, response: &ResponseContext) {
    record.response = Some(ResponseInfo {
        status_code: response.status_code,
        response_time_ms: response.response_time_ms,
    });
}

/// Builds a fully enriched record from an inbound payload.
#[must_use]
pub fn build_record(input: &LogInput, tracer: &dyn Tracer) -> LogRecord {
    let mut record = LogRecord::new(input.level, input.message.clone());
    enrich_with_body(&mut record, input);
    let parent = input
        .request
        .as_ref()
        .and_then(|request| enrich_with_request(&mut record, request));
    if let Some(response) = &input.response {
        enrich_with_response(&mut record, response);
    }
    tracer.stamp(&mut record, parent.as_ref());
    record
}
