// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace/span stamping.
//!
//! Span instrumentation itself lives outside this crate; the pipeline only
//! needs something that puts correlation ids on a record. [`RandomTracer`]
//! generates W3C-sized ids and continues an inbound `traceparent` when one is
//! supplied.

use rand::Rng;

use crate::record::{LogRecord, TraceInfo};

pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Remote parent extracted from an inbound `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub parent_span_id: String,
    pub trace_flags: u8,
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl TraceContext {
    /// Parses `00-<32 hex trace id>-<16 hex span id>-<2 hex flags>`.
    ///
    /// All-zero ids and unknown versions are rejected.
    #[must_use]
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let (Some(version), Some(trace_id), Some(span_id), Some(flags), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return None;
        };

        if version != "00"
            || !is_lower_hex(trace_id, 32)
            || !is_lower_hex(span_id, 16)
            || !is_lower_hex(flags, 2)
            || trace_id.bytes().all(|b| b == b'0')
            || span_id.bytes().all(|b| b == b'0')
        {
            return None;
        }

        Some(TraceContext {
            trace_id: trace_id.to_string(),
            parent_span_id: span_id.to_string(),
            trace_flags: u8::from_str_radix(flags, 16).ok()?,
        })
    }
}

/// Capability that stamps trace/span ids onto a record.
pub trait Tracer: Send + Sync {
    fn stamp(&self, record: &mut LogRecord, parent: Option<&TraceContext>);
}

/// Random 128-bit trace ids and 64-bit span ids, lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTracer;

impl RandomTracer {
    fn trace_id() -> String {
        format!("{:032x}", rand::rng().random::<u128>().max(1))
    }

    fn span_id() -> String {
        format!("{:016x}", rand::rng().random::<u64>().max(1))
    }
}

impl Tracer for RandomTracer {
    fn stamp(&self, record: &mut LogRecord, parent: Option<&TraceContext>) {
        record.trace = Some(match parent {
            Some(parent) => TraceInfo {
                trace_id: parent.trace_id.clone(),
                span_id: Some(Self::span_id()),
                parent_span_id: Some(parent.parent_span_id.clone()),
                trace_flags: Some(parent.trace_flags),
            },
            None => TraceInfo {
                trace_id: Self::trace_id(),
                span_id: Some(Self::span_id()),
                parent_span_id: None,
                trace_flags: Some(1),
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;

    const INBOUND: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_traceparent() {
        let context = TraceContext::parse_traceparent(INBOUND).unwrap();
        assert_eq!(context.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(context.parent_span_id, "00f067aa0ba902b7");
        assert_eq!(context.trace_flags, 1);
    }

    #[test]
    fn test_parse_traceparent_rejects_garbage() {
        for value in [
            "",
            "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
            "00-xyz-00f067aa0ba902b7-01",
        ] {
            assert!(TraceContext::parse_traceparent(value).is_none(), "{value}");
        }
    }

    #[test]
    fn test_random_tracer_generates_ids() {
        let mut record = LogRecord::new(LogLevel::Info, "hello");
        RandomTracer.stamp(&mut record, None);
        let trace = record.trace.unwrap();
        assert!(is_lower_hex(&trace.trace_id, 32));
        assert!(is_lower_hex(trace.span_id.as_deref().unwrap(), 16));
        assert!(trace.parent_span_id.is_none());
    }

    #[test]
    fn test_random_tracer_continues_inbound_trace() {
        let parent = TraceContext::parse_traceparent(INBOUND).unwrap();
        let mut record = LogRecord::new(LogLevel::Info, "hello");
        RandomTracer.stamp(&mut record, Some(&parent));
        let trace = record.trace.unwrap();
        assert_eq!(trace.trace_id, parent.trace_id);
        assert_eq!(trace.parent_span_id.as_deref(), Some("00f067aa0ba902b7"));
        assert_ne!(trace.span_id.as_deref(), Some("00f067aa0ba902b7"));
    }
}
