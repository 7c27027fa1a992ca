// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion and export core for structured log records.
//!
//! Records enter through [`pipeline::LogPipeline::enqueue`], pass per-severity
//! admission control, wait in a fixed-capacity ring, and are drained on a timer
//! into bounded chunks. Each chunk is exported to every registered sink, and
//! every sink sits behind its own circuit breaker wrapping a bounded retry
//! policy.
//!
//! ```text
//!   producer ──> enqueue ──> SamplingBuffer ──(tick)──> BatchScheduler
//!                                                          │ chunks
//!                                                          v
//!        Exporter <── ResilienceExecutor (per sink) <── ExportManager
//! ```
//!
//! Losing records is an accepted outcome: sampling rejections, ring eviction
//! and batches that exhaust their retries are dropped, never queued for replay.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod error;
pub mod exporters;
pub mod ingest;
pub mod logger;
pub mod pipeline;
pub mod record;
pub mod resilience;
pub mod sampling;
pub mod scheduler;
pub mod tracer;

pub use error::PipelineError;
pub use pipeline::LogPipeline;
pub use record::{LogLevel, LogRecord};
