// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event formatter for the pipeline's own diagnostics.
//!
//! Lines are prefixed with `TELEMETRY_INGEST` so they can be told apart from
//! the records the pipeline is forwarding when both end up on the same stream:
//!
//! ```text
//! TELEMETRY_INGEST | INFO | SCHEDULER | Flushing every 10000 ms, up to 100 records per chunk
//! TELEMETRY_INGEST | WARN | export{chunk=2}: EXPORT | kafka failed to publish 100 records: ...
//! ```
//!
//! ```rust,ignore
//! let subscriber = tracing_subscriber::fmt::Subscriber::builder()
//!     .event_format(telemetry_ingest::logger::Formatter)
//!     .with_ansi(false)
//!     .finish();
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_PREFIX: &str = "TELEMETRY_INGEST";

/// `TELEMETRY_INGEST | LEVEL | [span{fields}: ]message fields`
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{LOG_PREFIX} | {} | ", metadata.level())?;

        // Spans from the root down to the current one
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}
