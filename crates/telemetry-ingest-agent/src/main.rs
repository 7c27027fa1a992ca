// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Reads newline-delimited JSON records from stdin and ships them through the
//! ingestion pipeline until stdin closes or the process is interrupted.

use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_ingest::{
    config::PipelineConfig,
    exporters::manager::ExportManager,
    ingest::{build_record, LogInput},
    logger::Formatter,
    tracer::{RandomTracer, Tracer},
    LogPipeline,
};

fn ingest_line(pipeline: &LogPipeline, tracer: &dyn Tracer, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    match serde_json::from_str::<LogInput>(line) {
        Ok(input) => pipeline.enqueue(build_record(&input, tracer)),
        Err(e) => warn!("AGENT | Skipping malformed record: {e}"),
    }
}

#[tokio::main]
pub async fn main() {
    let log_level = env::var("TELEMETRY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,reqwest=off,rdkafka=off,{}",
        log_level
    );

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_ansi(false)
        .event_format(Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match PipelineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading config: {e}");
            return;
        }
    };

    let manager = match ExportManager::from_config(&config) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!("Error creating exporters: {e}");
            return;
        }
    };
    manager.connect_all().await;

    let pipeline = match LogPipeline::new(config, Arc::clone(&manager)) {
        Ok(p) => p,
        Err(e) => {
            error!("Error creating pipeline: {e}");
            return;
        }
    };
    if let Err(e) = pipeline.start() {
        error!("Error starting pipeline: {e}");
        return;
    }

    let tracer = RandomTracer;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("AGENT | Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => ingest_line(&pipeline, &tracer, &line),
                Ok(None) => {
                    info!("AGENT | Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("AGENT | Failed to read input: {e}");
                    break;
                }
            },
        }
    }

    pipeline.shutdown().await;
    let stats = pipeline.stats();
    info!(
        accepted = stats.buffer.accepted,
        rejected = stats.buffer.rejected,
        evicted = stats.buffer.evicted,
        "AGENT | Stopped"
    );
}
