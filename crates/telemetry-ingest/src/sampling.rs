// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-severity admission control.
//!
//! Every record is admitted with a probability looked up by its level: first
//! in the policy attached to the record (if any), then in the default table.
//! Rates of `1.0` always admit and `0.0` never does.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use tracing::debug;

use crate::record::{LogLevel, LogRecord};

/// Header carrying a per-request sampling override, e.g. `debug=0.5,info=1`.
pub const SAMPLING_HEADER: &str = "x-sampling-policy";

/// Emit a stats event every this many admission decisions.
const STATS_REPORT_INTERVAL: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplingParseError {
    #[error("sampling policy is empty")]
    Empty,
    #[error("malformed sampling pair '{0}', expected level=rate")]
    MalformedPair(String),
    #[error("unknown level '{0}' in sampling policy")]
    UnknownLevel(String),
    #[error("invalid rate '{value}' for level {level}, expected a number in [0, 1]")]
    InvalidRate { level: LogLevel, value: String },
}

/// Mapping from severity to admission rate in `[0, 1]`.
///
/// A policy may be partial; levels it does not mention are resolved against
/// [`SamplingPolicy::default`].
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingPolicy(HashMap<LogLevel, f64>);

impl Default for SamplingPolicy {
    fn default() -> Self {
        // Rates in `LogLevel::ALL` order
        let rates = [0.1, 0.3, 0.7, 1.0, 1.0];
        SamplingPolicy(LogLevel::ALL.into_iter().zip(rates).collect())
    }
}

impl SamplingPolicy {
    /// Builds a policy from explicit rates. Rates are clamped into `[0, 1]`.
    pub fn from_rates<I>(rates: I) -> Self
    where
        I: IntoIterator<Item = (LogLevel, f64)>,
    {
        SamplingPolicy(
            rates
                .into_iter()
                .map(|(level, rate)| (level, rate.clamp(0.0, 1.0)))
                .collect(),
        )
    }

    #[must_use]
    pub fn rate_for(&self, level: LogLevel) -> Option<f64> {
        self.0.get(&level).copied()
    }

    /// Parses `level1=rate1,level2=rate2,...`.
    ///
    /// Whitespace around pairs, names and rates is ignored and level names are
    /// case-insensitive. A single malformed pair invalidates the whole value.
    pub fn parse(raw: &str) -> Result<Self, SamplingParseError> {
        if raw.trim().is_empty() {
            return Err(SamplingParseError::Empty);
        }

        let mut rates = HashMap::new();
        for pair in raw.split(',') {
            let Some((name, value)) = pair.split_once('=') else {
                return Err(SamplingParseError::MalformedPair(pair.trim().to_string()));
            };
            let level: LogLevel = name
                .parse()
                .map_err(|_| SamplingParseError::UnknownLevel(name.trim().to_string()))?;
            let rate = value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|rate| (0.0..=1.0).contains(rate))
                .ok_or_else(|| SamplingParseError::InvalidRate {
                    level,
                    value: value.trim().to_string(),
                })?;
            rates.insert(level, rate);
        }
        Ok(SamplingPolicy(rates))
    }

    /// Reads an optional override header. Absent or unparseable values yield
    /// `None`, so the default table applies.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        let raw = value?;
        match Self::parse(raw) {
            Ok(policy) => Some(policy),
            Err(e) => {
                debug!("SAMPLING | Ignoring {SAMPLING_HEADER} override: {e}");
                None
            }
        }
    }
}

/// Randomized admission decisions with running counters.
#[derive(Debug)]
pub struct Sampler {
    rng: StdRng,
    defaults: SamplingPolicy,
    accepted: u64,
    rejected: u64,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic sampler for tests and reproducible runs.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Sampler {
            rng,
            defaults: SamplingPolicy::default(),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Effective rate for a record: its own policy first, then the defaults.
    #[must_use]
    pub fn rate_for(&self, record: &LogRecord) -> f64 {
        record
            .sampling_policy
            .as_ref()
            .and_then(|policy| policy.rate_for(record.level))
            .or_else(|| self.defaults.rate_for(record.level))
            .unwrap_or(1.0)
    }

    pub fn admit(&mut self, record: &LogRecord) -> bool {
        let rate = self.rate_for(record);
        let admitted = self.rng.random::<f64>() < rate;
        if admitted {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }

        let decisions = self.accepted + self.rejected;
        if decisions % STATS_REPORT_INTERVAL == 0 {
            debug!(
                accepted = self.accepted,
                rejected = self.rejected,
                acceptance_rate = self.accepted as f64 / decisions as f64,
                "SAMPLING | Sampling stats"
            );
        }
        admitted
    }

    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
