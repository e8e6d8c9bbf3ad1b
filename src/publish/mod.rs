//! Forwarding fitted temperatures to an external data-acquisition system.
//!
//! The outside world is only reached through [`TemperatureSink`]. The
//! timestamp of every write comes from the fit result (the acquisition time of
//! the spectrum), so publishing the same result twice writes identical values.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use thiserror::Error;

use crate::domain::{FitResult, Side};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("sink rejected {side} temperature: {message}")]
    Rejected { side: Side, message: String },

    #[error("failed to write temperature log '{path}': {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for fitted temperatures.
pub trait TemperatureSink {
    fn publish(&mut self, side: Side, temperature: f64, timestamp: NaiveDateTime) -> Result<(), PublishError>;
}

/// Publication policy applied before a result reaches the sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishPolicy {
    /// Results whose 1σ error exceeds this many kelvin are withheld.
    pub error_limit: Option<f64>,
    /// Timestamp used when a result carries no acquisition time.
    pub fallback_timestamp: Option<NaiveDateTime>,
}

/// What happened to one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Error above the configured limit, or a non-finite temperature.
    Withheld,
    /// No acquisition time and no fallback.
    NoTimestamp,
}

pub fn publish_result(
    sink: &mut dyn TemperatureSink,
    result: &FitResult,
    policy: &PublishPolicy,
) -> Result<PublishOutcome, PublishError> {
    if !result.temperature.is_finite() {
        warn!("{}: not publishing non-finite temperature", result.side);
        return Ok(PublishOutcome::Withheld);
    }
    if let Some(limit) = policy.error_limit {
        if !(result.temperature_error <= limit) {
            info!(
                "{}: withholding T = {:.1} K, error {:.1} K exceeds limit {:.1} K",
                result.side, result.temperature, result.temperature_error, limit
            );
            return Ok(PublishOutcome::Withheld);
        }
    }
    let Some(timestamp) = result.acquired_at.or(policy.fallback_timestamp) else {
        warn!("{}: result has no acquisition time; not publishing", result.side);
        return Ok(PublishOutcome::NoTimestamp);
    };

    sink.publish(result.side, result.temperature, timestamp)?;
    debug!("{}: published {:.1} K at {timestamp}", result.side, result.temperature);
    Ok(PublishOutcome::Published)
}

/// One recorded publication.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub side: Side,
    pub temperature: f64,
    pub timestamp: NaiveDateTime,
}

/// Sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<Publication>,
}

impl TemperatureSink for MemorySink {
    fn publish(&mut self, side: Side, temperature: f64, timestamp: NaiveDateTime) -> Result<(), PublishError> {
        self.records.push(Publication {
            side,
            temperature,
            timestamp,
        });
        Ok(())
    }
}

/// Tab-separated temperature log: `timestamp  side  temperature`.
///
/// The file is opened in append mode for each write and closed before
/// `publish` returns.
#[derive(Debug, Clone)]
pub struct TsvLogSink {
    path: PathBuf,
}

impl TsvLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemperatureSink for TsvLogSink {
    fn publish(&mut self, side: Side, temperature: f64, timestamp: NaiveDateTime) -> Result<(), PublishError> {
        let log_err = |source| PublishError::Log {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(log_err)?;
        writeln!(
            file,
            "{}\t{}\t{:.3}",
            timestamp.format(TIMESTAMP_FORMAT),
            side.short_name(),
            temperature
        )
        .map_err(log_err)
    }
}
