//! Error types.
//!
//! - [`Error`] is the library taxonomy returned by individual stages.
//! - [`PipelineError`] wraps an [`Error`] with the stage, side, and file it concerns.
//! - [`AppError`] is what the binary prints before exiting with its code.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{FitRegion, Side};
use crate::publish::PublishError;

/// Failures raised by the reader, correction, fit, and publish stages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unrecognized spectral file: {0}")]
    Format(String),

    #[error("truncated file: header declares {expected} bytes but only {actual} are present")]
    TruncatedFile { expected: u64, actual: u64 },

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("shape mismatch: expected {expected} samples, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("fit region {region} holds {samples} usable samples, at least {required} are needed")]
    EmptyRegion {
        region: FitRegion,
        samples: usize,
        required: usize,
    },

    #[error("fit did not converge within {iterations} iterations (last T = {last_temperature:.1} K)")]
    FitDidNotConverge {
        iterations: usize,
        last_temperature: f64,
    },

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("frame {index} requested but the file holds {frames} frame(s)")]
    FrameOutOfRange { index: usize, frames: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pipeline stage in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Background,
    Calibration,
    Fit,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Background => "background",
            Stage::Calibration => "calibration",
            Stage::Fit => "fit",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// An [`Error`] with enough context for the caller to adjust and retry.
#[derive(Debug)]
pub struct PipelineError {
    pub stage: Stage,
    pub side: Option<Side>,
    pub path: Option<PathBuf>,
    pub source: Error,
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage", self.stage)?;
        if let Some(side) = self.side {
            write!(f, " ({side})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " [{}]", path.display())?;
        }
        write!(f, ": {}", self.source)
    }
}

/// Attach pipeline context to a stage result.
pub trait StageContext<T> {
    fn at(self, stage: Stage, side: Option<Side>) -> Result<T, PipelineError>;
    fn at_path(self, stage: Stage, side: Option<Side>, path: impl Into<PathBuf>) -> Result<T, PipelineError>;
}

impl<T> StageContext<T> for Result<T, Error> {
    fn at(self, stage: Stage, side: Option<Side>) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError {
            stage,
            side,
            path: None,
            source,
        })
    }

    fn at_path(self, stage: Stage, side: Option<Side>, path: impl Into<PathBuf>) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError {
            stage,
            side,
            path: Some(path.into()),
            source,
        })
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl Error {
    /// Process exit code used by the binary for this failure class.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Format(_)
            | Error::TruncatedFile { .. }
            | Error::InvalidCalibration(_)
            | Error::FrameOutOfRange { .. }
            | Error::Config(_)
            | Error::Io(_) => 2,
            Error::ShapeMismatch { .. } | Error::EmptyRegion { .. } => 3,
            Error::FitDidNotConverge { .. } => 4,
            Error::Publish(_) => 5,
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::new(err.source.exit_code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_names_stage_side_and_path() {
        let err: Result<(), Error> = Err(Error::InvalidCalibration("temperature must be > 0".into()));
        let err = err
            .at_path(Stage::Calibration, Some(Side::Upstream), "lamp.spe")
            .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("calibration stage (Upstream) [lamp.spe]"), "{text}");
        assert!(text.contains("temperature must be > 0"));
    }

    #[test]
    fn exit_codes_follow_failure_class() {
        let app: AppError = Error::FitDidNotConverge {
            iterations: 200,
            last_temperature: 1500.0,
        }
        .into();
        assert_eq!(app.exit_code(), 4);
        let app: AppError = Error::TruncatedFile { expected: 4100, actual: 100 }.into();
        assert_eq!(app.exit_code(), 2);
    }
}
