//! Read/write fit report JSON files.
//!
//! A report is the portable record of one acquisition:
//! - the fit result (or the failure message) of each side
//! - the corrected spectrum and the fitted curve on the same wavelength grid
//! - the optional two-colour temperature map
//!
//! `radiant plot` re-renders a report without re-running the pipeline.
//! Non-finite samples (masked, or outside the calibration) are stored as `null`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{FitResult, Side, Spectrum};
use crate::error::Error;
use crate::fit::{TwoColorMap, fitted_curve};

pub const REPORT_TOOL: &str = "radiant";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub tool: String,
    pub version: String,
    pub source: Option<PathBuf>,
    pub frame: Option<usize>,
    pub sides: Vec<SideReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideReport {
    pub side: Side,
    pub result: Option<FitResult>,
    pub error: Option<String>,
    pub curve: Option<SpectrumCurve>,
    pub two_color: Option<TwoColorCurve>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumCurve {
    pub wavelength: Vec<f64>,
    pub corrected: Vec<Option<f64>>,
    pub usable: Vec<bool>,
    pub fitted: Vec<f64>,
}

impl SpectrumCurve {
    pub fn from_fit(corrected: &Spectrum, result: &FitResult) -> Self {
        Self {
            wavelength: corrected.wavelength().to_vec(),
            corrected: corrected.intensity().iter().map(|v| finite(*v)).collect(),
            usable: (0..corrected.len()).map(|i| corrected.is_usable(i)).collect(),
            fitted: fitted_curve(result, corrected.wavelength()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoColorCurve {
    pub wavelength: Vec<f64>,
    pub temperature: Vec<Option<f64>>,
    pub delta_nm: f64,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
}

impl From<&TwoColorMap> for TwoColorCurve {
    fn from(map: &TwoColorMap) -> Self {
        Self {
            wavelength: map.wavelength.clone(),
            temperature: map.temperature.iter().map(|v| finite(*v)).collect(),
            delta_nm: map.delta_nm,
            mean: finite(map.mean),
            std_dev: finite(map.std_dev),
        }
    }
}

impl FitReport {
    pub fn new(source: Option<PathBuf>, frame: Option<usize>) -> Self {
        Self {
            tool: REPORT_TOOL.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            source,
            frame,
            sides: Vec::new(),
        }
    }

    pub fn side(&self, side: Side) -> Option<&SideReport> {
        self.sides.iter().find(|s| s.side == side)
    }
}

pub fn write_report_json(path: &Path, report: &FitReport) -> Result<(), Error> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    Ok(())
}

pub fn read_report_json(path: &Path) -> Result<FitReport, Error> {
    let file = File::open(path)?;
    let report: FitReport = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Format(format!("invalid report '{}': {e}", path.display())))?;
    if report.tool != REPORT_TOOL {
        return Err(Error::Format(format!(
            "'{}' was written by '{}', not {REPORT_TOOL}",
            path.display(),
            report.tool
        )));
    }
    Ok(report)
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}
