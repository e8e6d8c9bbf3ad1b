//! Shared domain types.
//!
//! These types are intentionally kept small and serializable so they can be:
//!
//! - passed between pipeline stages without copying state around
//! - exported to JSON for later plotting or comparison
//! - reloaded by the `plot` command

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One of the two independent optical paths of a double-sided heating setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Upstream,
    Downstream,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Upstream, Side::Downstream];

    /// Short label used in logs and exported file names.
    pub fn short_name(self) -> &'static str {
        match self {
            Side::Upstream => "us",
            Side::Downstream => "ds",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Side::Upstream => "Upstream",
            Side::Downstream => "Downstream",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Inclusive range of detector rows summed into a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRange {
    pub start: usize,
    pub end: usize,
}

impl RowRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl fmt::Display for RowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rows {}..={}", self.start, self.end)
    }
}

/// Wavelength window (nm) used to restrict a fit.
///
/// Open ends serialize as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RegionBounds", into = "RegionBounds")]
pub struct FitRegion {
    pub start: f64,
    pub end: f64,
}

impl FitRegion {
    pub fn new(start: f64, end: f64) -> Result<Self, Error> {
        if !(start.is_finite() && end.is_finite() && start < end) {
            return Err(Error::Config(format!(
                "fit region must satisfy start < end (got {start}..{end} nm)"
            )));
        }
        Ok(Self { start, end })
    }

    /// A region covering every finite wavelength.
    pub fn unbounded() -> Self {
        Self {
            start: f64::NEG_INFINITY,
            end: f64::INFINITY,
        }
    }

    pub fn contains(&self, wavelength: f64) -> bool {
        wavelength >= self.start && wavelength <= self.end
    }
}

#[derive(Serialize, Deserialize)]
struct RegionBounds {
    start: Option<f64>,
    end: Option<f64>,
}

impl From<FitRegion> for RegionBounds {
    fn from(region: FitRegion) -> Self {
        Self {
            start: region.start.is_finite().then_some(region.start),
            end: region.end.is_finite().then_some(region.end),
        }
    }
}

impl From<RegionBounds> for FitRegion {
    fn from(bounds: RegionBounds) -> Self {
        Self {
            start: bounds.start.unwrap_or(f64::NEG_INFINITY),
            end: bounds.end.unwrap_or(f64::INFINITY),
        }
    }
}

impl fmt::Display for FitRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.1}, {:.1}] nm", self.start, self.end)
    }
}

/// Acquisition metadata carried by every spectrum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumMeta {
    /// Exposure time in seconds.
    pub exposure_time: f64,
    pub acquired_at: Option<NaiveDateTime>,
    pub side: Option<Side>,
    pub source: Option<PathBuf>,
}

/// An immutable intensity-vs-wavelength series.
///
/// Wavelengths are in nm and strictly increasing. The optional mask marks
/// samples that are usable for fitting (`true`); every stage preserves the
/// sample count so the mask stays index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    wavelength: Vec<f64>,
    intensity: Vec<f64>,
    mask: Option<Vec<bool>>,
    meta: SpectrumMeta,
}

impl Spectrum {
    pub fn new(wavelength: Vec<f64>, intensity: Vec<f64>, meta: SpectrumMeta) -> Result<Self, Error> {
        if wavelength.len() != intensity.len() {
            return Err(Error::ShapeMismatch {
                expected: wavelength.len(),
                actual: intensity.len(),
            });
        }
        if let Some(i) = wavelength.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(Error::Format(format!(
                "wavelength axis is not strictly increasing at sample {} ({} -> {} nm)",
                i + 1,
                wavelength[i],
                wavelength[i + 1]
            )));
        }
        Ok(Self {
            wavelength,
            intensity,
            mask: None,
            meta,
        })
    }

    /// Same axis and metadata, new intensities. Used by every correction stage.
    pub fn with_intensity(&self, intensity: Vec<f64>) -> Result<Self, Error> {
        if intensity.len() != self.wavelength.len() {
            return Err(Error::ShapeMismatch {
                expected: self.wavelength.len(),
                actual: intensity.len(),
            });
        }
        Ok(Self {
            wavelength: self.wavelength.clone(),
            intensity,
            mask: self.mask.clone(),
            meta: self.meta.clone(),
        })
    }

    /// Combine a usability mask with any mask already present.
    pub fn with_mask(&self, mask: Vec<bool>) -> Result<Self, Error> {
        if mask.len() != self.wavelength.len() {
            return Err(Error::ShapeMismatch {
                expected: self.wavelength.len(),
                actual: mask.len(),
            });
        }
        let mask = match &self.mask {
            Some(existing) => existing.iter().zip(&mask).map(|(a, b)| *a && *b).collect(),
            None => mask,
        };
        Ok(Self {
            wavelength: self.wavelength.clone(),
            intensity: self.intensity.clone(),
            mask: Some(mask),
            meta: self.meta.clone(),
        })
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.meta.side = Some(side);
        self
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    pub fn meta(&self) -> &SpectrumMeta {
        &self.meta
    }

    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    /// Whether sample `i` is usable: unmasked and finite.
    pub fn is_usable(&self, i: usize) -> bool {
        let unmasked = self.mask.as_ref().is_none_or(|m| m[i]);
        unmasked && self.intensity[i].is_finite()
    }

    pub fn wavelength_range(&self) -> Option<(f64, f64)> {
        Some((*self.wavelength.first()?, *self.wavelength.last()?))
    }

    /// Sum of finite intensities (integrated counts).
    pub fn total_counts(&self) -> f64 {
        self.intensity.iter().filter(|v| v.is_finite()).sum()
    }
}

/// Which estimator produced a temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FitMethod {
    /// Non-linear least squares on Planck's law.
    Planck,
    /// Linear regression in Wien coordinates.
    Wien,
}

/// Emissivity model multiplying Planck's law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Emissivity {
    /// Wavelength-independent emissivity folded into the scale factor.
    Grey,
    /// `1 + b·(λ − λc)/λc` around the centre of the fitted samples.
    Linear,
}

impl Emissivity {
    /// Number of free parameters (scale, temperature, and any shape terms).
    pub fn param_count(self) -> usize {
        match self {
            Emissivity::Grey => 2,
            Emissivity::Linear => 3,
        }
    }

    /// Minimum usable samples before a fit is attempted.
    pub fn min_samples(self) -> usize {
        match self {
            Emissivity::Grey => 3,
            Emissivity::Linear => 4,
        }
    }
}

/// Identity of a calibration curve: the file it came from and the lamp temperature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationKey {
    pub path: PathBuf,
    pub temperature: f64,
    pub rows: Option<RowRange>,
    /// Set when the lamp reference is a tabulated standard spectrum instead of a black body.
    pub standard: Option<PathBuf>,
}

impl CalibrationKey {
    /// Hashable form used by the session cache.
    pub fn cache_id(&self) -> (PathBuf, u64, Option<RowRange>, Option<PathBuf>) {
        (
            self.path.clone(),
            self.temperature.to_bits(),
            self.rows,
            self.standard.clone(),
        )
    }
}

/// Outcome of one fit invocation. Never mutated; re-fitting produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub side: Side,
    /// Kelvin.
    pub temperature: f64,
    /// One standard deviation, Kelvin. NaN (`null` in JSON) when unavailable.
    #[serde(with = "nan_as_null")]
    pub temperature_error: f64,
    pub scale_factor: f64,
    pub emissivity_slope: Option<f64>,
    /// Reference wavelength `λc` (nm) of the linear emissivity term.
    pub emissivity_center: Option<f64>,
    /// Final residual norm `sqrt(SSE)`.
    pub residual: f64,
    pub rmse: f64,
    pub iterations: usize,
    pub samples: usize,
    pub method: FitMethod,
    pub emissivity: Emissivity,
    pub region: FitRegion,
    pub calibration: Option<CalibrationKey>,
    pub acquired_at: Option<NaiveDateTime>,
}

/// Non-finite floats become `null` in JSON and read back as NaN.
pub(crate) mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
