//! Background subtraction.
//!
//! A background is either nothing, a constant offset, or a per-pixel spectrum
//! recorded on the same wavelength axis (a dark frame, or the in-situ rows of
//! the same detector frame). The result is clamped at zero so downstream
//! stages never see negative counts.

use log::debug;

use crate::domain::Spectrum;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundSource {
    None,
    Scalar(f64),
    PerPixel(Spectrum),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Background {
    pub source: BackgroundSource,
    /// Multiplier applied to the background before subtraction.
    pub scale: f64,
}

impl Default for Background {
    fn default() -> Self {
        Self::none()
    }
}

impl Background {
    pub fn none() -> Self {
        Self {
            source: BackgroundSource::None,
            scale: 1.0,
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            source: BackgroundSource::Scalar(value),
            scale: 1.0,
        }
    }

    pub fn per_pixel(spectrum: Spectrum) -> Self {
        Self {
            source: BackgroundSource::PerPixel(spectrum),
            scale: 1.0,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// `max(I − scale·B, 0)` sample by sample.
    ///
    /// A per-pixel background must have exactly as many samples as `spectrum`.
    pub fn subtract(&self, spectrum: &Spectrum) -> Result<Spectrum, Error> {
        let intensity: Vec<f64> = match &self.source {
            BackgroundSource::None => return Ok(spectrum.clone()),
            BackgroundSource::Scalar(value) => {
                let offset = self.scale * value;
                spectrum.intensity().iter().map(|&v| clamp(v - offset)).collect()
            }
            BackgroundSource::PerPixel(bg) => {
                if bg.len() != spectrum.len() {
                    return Err(Error::ShapeMismatch {
                        expected: spectrum.len(),
                        actual: bg.len(),
                    });
                }
                spectrum
                    .intensity()
                    .iter()
                    .zip(bg.intensity())
                    .map(|(&v, &b)| clamp(v - self.scale * b))
                    .collect()
            }
        };

        let clamped = spectrum
            .intensity()
            .iter()
            .zip(&intensity)
            .filter(|(before, after)| **after == 0.0 && **before != 0.0)
            .count();
        if clamped > 0 {
            debug!("background subtraction clamped {clamped} sample(s) to zero");
        }

        spectrum.with_intensity(intensity)
    }
}

// NaN passes through untouched so masked samples stay recognisable.
fn clamp(v: f64) -> f64 {
    if v < 0.0 { 0.0 } else { v }
}
