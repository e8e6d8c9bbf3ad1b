//! Detector response calibration.
//!
//! A lamp of known spectral radiance is recorded through the same optics as the
//! sample. Dividing that measurement by the ideal lamp spectrum gives the
//! per-pixel system response:
//!
//! ```text
//! correction[i] = measured[i] / lamp(λ[i])
//! ```
//!
//! where `lamp` is either a black body at the lamp temperature or a tabulated
//! standard spectrum. Experimental spectra are then divided by the response.
//!
//! Samples with no usable correction (outside the calibration grid, or a
//! non-positive response) become NaN and are masked out; the spectrum length
//! is never changed.

use log::{debug, warn};

use crate::domain::{CalibrationKey, Spectrum};
use crate::error::Error;
use crate::math::{interp_linear, nearest_index, planck};

/// Grid offsets at or below this are treated as the same wavelength.
pub const DEFAULT_GRID_TOLERANCE_NM: f64 = 0.01;

/// What the calibration lamp is assumed to emit.
#[derive(Debug, Clone, PartialEq)]
pub enum LampReference {
    BlackBody { temperature: f64 },
    Standard(Spectrum),
}

impl LampReference {
    fn radiance(&self, wavelength: &[f64]) -> Result<Vec<f64>, Error> {
        match self {
            LampReference::BlackBody { temperature } => {
                let t = *temperature;
                if !(t.is_finite() && t > 0.0) {
                    return Err(Error::InvalidCalibration(format!(
                        "lamp temperature must be a positive number of kelvin (got {t})"
                    )));
                }
                Ok(wavelength.iter().map(|&nm| planck(nm, t)).collect())
            }
            LampReference::Standard(standard) => {
                let values: Vec<f64> = wavelength
                    .iter()
                    .map(|&nm| interp_linear(standard.wavelength(), standard.intensity(), nm).unwrap_or(f64::NAN))
                    .collect();
                if values.iter().all(|v| v.is_nan()) {
                    return Err(Error::InvalidCalibration(
                        "standard lamp spectrum does not overlap the calibration grid".into(),
                    ));
                }
                Ok(values)
            }
        }
    }
}

/// Per-pixel response of one optical path.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurve {
    wavelength: Vec<f64>,
    correction: Vec<f64>,
    key: Option<CalibrationKey>,
}

impl CalibrationCurve {
    /// Build a response curve from a lamp measurement.
    pub fn from_reference(measured: &Spectrum, lamp: &LampReference) -> Result<Self, Error> {
        let radiance = lamp.radiance(measured.wavelength())?;
        let correction: Vec<f64> = measured
            .intensity()
            .iter()
            .zip(&radiance)
            .enumerate()
            .map(|(i, (&m, &r))| {
                let c = m / r;
                if measured.is_usable(i) && c.is_finite() && c > 0.0 { c } else { f64::NAN }
            })
            .collect();

        let usable = correction.iter().filter(|c| !c.is_nan()).count();
        if usable == 0 {
            return Err(Error::InvalidCalibration(
                "calibration spectrum has no positive response".into(),
            ));
        }
        if usable < correction.len() {
            warn!(
                "calibration response undefined for {} of {} pixels",
                correction.len() - usable,
                correction.len()
            );
        }

        Ok(Self {
            wavelength: measured.wavelength().to_vec(),
            correction,
            key: None,
        })
    }

    pub fn with_key(mut self, key: CalibrationKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn key(&self) -> Option<&CalibrationKey> {
        self.key.as_ref()
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn correction(&self) -> &[f64] {
        &self.correction
    }

    /// Response at `nm`: the nearest grid value within `tolerance_nm`,
    /// otherwise linearly interpolated. `None` outside the grid.
    pub fn correction_at(&self, nm: f64, tolerance_nm: f64) -> Option<f64> {
        let j = nearest_index(&self.wavelength, nm)?;
        if (self.wavelength[j] - nm).abs() <= tolerance_nm {
            return Some(self.correction[j]);
        }
        interp_linear(&self.wavelength, &self.correction, nm)
    }

    /// Divide `spectrum` by the response, aligned on wavelength.
    pub fn apply(&self, spectrum: &Spectrum, tolerance_nm: f64) -> Result<Spectrum, Error> {
        let mut overlap = 0usize;
        let corrected: Vec<f64> = spectrum
            .wavelength()
            .iter()
            .zip(spectrum.intensity())
            .map(|(&nm, &v)| match self.correction_at(nm, tolerance_nm) {
                Some(c) => {
                    overlap += 1;
                    if c.is_finite() && c > 0.0 { v / c } else { f64::NAN }
                }
                None => f64::NAN,
            })
            .collect();

        if overlap == 0 {
            return Err(Error::InvalidCalibration(format!(
                "spectrum {:?} nm does not overlap the calibration grid {:?} nm",
                spectrum.wavelength_range(),
                (self.wavelength.first(), self.wavelength.last())
            )));
        }
        if overlap < spectrum.len() {
            debug!(
                "{} sample(s) outside the calibration grid are masked",
                spectrum.len() - overlap
            );
        }

        let mask = corrected.iter().map(|v| v.is_finite()).collect();
        spectrum.with_intensity(corrected)?.with_mask(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SpectrumMeta;
    use approx::assert_relative_eq;

    fn grid(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    fn lamp_measurement(response: impl Fn(f64) -> f64, t: f64) -> Spectrum {
        let wl = grid(500.0, 1.0, 301);
        let y = wl.iter().map(|&nm| response(nm) * planck(nm, t)).collect();
        Spectrum::new(wl, y, SpectrumMeta::default()).unwrap()
    }

    #[test]
    fn non_positive_lamp_temperature_is_invalid() {
        let measured = lamp_measurement(|_| 1.0, 2500.0);
        for t in [0.0, -10.0, f64::NAN] {
            let err = CalibrationCurve::from_reference(&measured, &LampReference::BlackBody { temperature: t })
                .unwrap_err();
            assert!(matches!(err, Error::InvalidCalibration(_)), "{t}: {err}");
        }
    }

    #[test]
    fn response_is_recovered_and_removed() {
        let response = |nm: f64| 1e6 * (1.0 + (nm - 650.0) / 500.0);
        let curve = CalibrationCurve::from_reference(
            &lamp_measurement(response, 2800.0),
            &LampReference::BlackBody { temperature: 2800.0 },
        )
        .unwrap();
        assert_relative_eq!(curve.correction()[150], response(650.0), max_relative = 1e-12);

        // Same grid: dividing an experimental spectrum removes the response exactly.
        let experiment = lamp_measurement(response, 3200.0);
        let corrected = curve.apply(&experiment, DEFAULT_GRID_TOLERANCE_NM).unwrap();
        for (nm, v) in corrected.wavelength().iter().zip(corrected.intensity()) {
            assert_relative_eq!(*v, planck(*nm, 3200.0), max_relative = 1e-9);
        }
    }

    #[test]
    fn offset_grid_is_interpolated() {
        let curve = CalibrationCurve::from_reference(
            &lamp_measurement(|nm| nm, 2500.0),
            &LampReference::BlackBody { temperature: 2500.0 },
        )
        .unwrap();
        // nearest grid point within tolerance
        assert_relative_eq!(curve.correction_at(600.005, 0.01).unwrap(), 600.0);
        // halfway between 600 and 601
        assert_relative_eq!(curve.correction_at(600.5, 0.01).unwrap(), 600.5, max_relative = 1e-12);
    }

    #[test]
    fn samples_outside_the_grid_are_masked_not_dropped() {
        let curve = CalibrationCurve::from_reference(
            &lamp_measurement(|_| 2.0, 2500.0),
            &LampReference::BlackBody { temperature: 2500.0 },
        )
        .unwrap();
        let wl = grid(790.0, 5.0, 5); // 790..810, grid ends at 800
        let s = Spectrum::new(wl, vec![4.0; 5], SpectrumMeta::default()).unwrap();
        let out = curve.apply(&s, DEFAULT_GRID_TOLERANCE_NM).unwrap();

        assert_eq!(out.len(), 5);
        assert_eq!(out.mask(), Some(&[true, true, true, false, false][..]));
        assert!(out.intensity()[4].is_nan());
    }

    #[test]
    fn disjoint_grids_are_invalid() {
        let curve = CalibrationCurve::from_reference(
            &lamp_measurement(|_| 1.0, 2500.0),
            &LampReference::BlackBody { temperature: 2500.0 },
        )
        .unwrap();
        let s = Spectrum::new(grid(900.0, 1.0, 10), vec![1.0; 10], SpectrumMeta::default()).unwrap();
        assert!(matches!(curve.apply(&s, 0.01), Err(Error::InvalidCalibration(_))));
    }

    #[test]
    fn standard_lamp_spectrum_is_interpolated() {
        let standard =
            Spectrum::new(vec![400.0, 900.0], vec![1.0, 2.0], SpectrumMeta::default()).unwrap();
        let measured = Spectrum::new(vec![400.0, 650.0, 900.0], vec![3.0, 4.5, 6.0], SpectrumMeta::default()).unwrap();
        let curve = CalibrationCurve::from_reference(&measured, &LampReference::Standard(standard)).unwrap();
        for c in curve.correction() {
            assert_relative_eq!(*c, 3.0, max_relative = 1e-12);
        }
    }
}
