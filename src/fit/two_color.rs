//! Two-colour pyrometry.
//!
//! The spectrum is resampled onto an even grid and every sample is paired with
//! the one `delta` grid steps to its red side. Under Wien's approximation the
//! intensity ratio of a pair fixes the temperature independent of the scale:
//!
//! ```text
//! T = C2·(1/λ2 − 1/λ1) / (y1 − y2),    y = ln(I·λ^5/C1)
//! ```
//!
//! A flat map indicates a grey emitter; structure indicates wavelength-dependent
//! emissivity or stray light.

use serde::{Deserialize, Serialize};

use crate::domain::{FitRegion, Spectrum};
use crate::error::Error;
use crate::fit::fitter::select_samples;
use crate::math::{interp_linear, linspace, wien_coordinates};

pub const DEFAULT_GRID_POINTS: usize = 1024;
pub const DEFAULT_PIXEL_DELTA: usize = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoColorMap {
    /// Blue wavelength of each pair (nm).
    pub wavelength: Vec<f64>,
    /// Kelvin; NaN where either intensity is non-positive.
    pub temperature: Vec<f64>,
    /// Wavelength separation of each pair (nm).
    pub delta_nm: f64,
    pub mean: f64,
    pub std_dev: f64,
}

pub fn two_color_map(
    spectrum: &Spectrum,
    region: FitRegion,
    grid_points: usize,
    delta: usize,
) -> Result<TwoColorMap, Error> {
    if delta == 0 || grid_points <= delta {
        return Err(Error::Config(format!(
            "two-colour pair distance {delta} must be between 1 and the grid size {grid_points}"
        )));
    }
    let samples = select_samples(spectrum, region);
    if samples.len() < 2 {
        return Err(Error::EmptyRegion {
            region,
            samples: samples.len(),
            required: 2,
        });
    }

    let (first, last) = (samples.wavelength[0], samples.wavelength[samples.len() - 1]);
    let grid = linspace(first, last, grid_points);
    let resampled: Vec<f64> = grid
        .iter()
        .map(|&nm| interp_linear(&samples.wavelength, &samples.intensity, nm).unwrap_or(f64::NAN))
        .collect();

    let pairs = grid_points - delta;
    let mut wavelength = Vec::with_capacity(pairs);
    let mut temperature = Vec::with_capacity(pairs);
    for i in 0..pairs {
        let (l1, l2) = (grid[i], grid[i + delta]);
        let (i1, i2) = (resampled[i], resampled[i + delta]);
        wavelength.push(l1);
        temperature.push(pair_temperature(l1, i1, l2, i2));
    }

    let (mean, std_dev) = mean_std(&temperature);
    Ok(TwoColorMap {
        wavelength,
        temperature,
        delta_nm: grid[delta] - grid[0],
        mean,
        std_dev,
    })
}

fn pair_temperature(l1: f64, i1: f64, l2: f64, i2: f64) -> f64 {
    if !(i1 > 0.0 && i2 > 0.0) {
        return f64::NAN;
    }
    let (x1, y1) = wien_coordinates(l1, i1);
    let (x2, y2) = wien_coordinates(l2, i2);
    // x = C2/λ, so x2 − x1 = C2·(1/λ2 − 1/λ1)
    let t = (x2 - x1) / (y1 - y2);
    if t.is_finite() && t > 0.0 { t } else { f64::NAN }
}

/// Mean and population standard deviation of the finite values.
fn mean_std(values: &[f64]) -> (f64, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SpectrumMeta;
    use crate::math::{planck, wien};
    use approx::assert_relative_eq;

    fn spectrum(f: impl Fn(f64) -> f64) -> Spectrum {
        let wl: Vec<f64> = (0..400).map(|i| 500.0 + i as f64).collect();
        let y = wl.iter().map(|&nm| f(nm)).collect();
        Spectrum::new(wl, y, SpectrumMeta::default()).unwrap()
    }

    #[test]
    fn wien_spectrum_gives_flat_map() {
        let s = spectrum(|nm| 7.0 * wien(nm, 2300.0));
        let map = two_color_map(&s, FitRegion::unbounded(), DEFAULT_GRID_POINTS, DEFAULT_PIXEL_DELTA).unwrap();
        assert_eq!(map.temperature.len(), DEFAULT_GRID_POINTS - DEFAULT_PIXEL_DELTA);
        // Linear resampling of an exponential adds a small bias.
        assert_relative_eq!(map.mean, 2300.0, max_relative = 1e-3);
        assert!(map.std_dev < 5.0, "std = {}", map.std_dev);
        assert_relative_eq!(map.delta_nm, 399.0 * 150.0 / 1023.0, max_relative = 1e-12);
    }

    #[test]
    fn planck_spectrum_stays_close() {
        let s = spectrum(|nm| planck(nm, 2000.0));
        let map = two_color_map(&s, FitRegion::unbounded(), 512, 64).unwrap();
        assert_relative_eq!(map.mean, 2000.0, max_relative = 0.01);
    }

    #[test]
    fn zero_intensity_pairs_are_nan() {
        let s = spectrum(|nm| if nm < 600.0 { 0.0 } else { wien(nm, 2000.0) });
        let map = two_color_map(&s, FitRegion::unbounded(), 400, 50).unwrap();
        assert!(map.temperature[0].is_nan());
        assert!(map.mean.is_finite());
    }

    #[test]
    fn rejects_bad_pair_distance() {
        let s = spectrum(|nm| wien(nm, 2000.0));
        assert!(matches!(
            two_color_map(&s, FitRegion::unbounded(), 100, 100),
            Err(Error::Config(_))
        ));
    }
}
