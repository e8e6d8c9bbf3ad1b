//! Closed-form temperature from Wien's approximation.
//!
//! In Wien coordinates `x = C2/λ`, `y = ln(I·λ^5/C1)` a grey body is the line
//! `y = ln A − x/T`, so an ordinary least squares line gives `T = −1/slope`.
//! Accurate when `λT` is well below `C2` (visible light below ~3000 K).

use nalgebra::{DMatrix, DVector};

use crate::domain::FitRegion;
use crate::error::Error;
use crate::fit::fitter::FitSamples;
use crate::math::{normal_inverse, solve_least_squares, wien, wien_coordinates};

#[derive(Debug, Clone, PartialEq)]
pub struct WienFit {
    pub temperature: f64,
    pub temperature_error: f64,
    pub scale_factor: f64,
    /// SSE of the back-transformed model in intensity units.
    pub sse: f64,
    /// Positive-intensity samples actually used.
    pub samples: usize,
}

pub fn fit_wien(samples: &FitSamples, region: FitRegion) -> Result<WienFit, Error> {
    // The logarithm needs positive radiance.
    let points: Vec<(f64, f64, f64, f64)> = samples
        .wavelength
        .iter()
        .zip(&samples.intensity)
        .filter(|(_, v)| **v > 0.0)
        .map(|(&nm, &v)| {
            let (x, y) = wien_coordinates(nm, v);
            (nm, v, x, y)
        })
        .collect();
    let n = points.len();
    if n < 3 {
        return Err(Error::EmptyRegion {
            region,
            samples: n,
            required: 3,
        });
    }

    let mut design = DMatrix::<f64>::zeros(n, 2);
    let mut target = DVector::<f64>::zeros(n);
    for (i, &(_, _, x, y)) in points.iter().enumerate() {
        design[(i, 0)] = 1.0;
        design[(i, 1)] = x;
        target[i] = y;
    }

    let not_converged = |t: f64| Error::FitDidNotConverge {
        iterations: 1,
        last_temperature: t,
    };
    let beta = solve_least_squares(&design, &target).ok_or_else(|| not_converged(f64::NAN))?;
    let (intercept, slope) = (beta[0], beta[1]);
    let temperature = -1.0 / slope;
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(not_converged(temperature));
    }

    // Slope standard error from the line fit, propagated through T = −1/m.
    let line_sse = (target - &design * &beta).norm_squared();
    let slope_error = normal_inverse(&design)
        .map(|inv| (line_sse / (n - 2) as f64 * inv[(1, 1)]).max(0.0).sqrt())
        .unwrap_or(f64::NAN);
    let temperature_error = slope_error / (slope * slope);

    let scale_factor = intercept.exp();
    let sse = points
        .iter()
        .map(|&(nm, v, _, _)| {
            let r = v - scale_factor * wien(nm, temperature);
            r * r
        })
        .sum();

    Ok(WienFit {
        temperature,
        temperature_error,
        scale_factor,
        sse,
        samples: n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fit_wien_all(samples: &FitSamples) -> Result<WienFit, Error> {
        fit_wien(samples, FitRegion::unbounded())
    }

    fn samples(f: impl Fn(f64) -> f64) -> FitSamples {
        let wavelength: Vec<f64> = (0..100).map(|i| 550.0 + 3.0 * i as f64).collect();
        let intensity = wavelength.iter().map(|&nm| f(nm)).collect();
        FitSamples { wavelength, intensity }
    }

    #[test]
    fn exact_on_wien_spectra() {
        let fit = fit_wien_all(&samples(|nm| 3.5 * wien(nm, 2100.0))).unwrap();
        assert_relative_eq!(fit.temperature, 2100.0, max_relative = 1e-7);
        assert_relative_eq!(fit.scale_factor, 3.5, max_relative = 1e-6);
        assert!(fit.temperature_error < 1e-3);
    }

    #[test]
    fn close_to_planck_at_moderate_temperatures() {
        let fit = fit_wien_all(&samples(|nm| crate::math::planck(nm, 2000.0))).unwrap();
        assert_relative_eq!(fit.temperature, 2000.0, max_relative = 0.01);
    }

    #[test]
    fn non_positive_samples_are_skipped() {
        let mut s = samples(|nm| wien(nm, 1800.0));
        s.intensity[0] = 0.0;
        s.intensity[1] = -5.0;
        let fit = fit_wien_all(&s).unwrap();
        assert_eq!(fit.samples, 98);
    }
}
