//! Temperature estimation.
//!
//! - Levenberg–Marquardt fit of Planck's law with grey or linear emissivity (`fitter`)
//! - closed-form Wien line fit (`wien`)
//! - two-colour temperature map (`two_color`)

pub mod fitter;
pub mod two_color;
pub mod wien;

pub use fitter::*;
pub use two_color::*;
pub use wien::*;

use crate::domain::{FitMethod, FitResult};
use crate::math::wien as wien_radiance;
use crate::models::predict;

/// Evaluate the fitted model of `result` at each wavelength (nm).
pub fn fitted_curve(result: &FitResult, wavelength: &[f64]) -> Vec<f64> {
    match result.method {
        FitMethod::Planck => {
            let mut params = vec![result.scale_factor, result.temperature];
            params.extend(result.emissivity_slope);
            let center = result.emissivity_center.unwrap_or(0.0);
            wavelength
                .iter()
                .map(|&nm| predict(result.emissivity, nm, &params, center))
                .collect()
        }
        FitMethod::Wien => wavelength
            .iter()
            .map(|&nm| result.scale_factor * wien_radiance(nm, result.temperature))
            .collect(),
    }
}
