//! Model evaluation for the grey-body and linear-emissivity models.
//!
//! The fitter relies on two primitive operations:
//! - build a Jacobian row for a given wavelength and parameters (for each LM step)
//! - predict the radiance given parameters (for residuals, plots, and exports)
//!
//! Parameter layout: `[A, T]` for [`Emissivity::Grey`], `[A, T, b]` for
//! [`Emissivity::Linear`]. `center_nm` is the reference wavelength `λc` of the
//! linear emissivity term and is ignored by the grey model.

use crate::domain::Emissivity;
use crate::math::{planck, planck_log_derivative};

/// Relative emissivity `ε(λ)` for the given model.
pub fn emissivity(model: Emissivity, wavelength_nm: f64, params: &[f64], center_nm: f64) -> f64 {
    match model {
        Emissivity::Grey => 1.0,
        Emissivity::Linear => 1.0 + params[2] * (wavelength_nm - center_nm) / center_nm,
    }
}

/// Predict the radiance `A·ε(λ)·planck(λ, T)`.
pub fn predict(model: Emissivity, wavelength_nm: f64, params: &[f64], center_nm: f64) -> f64 {
    let (scale, temperature) = (params[0], params[1]);
    scale * emissivity(model, wavelength_nm, params, center_nm) * planck(wavelength_nm, temperature)
}

/// Fill the partial derivatives of [`predict`] with respect to each parameter.
///
/// # Panics
/// Panics if `out` or `params` are shorter than `model.param_count()`.
pub fn fill_jacobian_row(
    model: Emissivity,
    wavelength_nm: f64,
    params: &[f64],
    center_nm: f64,
    out: &mut [f64],
) {
    let (scale, temperature) = (params[0], params[1]);
    let p = planck(wavelength_nm, temperature);
    let eps = emissivity(model, wavelength_nm, params, center_nm);

    out[0] = eps * p;
    out[1] = scale * eps * p * planck_log_derivative(wavelength_nm, temperature);
    if model == Emissivity::Linear {
        out[2] = scale * p * (wavelength_nm - center_nm) / center_nm;
    }
}
