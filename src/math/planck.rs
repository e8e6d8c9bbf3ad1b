//! Black-body radiation in wavelength form.
//!
//! - `planck(λ, T) = C1 / (λ^5 · (exp(C2/(λT)) − 1))`
//! - Wien limit: `C1 / λ^5 · exp(−C2/(λT))`
//!
//! Wavelengths are taken in nm and converted to metres internally.
//!
//! Numerical notes:
//! - For large `λT` the exponent `x = C2/(λT)` is small and `exp(x) − 1` loses
//!   precision; `exp_m1` keeps it.
//! - For very small `λT` the denominator overflows to infinity and the
//!   radiance correctly underflows to `0`.

/// First radiation constant `2πhc²` (W·m²).
pub const C1: f64 = 3.7418e-16;

/// Second radiation constant `hc/k` (m·K).
pub const C2: f64 = 0.014388;

const NM: f64 = 1e-9;

/// Spectral radiance at `wavelength_nm` for a black body at `temperature` K.
pub fn planck(wavelength_nm: f64, temperature: f64) -> f64 {
    let lambda = wavelength_nm * NM;
    let x = C2 / (lambda * temperature);
    C1 / (lambda.powi(5) * x.exp_m1())
}

/// `∂ planck / ∂T` expressed relative to the radiance: `(1/P)·∂P/∂T`.
///
/// Equals `x·e^x / ((e^x − 1)·T)` with `x = C2/(λT)`, evaluated as
/// `x / ((1 − e^{-x})·T)` so it stays finite when `e^x` overflows.
pub fn planck_log_derivative(wavelength_nm: f64, temperature: f64) -> f64 {
    let lambda = wavelength_nm * NM;
    let x = C2 / (lambda * temperature);
    x / (-(-x).exp_m1() * temperature)
}

/// Wien approximation of Planck's law.
pub fn wien(wavelength_nm: f64, temperature: f64) -> f64 {
    let lambda = wavelength_nm * NM;
    C1 / lambda.powi(5) * (-C2 / (lambda * temperature)).exp()
}

/// Transform a (wavelength, radiance) sample to Wien coordinates.
///
/// Returns `(C2/λ, ln(I·λ^5/C1))`; in these coordinates a grey body at `T`
/// is the straight line `y = ln A − x/T`.
pub fn wien_coordinates(wavelength_nm: f64, radiance: f64) -> (f64, f64) {
    let lambda = wavelength_nm * NM;
    (C2 / lambda, (radiance * lambda.powi(5) / C1).ln())
}
