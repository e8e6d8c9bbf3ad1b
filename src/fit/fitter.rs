//! Black-body fitting for a single spectrum.
//!
//! Given:
//! - a corrected spectrum (wavelength nm, intensity) with an optional usability mask
//! - the raw observed spectrum, for saturation checks
//! - a wavelength region
//!
//! we estimate the parameters of `A·ε(λ)·planck(λ, T)` by Levenberg–Marquardt:
//! - intensities are normalized by their peak and parameters by their seeds so
//!   every Jacobian column is of order one
//! - each step solves the damped system `[J; sqrt(λ)·D]·δ = [r; 0]` by SVD
//! - a step that increases the SSE or drives `T ≤ 0` is rejected and the
//!   damping raised tenfold; an accepted step lowers it tenfold
//!
//! Convergence is declared when the scaled step is below the tolerance
//! relative to the scaled parameter norm. Damping that overflows without such
//! a step is a failed fit, not a converged one.
//!
//! Cold starts are seeded from the Wien line fit, which lands within a few
//! percent of the Planck optimum.

use log::{debug, info};
use nalgebra::{DMatrix, DVector};

use crate::domain::{Emissivity, FitMethod, FitRegion, FitResult, Side, Spectrum};
use crate::error::Error;
use crate::fit::wien::fit_wien;
use crate::math::{normal_inverse, planck, solve_least_squares};
use crate::models::{fill_jacobian_row, predict};

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// Options that control a single fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub method: FitMethod,
    pub emissivity: Emissivity,
    /// Starting temperature (K).
    pub seed_temperature: f64,
    pub max_iterations: usize,
    /// Relative parameter-step tolerance.
    pub tolerance: f64,
    /// Samples whose observed value exceeds this are excluded.
    pub saturation_threshold: Option<f64>,
    /// Replace `seed_temperature` with the Wien estimate when one is available.
    pub wien_seed: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            method: FitMethod::Planck,
            emissivity: Emissivity::Grey,
            seed_temperature: 2000.0,
            max_iterations: 200,
            tolerance: 1e-6,
            saturation_threshold: None,
            wien_seed: true,
        }
    }
}

/// Usable samples inside a fit region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitSamples {
    pub wavelength: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl FitSamples {
    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }

    /// Midpoint of the covered wavelengths, the linear emissivity reference.
    pub fn center(&self) -> f64 {
        match (self.wavelength.first(), self.wavelength.last()) {
            (Some(a), Some(b)) => 0.5 * (a + b),
            _ => f64::NAN,
        }
    }
}

/// Collect the unmasked, finite samples of `spectrum` inside `region`.
pub fn select_samples(spectrum: &Spectrum, region: FitRegion) -> FitSamples {
    let mut samples = FitSamples::default();
    for (i, (&nm, &v)) in spectrum.wavelength().iter().zip(spectrum.intensity()).enumerate() {
        if region.contains(nm) && spectrum.is_usable(i) {
            samples.wavelength.push(nm);
            samples.intensity.push(v);
        }
    }
    samples
}

/// Mask every sample whose observed value exceeds `threshold`.
///
/// `observed` is the raw detector signal (for multi-row regions, the per-column
/// peak) on the same pixel grid as `spectrum`.
pub fn exclude_saturated(spectrum: &Spectrum, observed: &Spectrum, threshold: f64) -> Result<Spectrum, Error> {
    if observed.len() != spectrum.len() {
        return Err(Error::ShapeMismatch {
            expected: spectrum.len(),
            actual: observed.len(),
        });
    }
    let mask: Vec<bool> = observed.intensity().iter().map(|&v| !(v > threshold)).collect();
    let saturated = mask.iter().filter(|ok| !**ok).count();
    if saturated > 0 {
        info!("excluding {saturated} saturated sample(s) above {threshold}");
    }
    spectrum.with_mask(mask)
}

/// Fit a black body to `spectrum` over `region`.
///
/// `observed` is the raw signal used for saturation checks; when `None` the
/// spectrum itself is checked. The returned result carries no calibration key;
/// the caller attaches the one it used.
pub fn fit_black_body(
    side: Side,
    spectrum: &Spectrum,
    observed: Option<&Spectrum>,
    region: FitRegion,
    options: &FitOptions,
) -> Result<FitResult, Error> {
    let spectrum = match options.saturation_threshold {
        Some(threshold) => exclude_saturated(spectrum, observed.unwrap_or(spectrum), threshold)?,
        None => spectrum.clone(),
    };
    let samples = select_samples(&spectrum, region);
    let required = match options.method {
        FitMethod::Planck => options.emissivity.min_samples(),
        FitMethod::Wien => Emissivity::Grey.min_samples(),
    };
    if samples.len() < required {
        return Err(Error::EmptyRegion {
            region,
            samples: samples.len(),
            required,
        });
    }

    let acquired_at = spectrum.meta().acquired_at;
    let result = match options.method {
        FitMethod::Planck => {
            let fit = fit_planck(&samples, options)?;
            FitResult {
                side,
                temperature: fit.params[1],
                temperature_error: fit.temperature_error,
                scale_factor: fit.params[0],
                emissivity_slope: fit.params.get(2).copied(),
                emissivity_center: (options.emissivity == Emissivity::Linear).then_some(fit.center),
                residual: fit.sse.sqrt(),
                rmse: (fit.sse / samples.len() as f64).sqrt(),
                iterations: fit.iterations,
                samples: samples.len(),
                method: FitMethod::Planck,
                emissivity: options.emissivity,
                region,
                calibration: None,
                acquired_at,
            }
        }
        FitMethod::Wien => {
            let fit = fit_wien(&samples, region)?;
            FitResult {
                side,
                temperature: fit.temperature,
                temperature_error: fit.temperature_error,
                scale_factor: fit.scale_factor,
                emissivity_slope: None,
                emissivity_center: None,
                residual: fit.sse.sqrt(),
                rmse: (fit.sse / fit.samples as f64).sqrt(),
                iterations: 1,
                samples: fit.samples,
                method: FitMethod::Wien,
                emissivity: Emissivity::Grey,
                region,
                calibration: None,
                acquired_at,
            }
        }
    };

    info!(
        "{side}: T = {:.1} ± {:.1} K from {} samples in {} ({} iterations)",
        result.temperature, result.temperature_error, result.samples, region, result.iterations
    );
    Ok(result)
}

/// Converged Levenberg–Marquardt solution in physical units.
#[derive(Debug, Clone)]
pub struct PlanckFit {
    /// `[A, T]` or `[A, T, b]`.
    pub params: Vec<f64>,
    pub center: f64,
    pub sse: f64,
    pub temperature_error: f64,
    pub iterations: usize,
}

/// Levenberg–Marquardt fit of the configured emissivity model.
pub fn fit_planck(samples: &FitSamples, options: &FitOptions) -> Result<PlanckFit, Error> {
    let model = options.emissivity;
    let center = samples.center();

    let peak = samples.intensity.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let seed_t = if options.wien_seed {
        wien_seed(samples).unwrap_or(options.seed_temperature)
    } else {
        options.seed_temperature
    };
    let peak_model = samples
        .wavelength
        .iter()
        .map(|&nm| planck(nm, seed_t))
        .fold(f64::NEG_INFINITY, f64::max);
    if !(peak > 0.0 && peak.is_finite() && peak_model > 0.0 && seed_t > 0.0) {
        return Err(Error::FitDidNotConverge {
            iterations: 0,
            last_temperature: seed_t,
        });
    }

    // Work on intensities normalized to a unit peak.
    let y: Vec<f64> = samples.intensity.iter().map(|v| v / peak).collect();
    let mut seed = vec![1.0 / peak_model, seed_t];
    if model == Emissivity::Linear {
        seed.push(0.0);
    }
    let scale: Vec<f64> = seed.iter().map(|v| if *v != 0.0 { v.abs() } else { 1.0 }).collect();

    let problem = Problem {
        model,
        wavelength: &samples.wavelength,
        y: &y,
        center,
        scale: &scale,
    };
    let mut solution = problem.solve(seed, options)?;

    solution.params[0] *= peak;
    Ok(PlanckFit {
        params: solution.params,
        center,
        sse: solution.sse * peak * peak,
        temperature_error: solution.temperature_error,
        iterations: solution.iterations,
    })
}

fn wien_seed(samples: &FitSamples) -> Option<f64> {
    match fit_wien(samples, FitRegion::unbounded()) {
        Ok(fit) if fit.temperature.is_finite() && fit.temperature > 0.0 => {
            debug!("seeding Planck fit from Wien estimate {:.1} K", fit.temperature);
            Some(fit.temperature)
        }
        Ok(_) => None,
        Err(err) => {
            debug!("no Wien seed: {err}");
            None
        }
    }
}

struct Problem<'a> {
    model: Emissivity,
    wavelength: &'a [f64],
    y: &'a [f64],
    center: f64,
    scale: &'a [f64],
}

struct Solution {
    params: Vec<f64>,
    sse: f64,
    temperature_error: f64,
    iterations: usize,
}

impl Problem<'_> {
    fn solve(&self, mut params: Vec<f64>, options: &FitOptions) -> Result<Solution, Error> {
        let mut damping = INITIAL_DAMPING;
        let (mut jac, mut resid, mut sse) = self.linearize(&params);

        for iteration in 1..=options.max_iterations {
            let Some(step) = damped_step(&jac, &resid, damping) else {
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    debug!("damped system singular at T = {:.3} K", params[1]);
                    return Err(Error::FitDidNotConverge {
                        iterations: iteration,
                        last_temperature: params[1],
                    });
                }
                continue;
            };

            let q_norm = params
                .iter()
                .zip(self.scale)
                .map(|(p, s)| (p / s).powi(2))
                .sum::<f64>()
                .sqrt();
            let small = step.norm() <= options.tolerance * (q_norm + options.tolerance);

            let candidate: Vec<f64> = params
                .iter()
                .zip(step.iter())
                .zip(self.scale)
                .map(|((p, d), s)| p + d * s)
                .collect();
            let candidate_sse = if candidate[1] > 0.0 && candidate.iter().all(|v| v.is_finite()) {
                self.sse(&candidate)
            } else {
                f64::INFINITY
            };

            if candidate_sse <= sse {
                params = candidate;
                damping = (damping / 10.0).max(MIN_DAMPING);
                (jac, resid, sse) = self.linearize(&params);
                if small {
                    return Ok(self.finish(params, &jac, sse, iteration));
                }
            } else {
                if small {
                    return Ok(self.finish(params, &jac, sse, iteration));
                }
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    debug!("no downhill step at T = {:.3} K after {iteration} iterations", params[1]);
                    return Err(Error::FitDidNotConverge {
                        iterations: iteration,
                        last_temperature: params[1],
                    });
                }
            }
        }

        Err(Error::FitDidNotConverge {
            iterations: options.max_iterations,
            last_temperature: params[1],
        })
    }

    /// Scaled Jacobian, residual vector, and SSE at `params`.
    fn linearize(&self, params: &[f64]) -> (DMatrix<f64>, DVector<f64>, f64) {
        let n = self.wavelength.len();
        let k = params.len();
        let mut jac = DMatrix::<f64>::zeros(n, k);
        let mut resid = DVector::<f64>::zeros(n);
        let mut row = vec![0.0; k];

        for i in 0..n {
            let nm = self.wavelength[i];
            fill_jacobian_row(self.model, nm, params, self.center, &mut row);
            for j in 0..k {
                jac[(i, j)] = row[j] * self.scale[j];
            }
            resid[i] = self.y[i] - predict(self.model, nm, params, self.center);
        }

        let sse = resid.norm_squared();
        (jac, resid, sse)
    }

    fn sse(&self, params: &[f64]) -> f64 {
        let sse: f64 = self
            .wavelength
            .iter()
            .zip(self.y)
            .map(|(&nm, &y)| {
                let r = y - predict(self.model, nm, params, self.center);
                r * r
            })
            .sum();
        if sse.is_finite() { sse } else { f64::INFINITY }
    }

    /// 1σ temperature error from `s²·(JᵀJ)⁻¹` with `s² = SSE/(n − p)`.
    fn finish(&self, params: Vec<f64>, jac: &DMatrix<f64>, sse: f64, iterations: usize) -> Solution {
        let dof = jac.nrows().saturating_sub(jac.ncols()).max(1) as f64;
        let temperature_error = match normal_inverse(jac) {
            Some(inv) => (sse / dof * inv[(1, 1)]).max(0.0).sqrt() * self.scale[1],
            None => {
                debug!("JᵀJ is singular; temperature error unavailable");
                f64::NAN
            }
        };
        Solution {
            params,
            sse,
            temperature_error,
            iterations,
        }
    }
}

fn damped_step(jac: &DMatrix<f64>, resid: &DVector<f64>, damping: f64) -> Option<DVector<f64>> {
    let (n, k) = jac.shape();
    let mut a = DMatrix::<f64>::zeros(n + k, k);
    a.view_mut((0, 0), (n, k)).copy_from(jac);
    let root = damping.sqrt();
    for j in 0..k {
        let d = jac.column(j).norm();
        a[(n + j, j)] = root * if d > 0.0 { d } else { 1.0 };
    }
    let mut b = DVector::<f64>::zeros(n + k);
    b.rows_mut(0, n).copy_from(resid);
    solve_least_squares(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SpectrumMeta;
    use approx::assert_relative_eq;

    fn synthetic(scale: f64, t: f64, n: usize) -> Spectrum {
        let wl: Vec<f64> = (0..n).map(|i| 500.0 + 400.0 * i as f64 / (n - 1) as f64).collect();
        let y = wl.iter().map(|&nm| scale * planck(nm, t)).collect();
        Spectrum::new(wl, y, SpectrumMeta::default()).unwrap()
    }

    #[test]
    fn recovers_unit_scale_3000k_quickly() {
        let s = synthetic(1.0, 3000.0, 200);
        let r = fit_black_body(Side::Upstream, &s, None, FitRegion::unbounded(), &FitOptions::default()).unwrap();

        assert!((r.temperature - 3000.0).abs() < 1.0, "T = {}", r.temperature);
        assert_relative_eq!(r.scale_factor, 1.0, max_relative = 0.01);
        assert!(r.iterations < 50, "iterations = {}", r.iterations);
        assert_eq!(r.samples, 200);
        assert!(r.residual >= 0.0);
    }

    #[test]
    fn recovers_detector_scale_and_reports_error() {
        // Counts-like magnitude with a little structured noise.
        let clean = synthetic(2.0e-9, 2400.0, 150);
        let noisy: Vec<f64> = clean
            .intensity()
            .iter()
            .enumerate()
            .map(|(i, v)| v * (1.0 + 0.002 * ((i as f64) * 0.7).sin()))
            .collect();
        let s = clean.with_intensity(noisy).unwrap();

        let r = fit_black_body(Side::Downstream, &s, None, FitRegion::unbounded(), &FitOptions::default()).unwrap();
        assert_relative_eq!(r.temperature, 2400.0, max_relative = 0.01);
        assert!(r.temperature_error.is_finite() && r.temperature_error > 0.0);
    }

    #[test]
    fn too_few_samples_is_empty_region() {
        let s = synthetic(1.0, 3000.0, 200);
        // ~2 nm between samples: a 3 nm window holds at most 2.
        let region = FitRegion::new(600.0, 603.0).unwrap();
        let err = fit_black_body(Side::Upstream, &s, None, region, &FitOptions::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyRegion { required: 3, .. }), "{err}");

        let opts = FitOptions {
            emissivity: Emissivity::Linear,
            ..FitOptions::default()
        };
        let region = FitRegion::new(600.0, 606.5).unwrap();
        let err = fit_black_body(Side::Upstream, &s, None, region, &opts).unwrap_err();
        assert!(matches!(err, Error::EmptyRegion { samples: 3, required: 4, .. }), "{err}");
    }

    #[test]
    fn saturated_samples_are_excluded() {
        let s = synthetic(1.0, 3000.0, 100);
        // Clip the top of the spectrum as a saturated detector would.
        let observed: Vec<f64> = (0..100).map(|i| if i > 80 { 70_000.0 } else { 1_000.0 }).collect();
        let observed = s.with_intensity(observed).unwrap();
        let corrupted: Vec<f64> = s
            .intensity()
            .iter()
            .enumerate()
            .map(|(i, v)| if i > 80 { v * 0.5 } else { *v })
            .collect();
        let corrupted = s.with_intensity(corrupted).unwrap();

        let opts = FitOptions {
            saturation_threshold: Some(65_000.0),
            ..FitOptions::default()
        };
        let r = fit_black_body(Side::Upstream, &corrupted, Some(&observed), FitRegion::unbounded(), &opts).unwrap();
        assert_eq!(r.samples, 81);
        assert!((r.temperature - 3000.0).abs() < 1.0);
    }

    #[test]
    fn linear_emissivity_recovers_slope() {
        let wl: Vec<f64> = (0..120).map(|i| 550.0 + 3.0 * i as f64).collect();
        let center = 0.5 * (wl[0] + wl[119]);
        let params = [1.0, 2600.0, 0.15];
        let y = wl
            .iter()
            .map(|&nm| predict(Emissivity::Linear, nm, &params, center))
            .collect();
        let s = Spectrum::new(wl, y, SpectrumMeta::default()).unwrap();

        let opts = FitOptions {
            emissivity: Emissivity::Linear,
            seed_temperature: 2500.0,
            ..FitOptions::default()
        };
        let r = fit_black_body(Side::Upstream, &s, None, FitRegion::unbounded(), &opts).unwrap();
        assert_relative_eq!(r.temperature, 2600.0, max_relative = 1e-3);
        assert_relative_eq!(r.emissivity_slope.unwrap(), 0.15, epsilon = 1e-3);
        assert_relative_eq!(r.emissivity_center.unwrap(), center);
    }

    #[test]
    fn iteration_cap_is_enforced() {
        let s = synthetic(1.0, 3000.0, 50);
        let opts = FitOptions {
            max_iterations: 1,
            wien_seed: false,
            ..FitOptions::default()
        };
        let err = fit_black_body(Side::Upstream, &s, None, FitRegion::unbounded(), &opts).unwrap_err();
        assert!(matches!(err, Error::FitDidNotConverge { iterations: 1, .. }));
    }

    #[test]
    fn cold_seed_converges_through_wien_estimate() {
        for t in [1200.0, 3000.0] {
            let s = synthetic(1.0, t, 200);
            let opts = FitOptions {
                seed_temperature: 800.0,
                ..FitOptions::default()
            };
            let r = fit_black_body(Side::Upstream, &s, None, FitRegion::unbounded(), &opts).unwrap();
            assert_relative_eq!(r.temperature, t, max_relative = 1e-4);
            assert!(r.iterations < 30, "{t} K took {} iterations", r.iterations);
        }
    }

    #[test]
    fn stalled_fit_is_not_reported_as_converged() {
        let clean = synthetic(1.0, 2400.0, 150);
        let noisy: Vec<f64> = clean
            .intensity()
            .iter()
            .enumerate()
            .map(|(i, v)| v * (1.0 + 0.01 * ((i as f64) * 1.3).sin()))
            .collect();
        let s = clean.with_intensity(noisy).unwrap();
        // A zero tolerance can only be met by an exactly zero step.
        let opts = FitOptions {
            tolerance: 0.0,
            ..FitOptions::default()
        };
        let err = fit_black_body(Side::Upstream, &s, None, FitRegion::unbounded(), &opts).unwrap_err();
        assert!(matches!(err, Error::FitDidNotConverge { .. }), "{err}");
    }
}
