//! Synthetic double-sided acquisitions.
//!
//! Produces an SPE data file and a matching lamp file as a 16-bit detector
//! would record them: black-body spectra shaped by a smooth instrument
//! response, a dark offset, and Gaussian read noise. The detector is split
//! into four row bands (upstream signal, upstream background, downstream
//! signal, downstream background) so every correction stage has real work
//! to do.

use std::path::Path;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::config::{AcquisitionConfig, BackgroundConfig, BackgroundMode};
use crate::domain::{RowRange, Side};
use crate::error::Error;
use crate::io::spe::{Frame, PixelType, SpeFile, SpeVersion, WavelengthCalibration};
use crate::math::planck;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    pub width: usize,
    pub height: usize,
    pub frames: usize,
    pub upstream_temperature: f64,
    pub downstream_temperature: f64,
    pub lamp_temperature: f64,
    /// Signal at the brightest pixel of each signal row.
    pub peak_counts: f64,
    pub dark_counts: f64,
    /// Read noise standard deviation (counts).
    pub noise: f64,
    pub wavelength_start: f64,
    pub wavelength_end: f64,
    pub seed: u64,
    pub version: SpeVersion,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            width: 512,
            height: 40,
            frames: 1,
            upstream_temperature: 2500.0,
            downstream_temperature: 2300.0,
            lamp_temperature: 2200.0,
            peak_counts: 30_000.0,
            dark_counts: 100.0,
            noise: 15.0,
            wavelength_start: 500.0,
            wavelength_end: 900.0,
            seed: 42,
            version: SpeVersion::V3,
        }
    }
}

/// Detector rows used by each band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowLayout {
    pub upstream: RowRange,
    pub upstream_background: RowRange,
    pub downstream: RowRange,
    pub downstream_background: RowRange,
}

impl RowLayout {
    pub fn for_height(height: usize) -> Self {
        let q = height / 4;
        Self {
            upstream: RowRange::new(0, q - 1),
            upstream_background: RowRange::new(q, 2 * q - 1),
            downstream: RowRange::new(2 * q, 3 * q - 1),
            downstream_background: RowRange::new(3 * q, 4 * q - 1),
        }
    }

    pub fn signal(&self, side: Side) -> RowRange {
        match side {
            Side::Upstream => self.upstream,
            Side::Downstream => self.downstream,
        }
    }

    pub fn background(&self, side: Side) -> RowRange {
        match side {
            Side::Upstream => self.upstream_background,
            Side::Downstream => self.downstream_background,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticAcquisition {
    pub data: SpeFile,
    pub lamp: SpeFile,
    pub layout: RowLayout,
}

impl RowLayout {
    /// Configuration fitting this layout: in-situ background rows for both
    /// the data and the lamp, lamp treated as a black body.
    pub fn config(&self, lamp_path: &Path, lamp_temperature: f64) -> AcquisitionConfig {
        let mut config = AcquisitionConfig::default();
        for side in Side::BOTH {
            let background = BackgroundConfig {
                mode: BackgroundMode::InSitu,
                rows: Some(self.background(side)),
                ..BackgroundConfig::default()
            };
            let cfg = config.side_mut(side);
            cfg.rows = Some(self.signal(side));
            cfg.calibration_file = Some(lamp_path.to_path_buf());
            cfg.calibration_temperature = lamp_temperature;
            cfg.calibration_background = background.clone();
            cfg.background = background;
        }
        config
    }
}

/// Smooth throughput of the optics and detector, peaking near 700 nm.
pub fn instrument_response(wavelength_nm: f64) -> f64 {
    let u = (wavelength_nm - 700.0) / 250.0;
    0.3 + 0.7 * (-u * u).exp()
}

pub fn simulate_acquisition(opts: &SimulationOptions) -> Result<SyntheticAcquisition, Error> {
    if opts.width < 2 || opts.height < 4 || opts.frames == 0 {
        return Err(Error::Config(format!(
            "simulation needs at least 2x4 pixels and one frame (got {}x{}, {} frame(s))",
            opts.width, opts.height, opts.frames
        )));
    }
    if !(opts.wavelength_end > opts.wavelength_start) {
        return Err(Error::Config("simulated wavelength range must be increasing".into()));
    }
    let normal = Normal::new(0.0, opts.noise.max(0.0))
        .map_err(|e| Error::Config(format!("noise distribution: {e}")))?;
    let mut rng = StdRng::seed_from_u64(opts.seed);

    let step = (opts.wavelength_end - opts.wavelength_start) / (opts.width - 1) as f64;
    // Pixel i (1-based) sits at start + step·(i − 1).
    let coefficients = [opts.wavelength_start - step, step, 0.0, 0.0, 0.0, 0.0];
    let calibration = WavelengthCalibration::Polynomial(coefficients);
    let wavelength = calibration.wavelengths(opts.width);
    let layout = RowLayout::for_height(opts.height);

    let us = shaped_signal(&wavelength, opts.upstream_temperature, opts.peak_counts);
    let ds = shaped_signal(&wavelength, opts.downstream_temperature, opts.peak_counts);
    let lamp = shaped_signal(&wavelength, opts.lamp_temperature, opts.peak_counts);

    let frames = (0..opts.frames)
        .map(|_| render_frame(opts, &layout, &us, &ds, &normal, &mut rng))
        .collect();
    let lamp_frames = vec![render_frame(opts, &layout, &lamp, &lamp, &normal, &mut rng)];

    let file = |frames: Vec<Frame>| SpeFile {
        version: opts.version,
        pixel_type: PixelType::U16,
        width: opts.width,
        height: opts.height,
        exposure_time: 0.1,
        acquired_at: None,
        calibration: calibration.clone(),
        detector: None,
        frames,
        source: None,
    };

    Ok(SyntheticAcquisition {
        data: file(frames),
        lamp: file(lamp_frames),
        layout,
    })
}

fn shaped_signal(wavelength: &[f64], temperature: f64, peak: f64) -> Vec<f64> {
    let raw: Vec<f64> = wavelength
        .iter()
        .map(|&nm| instrument_response(nm) * planck(nm, temperature))
        .collect();
    let max = raw.iter().copied().fold(f64::MIN_POSITIVE, f64::max);
    raw.into_iter().map(|v| peak * v / max).collect()
}

fn render_frame(
    opts: &SimulationOptions,
    layout: &RowLayout,
    upstream: &[f64],
    downstream: &[f64],
    normal: &Normal<f64>,
    rng: &mut StdRng,
) -> Frame {
    let mut data = Vec::with_capacity(opts.width * opts.height);
    for row in 0..opts.height {
        let signal = if (layout.upstream.start..=layout.upstream.end).contains(&row) {
            Some(upstream)
        } else if (layout.downstream.start..=layout.downstream.end).contains(&row) {
            Some(downstream)
        } else {
            None
        };
        for col in 0..opts.width {
            let clean = opts.dark_counts + signal.map_or(0.0, |s| s[col]);
            let noisy = clean + normal.sample(rng);
            data.push(noisy.round().clamp(0.0, u16::MAX as f64));
        }
    }
    Frame {
        width: opts.width,
        height: opts.height,
        data,
    }
}
