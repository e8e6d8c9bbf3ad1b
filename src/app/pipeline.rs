//! Shared acquisition pipeline used by every front-end command.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! read -> background -> calibration -> fit -> (record, publish)
//!
//! Calibration curves are loaded through the [`Session`] before any parallel
//! work starts; the two sides (and, for multi-frame files, the frames) are
//! then fitted independently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::background::Background;
use crate::calibration::{CalibrationCurve, LampReference};
use crate::config::{AcquisitionConfig, BackgroundConfig, BackgroundMode, SideConfig, TwoColorConfig};
use crate::domain::{CalibrationKey, FitResult, RowRange, Side, Spectrum};
use crate::error::{Error, PipelineError, Stage, StageContext};
use crate::fit::{TwoColorMap, fit_black_body, two_color_map};
use crate::io::datalog::DataLogRecord;
use crate::io::reference::read_reference;
use crate::io::result::{FitReport, SideReport, SpectrumCurve, TwoColorCurve};
use crate::io::spe::{SpeFile, read_spe};
use crate::publish::{PublishOutcome, PublishPolicy, TemperatureSink, publish_result};
use crate::session::Session;

/// SPE files record no amplifier gain.
const SPE_GAIN: f64 = 1.0;

/// Everything computed for one side of one frame.
#[derive(Debug, Clone)]
pub struct SideOutcome {
    pub result: FitResult,
    pub calibration: Arc<CalibrationCurve>,
    /// Background-subtracted, calibrated spectrum the fit saw.
    pub corrected: Spectrum,
    /// Integrated raw counts over the side's rows.
    pub counts: f64,
    pub two_color: Option<TwoColorMap>,
}

#[derive(Debug)]
pub struct SideRun {
    pub side: Side,
    pub outcome: Result<SideOutcome, PipelineError>,
}

/// Both sides of one frame.
#[derive(Debug)]
pub struct AcquisitionRun {
    pub frame: usize,
    pub sides: Vec<SideRun>,
}

impl AcquisitionRun {
    pub fn side(&self, side: Side) -> Option<&SideRun> {
        self.sides.iter().find(|s| s.side == side)
    }

    /// Results of the sides that succeeded, upstream first.
    pub fn results(&self) -> impl Iterator<Item = &FitResult> {
        self.sides.iter().filter_map(|s| s.outcome.as_ref().ok()).map(|o| &o.result)
    }

    pub fn errors(&self) -> impl Iterator<Item = &PipelineError> {
        self.sides.iter().filter_map(|s| s.outcome.as_ref().err())
    }

    pub fn to_report(&self, source: Option<PathBuf>) -> FitReport {
        let mut report = FitReport::new(source, Some(self.frame));
        for run in &self.sides {
            report.sides.push(match &run.outcome {
                Ok(outcome) => SideReport {
                    side: run.side,
                    result: Some(outcome.result.clone()),
                    error: None,
                    curve: Some(SpectrumCurve::from_fit(&outcome.corrected, &outcome.result)),
                    two_color: outcome.two_color.as_ref().map(TwoColorCurve::from),
                },
                Err(err) => SideReport {
                    side: run.side,
                    result: None,
                    error: Some(err.to_string()),
                    curve: None,
                    two_color: None,
                },
            });
        }
        report
    }

    /// Data log row for this frame of `data`.
    pub fn to_log_record(&self, data: &SpeFile) -> DataLogRecord {
        let outcome = |side| self.side(side).and_then(|s| s.outcome.as_ref().ok());
        let (us, ds) = (outcome(Side::Upstream), outcome(Side::Downstream));
        let finite = |v: f64| v.is_finite().then_some(v);
        let source = data.source.as_deref();
        DataLogRecord {
            file: source
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            frame: self.frame,
            path: source
                .and_then(Path::parent)
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            t_ds: ds.and_then(|o| finite(o.result.temperature)),
            t_us: us.and_then(|o| finite(o.result.temperature)),
            t_ds_error: ds.and_then(|o| finite(o.result.temperature_error)),
            t_us_error: us.and_then(|o| finite(o.result.temperature_error)),
            detector: data.detector.clone().unwrap_or_else(|| "unspecified".to_string()),
            exposure_time: data.exposure_time,
            gain: SPE_GAIN,
            scaling_ds: ds.map(|o| o.result.scale_factor),
            scaling_us: us.map(|o| o.result.scale_factor),
            counts_ds: ds.map(|o| o.counts),
            counts_us: us.map(|o| o.counts),
        }
    }
}

/// Every frame of a multi-frame file.
///
/// Sides whose calibration or background could not be prepared are reported
/// once in `setup_errors` and are absent from the per-frame runs.
#[derive(Debug)]
pub struct FrameSeries {
    pub setup_errors: Vec<PipelineError>,
    pub frames: Vec<AcquisitionRun>,
}

/// Background resolved as far as possible before the frame is known.
#[derive(Debug, Clone)]
enum PreparedBackground {
    Fixed(Background),
    InSitu { rows: RowRange, scale: f64 },
}

impl PreparedBackground {
    fn for_frame(&self, file: &SpeFile, frame: Option<usize>) -> Result<Background, Error> {
        match self {
            PreparedBackground::Fixed(bg) => Ok(bg.clone()),
            PreparedBackground::InSitu { rows, scale } => {
                let spectrum = match frame {
                    Some(frame) => file.spectrum(frame, Some(*rows))?,
                    None => file.averaged_spectrum(Some(*rows), None)?,
                };
                Ok(Background::per_pixel(spectrum).with_scale(*scale))
            }
        }
    }
}

/// Per-side inputs shared by every frame.
#[derive(Debug, Clone)]
struct SidePlan {
    side: Side,
    calibration: Arc<CalibrationCurve>,
    background: PreparedBackground,
}

fn prepare_background(
    config: &BackgroundConfig,
    side: Side,
    rows: Option<RowRange>,
) -> Result<PreparedBackground, PipelineError> {
    let bg = match config.mode {
        BackgroundMode::None => Background::none(),
        BackgroundMode::Scalar => Background::scalar(config.value),
        BackgroundMode::PerPixelFile => {
            let Some(path) = &config.path else {
                let err = Error::Config("per_pixel_file background needs a path".into());
                return Err(err).at(Stage::Background, Some(side));
            };
            let dark = read_spe(path)
                .and_then(|f| f.averaged_spectrum(rows, None))
                .at_path(Stage::Background, Some(side), path)?;
            Background::per_pixel(dark)
        }
        BackgroundMode::InSitu => {
            let Some(rows) = config.rows else {
                return Err(Error::Config("in_situ background needs rows".into())).at(Stage::Background, Some(side));
            };
            return Ok(PreparedBackground::InSitu {
                rows,
                scale: config.scale,
            });
        }
    };
    Ok(PreparedBackground::Fixed(bg.with_scale(config.scale)))
}

/// Calibration curve for `side`, from the session cache or built from the lamp file.
pub fn load_calibration(
    session: &mut Session,
    side: Side,
    config: &SideConfig,
) -> Result<Arc<CalibrationCurve>, PipelineError> {
    let Some(path) = &config.calibration_file else {
        let err = Error::InvalidCalibration("no calibration_file configured".into());
        return Err(err).at(Stage::Calibration, Some(side));
    };
    let key = CalibrationKey {
        path: path.clone(),
        temperature: config.calibration_temperature,
        rows: config.rows,
        standard: config.standard_spectrum_path.clone(),
    };
    session.calibration(side, &key, || build_calibration(side, config, &key))
}

fn build_calibration(side: Side, config: &SideConfig, key: &CalibrationKey) -> Result<CalibrationCurve, PipelineError> {
    info!("{side}: building calibration from {}", key.path.display());
    let lamp_file = read_spe(&key.path).at_path(Stage::Read, Some(side), &key.path)?;
    let measured = lamp_file
        .averaged_spectrum(config.rows, None)
        .at_path(Stage::Calibration, Some(side), &key.path)?;

    let background = prepare_background(&config.calibration_background, side, config.rows)?;
    let measured = background
        .for_frame(&lamp_file, None)
        .and_then(|bg| bg.subtract(&measured))
        .at_path(Stage::Background, Some(side), &key.path)?;

    let lamp = match &key.standard {
        Some(standard) => {
            let spectrum = read_reference(standard).at_path(Stage::Read, Some(side), standard)?;
            LampReference::Standard(spectrum)
        }
        None => LampReference::BlackBody {
            temperature: key.temperature,
        },
    };
    let curve = CalibrationCurve::from_reference(&measured, &lamp).at_path(Stage::Calibration, Some(side), &key.path)?;
    Ok(curve.with_key(key.clone()))
}

fn prepare_side(session: &mut Session, side: Side, config: &SideConfig) -> Result<SidePlan, PipelineError> {
    let calibration = load_calibration(session, side, config)?;
    let background = prepare_background(&config.background, side, config.rows)?;
    Ok(SidePlan {
        side,
        calibration,
        background,
    })
}

fn fit_side(
    plan: &SidePlan,
    config: &SideConfig,
    two_color: &TwoColorConfig,
    data: &SpeFile,
    frame: usize,
    previous: Option<f64>,
) -> Result<SideOutcome, PipelineError> {
    let side = plan.side;
    let source = data.source.as_deref();

    let raw = in_file(data.spectrum(frame, config.rows), Stage::Read, side, source)?.with_side(side);
    let counts = raw.total_counts();
    let peaks = in_file(data.column_peaks(frame, config.rows), Stage::Read, side, source)?;

    let corrected = plan
        .background
        .for_frame(data, Some(frame))
        .and_then(|bg| bg.subtract(&raw));
    let corrected = in_file(corrected, Stage::Background, side, source)?;
    let corrected = plan
        .calibration
        .apply(&corrected, config.grid_tolerance_nm)
        .at(Stage::Calibration, Some(side))?;

    let region = config.region();
    let fitted = fit_black_body(side, &corrected, Some(&peaks), region, &config.fit_options(previous));
    let mut result = in_file(fitted, Stage::Fit, side, source)?;
    result.calibration = plan.calibration.key().cloned();

    let two_color = if two_color.enabled {
        match two_color_map(&corrected, region, two_color.grid_points, two_color.pixel_delta) {
            Ok(map) => Some(map),
            Err(err) => {
                warn!("{side}: two-colour map skipped: {err}");
                None
            }
        }
    } else {
        None
    };

    Ok(SideOutcome {
        result,
        calibration: Arc::clone(&plan.calibration),
        corrected,
        counts,
        two_color,
    })
}

fn in_file<T>(result: Result<T, Error>, stage: Stage, side: Side, source: Option<&Path>) -> Result<T, PipelineError> {
    match source {
        Some(path) => result.at_path(stage, Some(side), path),
        None => result.at(stage, Some(side)),
    }
}

/// Fit both sides of one frame and record the successful results in `session`.
pub fn run_acquisition(
    session: &mut Session,
    config: &AcquisitionConfig,
    data: &SpeFile,
    frame: usize,
) -> AcquisitionRun {
    let plan_us = prepare_side(session, Side::Upstream, &config.upstream);
    let plan_ds = prepare_side(session, Side::Downstream, &config.downstream);
    let prev_us = session.previous_temperature(Side::Upstream);
    let prev_ds = session.previous_temperature(Side::Downstream);

    let fit = |plan: Result<SidePlan, PipelineError>, previous: Option<f64>| {
        plan.and_then(|plan| fit_side(&plan, config.side(plan.side), &config.two_color, data, frame, previous))
    };
    let (us, ds) = rayon::join(|| fit(plan_us, prev_us), || fit(plan_ds, prev_ds));

    let run = AcquisitionRun {
        frame,
        sides: vec![
            SideRun {
                side: Side::Upstream,
                outcome: us,
            },
            SideRun {
                side: Side::Downstream,
                outcome: ds,
            },
        ],
    };
    for result in run.results() {
        session.record(result);
    }
    for err in run.errors() {
        warn!("{err}");
    }
    run
}

/// Fit every frame of `data` in parallel.
///
/// Every frame is seeded from the session state at entry; the results of the
/// last frame are recorded afterwards.
pub fn fit_all_frames(session: &mut Session, config: &AcquisitionConfig, data: &SpeFile) -> FrameSeries {
    let mut setup_errors = Vec::new();
    let mut plans = Vec::new();
    for side in Side::BOTH {
        match prepare_side(session, side, config.side(side)) {
            Ok(plan) => plans.push((plan, session.previous_temperature(side))),
            Err(err) => {
                warn!("{err}");
                setup_errors.push(err);
            }
        }
    }

    debug!("fitting {} frame(s) for {} side(s)", data.frames.len(), plans.len());
    let frames: Vec<AcquisitionRun> = (0..data.frames.len())
        .into_par_iter()
        .map(|frame| AcquisitionRun {
            frame,
            sides: plans
                .iter()
                .map(|(plan, previous)| SideRun {
                    side: plan.side,
                    outcome: fit_side(plan, config.side(plan.side), &config.two_color, data, frame, *previous),
                })
                .collect(),
        })
        .collect();

    if let Some(last) = frames.last() {
        for result in last.results() {
            session.record(result);
        }
    }
    FrameSeries { setup_errors, frames }
}

/// Forward every successful result of `run` to `sink`.
pub fn publish_run(
    sink: &mut dyn TemperatureSink,
    run: &AcquisitionRun,
    policy: &PublishPolicy,
) -> Result<Vec<PublishOutcome>, PipelineError> {
    run.results()
        .map(|result| {
            publish_result(sink, result, policy)
                .map_err(Error::from)
                .at(Stage::Publish, Some(result.side))
        })
        .collect()
}

/// Read the data file named on the command line.
pub fn read_data(path: &Path) -> Result<SpeFile, PipelineError> {
    read_spe(path).at_path(Stage::Read, None, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SimulationOptions, simulate_acquisition};
    use crate::domain::FitMethod;
    use crate::io::datalog::{append_data_log, read_data_log};
    use crate::io::spe::write_spe;
    use crate::publish::MemorySink;
    use approx::assert_relative_eq;

    struct Fixture {
        dir: tempfile::TempDir,
        config: AcquisitionConfig,
        data: SpeFile,
        opts: SimulationOptions,
    }

    fn fixture(frames: usize) -> Fixture {
        let opts = SimulationOptions {
            frames,
            ..SimulationOptions::default()
        };
        let acq = simulate_acquisition(&opts).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let lamp_path = dir.path().join("lamp.spe");
        let data_path = dir.path().join("data.spe");
        write_spe(&lamp_path, &acq.lamp).unwrap();
        write_spe(&data_path, &acq.data).unwrap();

        let config = acq.layout.config(&lamp_path, opts.lamp_temperature);
        let data = read_data(&data_path).unwrap();
        Fixture {
            dir,
            config,
            data,
            opts,
        }
    }

    #[test]
    fn synthetic_acquisition_recovers_both_temperatures() {
        let fx = fixture(1);
        let mut session = Session::new();
        let run = run_acquisition(&mut session, &fx.config, &fx.data, 0);

        let us = &run.side(Side::Upstream).unwrap().outcome.as_ref().unwrap().result;
        let ds = &run.side(Side::Downstream).unwrap().outcome.as_ref().unwrap().result;
        assert_relative_eq!(us.temperature, fx.opts.upstream_temperature, max_relative = 0.01);
        assert_relative_eq!(ds.temperature, fx.opts.downstream_temperature, max_relative = 0.01);
        assert!(us.calibration.is_some());
        assert_eq!(session.previous_temperature(Side::Upstream), Some(us.temperature));
        // one lamp file, one row range per side
        assert_eq!(session.cached_calibrations(), 2);
    }

    #[test]
    fn one_failing_side_does_not_hide_the_other() {
        let mut fx = fixture(1);
        fx.config.downstream.calibration_file = Some(PathBuf::from("/nonexistent/lamp.spe"));
        let mut session = Session::new();
        let run = run_acquisition(&mut session, &fx.config, &fx.data, 0);

        assert!(run.side(Side::Upstream).unwrap().outcome.is_ok());
        let err = run.side(Side::Downstream).unwrap().outcome.as_ref().unwrap_err();
        assert_eq!(err.stage, Stage::Read);
        assert_eq!(err.side, Some(Side::Downstream));

        let report = run.to_report(None);
        assert!(report.side(Side::Downstream).unwrap().error.is_some());
        assert!(report.side(Side::Upstream).unwrap().curve.is_some());
    }

    #[test]
    fn calibrations_are_reused_across_acquisitions() {
        let fx = fixture(1);
        let mut session = Session::new();
        let first = run_acquisition(&mut session, &fx.config, &fx.data, 0);
        let second = run_acquisition(&mut session, &fx.config, &fx.data, 0);
        let a = &first.side(Side::Upstream).unwrap().outcome.as_ref().unwrap().calibration;
        let b = &second.side(Side::Upstream).unwrap().outcome.as_ref().unwrap().calibration;
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn every_frame_is_fitted() {
        let fx = fixture(3);
        let mut session = Session::new();
        let series = fit_all_frames(&mut session, &fx.config, &fx.data);
        assert!(series.setup_errors.is_empty());
        assert_eq!(series.frames.len(), 3);
        for (i, run) in series.frames.iter().enumerate() {
            assert_eq!(run.frame, i);
            assert_eq!(run.results().count(), 2);
        }
    }

    #[test]
    fn frame_out_of_range_is_a_read_error() {
        let fx = fixture(1);
        let mut session = Session::new();
        let run = run_acquisition(&mut session, &fx.config, &fx.data, 5);
        let err = run.side(Side::Upstream).unwrap().outcome.as_ref().unwrap_err();
        assert_eq!(err.stage, Stage::Read);
        assert!(matches!(err.source, Error::FrameOutOfRange { index: 5, frames: 1 }));
    }

    #[test]
    fn per_pixel_dark_file_is_averaged_and_subtracted() {
        let mut fx = fixture(1);
        let dark_path = fx.dir.path().join("dark.spe");
        let mut dark = fx.data.clone();
        for frame in &mut dark.frames {
            frame.data.fill(10.0);
        }
        write_spe(&dark_path, &dark).unwrap();

        let rows = fx.config.upstream.rows.unwrap().len() as f64;
        fx.config.upstream.background = BackgroundConfig {
            mode: BackgroundMode::PerPixelFile,
            path: Some(dark_path),
            ..BackgroundConfig::default()
        };
        fx.config.downstream.background = BackgroundConfig {
            mode: BackgroundMode::Scalar,
            value: 10.0 * rows,
            ..BackgroundConfig::default()
        };
        fx.config.downstream.rows = fx.config.upstream.rows;

        let run = run_acquisition(&mut Session::new(), &fx.config, &fx.data, 0);
        let us = &run.side(Side::Upstream).unwrap().outcome.as_ref().unwrap().corrected;
        let ds = &run.side(Side::Downstream).unwrap().outcome.as_ref().unwrap().corrected;
        for (a, b) in us.intensity().iter().zip(ds.intensity()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }

    #[test]
    fn missing_dark_file_is_a_background_error() {
        let mut fx = fixture(1);
        let dark_path = PathBuf::from("/nonexistent/dark.spe");
        fx.config.upstream.background = BackgroundConfig {
            mode: BackgroundMode::PerPixelFile,
            path: Some(dark_path.clone()),
            ..BackgroundConfig::default()
        };
        let run = run_acquisition(&mut Session::new(), &fx.config, &fx.data, 0);

        let err = run.side(Side::Upstream).unwrap().outcome.as_ref().unwrap_err();
        assert_eq!(err.stage, Stage::Background);
        assert_eq!(err.side, Some(Side::Upstream));
        assert_eq!(err.path.as_deref(), Some(dark_path.as_path()));
        assert!(matches!(err.source, Error::Io(_)));
        assert!(run.side(Side::Downstream).unwrap().outcome.is_ok());
    }

    #[test]
    fn wien_method_runs_through_the_pipeline() {
        let mut fx = fixture(1);
        fx.config.upstream.method = FitMethod::Wien;
        let run = run_acquisition(&mut Session::new(), &fx.config, &fx.data, 0);
        let report = run.to_report(None);

        let us = report.side(Side::Upstream).unwrap().result.as_ref().unwrap();
        assert_eq!(us.method, FitMethod::Wien);
        assert_eq!(us.iterations, 1);
        assert_relative_eq!(us.temperature, fx.opts.upstream_temperature, max_relative = 0.03);
        let ds = report.side(Side::Downstream).unwrap().result.as_ref().unwrap();
        assert_eq!(ds.method, FitMethod::Planck);
    }

    #[test]
    fn data_log_holds_one_row_per_acquisition() {
        let fx = fixture(1);
        let log_path = fx.dir.path().join("datalog.txt");
        let mut session = Session::new();
        let first = run_acquisition(&mut session, &fx.config, &fx.data, 0);
        append_data_log(&log_path, &[first.to_log_record(&fx.data)]).unwrap();

        let mut broken = fx.config.clone();
        broken.downstream.calibration_file = Some(PathBuf::from("/nonexistent/lamp.spe"));
        let second = run_acquisition(&mut session, &broken, &fx.data, 0);
        append_data_log(&log_path, &[second.to_log_record(&fx.data)]).unwrap();

        let rows = read_data_log(&log_path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].file, "data.spe");
        assert_eq!(rows[0].detector, "unspecified");
        assert_eq!(rows[0].exposure_time, fx.data.exposure_time);
        assert_relative_eq!(rows[0].t_us.unwrap(), fx.opts.upstream_temperature, max_relative = 0.01);
        assert!(rows[0].counts_us.unwrap() > 0.0);
        assert!(rows[0].counts_ds.unwrap() > 0.0);

        assert!(rows[1].t_us.is_some());
        assert_eq!(rows[1].t_ds, None);
        assert_eq!(rows[1].counts_ds, None);
    }

    #[test]
    fn results_without_timestamp_use_policy_fallback() {
        let fx = fixture(1);
        let mut session = Session::new();
        let run = run_acquisition(&mut session, &fx.config, &fx.data, 0);

        let mut sink = MemorySink::default();
        let none = publish_run(&mut sink, &run, &PublishPolicy::default()).unwrap();
        assert_eq!(none, vec![PublishOutcome::NoTimestamp; 2]);
        assert!(sink.records.is_empty());

        let stamp = chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let policy = PublishPolicy {
            error_limit: None,
            fallback_timestamp: Some(stamp),
        };
        publish_run(&mut sink, &run, &policy).unwrap();
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[0].side, Side::Upstream);
        assert_eq!(sink.records[0].timestamp, stamp);
    }
}
