//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the pipeline and fitting code stay clean and testable
//! - output changes are localized (the tests below pin the layout)

use crate::domain::{FitMethod, FitResult, Side};
use crate::io::result::{FitReport, SideReport, TwoColorCurve};
use crate::io::spe::{SpeFile, WavelengthCalibration};
use crate::publish::{PublishOutcome, TIMESTAMP_FORMAT};

/// Full summary of one acquisition: both sides, failures included.
pub fn format_report_summary(report: &FitReport) -> String {
    let mut out = String::new();

    out.push_str("=== radiant - black-body temperature fit ===\n");
    if let Some(source) = &report.source {
        out.push_str(&format!("Source: {}\n", source.display()));
    }
    if let Some(frame) = report.frame {
        out.push_str(&format!("Frame: {frame}\n"));
    }

    for side in Side::BOTH {
        let Some(side_report) = report.side(side) else {
            continue;
        };
        out.push('\n');
        out.push_str(&format_side(side_report));
    }

    if let (Some(us), Some(ds)) = (result_of(report, Side::Upstream), result_of(report, Side::Downstream)) {
        out.push_str(&format!("\nUS - DS: {:+.1} K\n", us.temperature - ds.temperature));
    }
    out
}

fn result_of(report: &FitReport, side: Side) -> Option<&FitResult> {
    report.side(side).and_then(|s| s.result.as_ref())
}

fn format_side(side_report: &SideReport) -> String {
    let mut out = format!("{}:\n", side_report.side.display_name());
    match (&side_report.result, &side_report.error) {
        (Some(result), _) => out.push_str(&format_result(result)),
        (None, Some(error)) => out.push_str(&format!("  FAILED: {error}\n")),
        (None, None) => out.push_str("  (not fitted)\n"),
    }
    if let Some(tc) = &side_report.two_color {
        out.push_str(&format_two_color(tc));
    }
    out
}

/// Indented block describing one result.
pub fn format_result(result: &FitResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "  T = {:.1} ± {} K\n",
        result.temperature,
        fmt_error(result.temperature_error)
    ));

    let method = match (result.method, result.emissivity_slope) {
        (FitMethod::Wien, _) => "Wien line".to_string(),
        (FitMethod::Planck, None) => "Planck, grey body".to_string(),
        (FitMethod::Planck, Some(b)) => format!("Planck, linear emissivity (slope {b:.4})"),
    };
    out.push_str(&format!("  model: {method}\n"));
    out.push_str(&format!(
        "  samples: {} in {} | rmse={:.4e} | iterations={}\n",
        result.samples, result.region, result.rmse, result.iterations
    ));
    out.push_str(&format!("  scale: {:.6e}\n", result.scale_factor));
    if let Some(key) = &result.calibration {
        let lamp = match &key.standard {
            Some(path) => format!("standard {}", path.display()),
            None => format!("{:.1} K", key.temperature),
        };
        out.push_str(&format!("  calibration: {} ({lamp})\n", key.path.display()));
    }
    if let Some(at) = result.acquired_at {
        out.push_str(&format!("  acquired: {}\n", at.format(TIMESTAMP_FORMAT)));
    }
    out
}

pub fn format_two_color(tc: &TwoColorCurve) -> String {
    let valid = tc.temperature.iter().flatten().count();
    format!(
        "  two-colour: mean={} K std={} K ({valid}/{} pairs, Δλ={:.1} nm)\n",
        tc.mean.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}")),
        tc.std_dev.map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}")),
        tc.temperature.len(),
        tc.delta_nm
    )
}

/// One line per frame, for `fit --all-frames`.
pub fn format_frame_table(reports: &[FitReport]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:>6} {:>18} {:>18}\n", "frame", "upstream (K)", "downstream (K)"));
    out.push_str(&format!("{:->6} {:->18} {:->18}\n", "", "", ""));
    for report in reports {
        let cell = |side| match report.side(side) {
            Some(SideReport { result: Some(r), .. }) => {
                format!("{:.1} ± {}", r.temperature, fmt_error(r.temperature_error))
            }
            Some(SideReport { error: Some(_), .. }) => "failed".to_string(),
            _ => "-".to_string(),
        };
        out.push_str(&format!(
            "{:>6} {:>18} {:>18}\n",
            report.frame.map_or_else(|| "-".to_string(), |f| f.to_string()),
            cell(Side::Upstream),
            cell(Side::Downstream)
        ));
    }
    out
}

pub fn format_publish_outcomes(outcomes: &[(Side, PublishOutcome)]) -> String {
    let mut out = String::new();
    for (side, outcome) in outcomes {
        let what = match outcome {
            PublishOutcome::Published => "published",
            PublishOutcome::Withheld => "withheld (error above limit)",
            PublishOutcome::NoTimestamp => "not published (no acquisition time)",
        };
        out.push_str(&format!("{}: {what}\n", side.display_name()));
    }
    out
}

/// Header and per-frame statistics of an SPE file, for `inspect`.
pub fn format_spe_summary(spe: &SpeFile, saturation_threshold: f64) -> String {
    let mut out = String::new();
    if let Some(source) = &spe.source {
        out.push_str(&format!("File: {}\n", source.display()));
    }
    out.push_str(&format!("Format: SPE {:?} | pixels: {:?}\n", spe.version, spe.pixel_type));
    out.push_str(&format!(
        "Detector: {} x {} (columns x rows) | frames: {}\n",
        spe.width,
        spe.height,
        spe.frames.len()
    ));
    if let Some(model) = &spe.detector {
        out.push_str(&format!("Camera: {model}\n"));
    }
    out.push_str(&format!("Exposure: {} s\n", spe.exposure_time));
    match spe.acquired_at {
        Some(at) => out.push_str(&format!("Acquired: {}\n", at.format(TIMESTAMP_FORMAT))),
        None => out.push_str("Acquired: (unknown)\n"),
    }

    let wl = spe.wavelengths();
    let calibration = match &spe.calibration {
        WavelengthCalibration::Polynomial(c) => format!("polynomial [{}]", fmt_vec(c)),
        WavelengthCalibration::Table(t) => format!("table ({} values)", t.len()),
    };
    out.push_str(&format!("Wavelength: {calibration}\n"));
    if let (Some(first), Some(last)) = (wl.first(), wl.last()) {
        out.push_str(&format!("  range: [{first:.2}, {last:.2}] nm\n"));
    }

    out.push_str(&format!(
        "\n{:>6} {:>12} {:>12} {:>12} {:>10}\n",
        "frame", "min", "max", "mean", "saturated"
    ));
    for (i, frame) in spe.frames.iter().enumerate() {
        let (min, max, sum) = frame
            .data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY, 0.0), |(lo, hi, s), &v| (lo.min(v), hi.max(v), s + v));
        let mean = if frame.data.is_empty() { 0.0 } else { sum / frame.data.len() as f64 };
        let saturated = frame.data.iter().filter(|&&v| v > saturation_threshold).count();
        out.push_str(&format!("{i:>6} {min:>12.1} {max:>12.1} {mean:>12.1} {saturated:>10}\n"));
    }
    out
}

fn fmt_error(err: f64) -> String {
    if err.is_finite() { format!("{err:.1}") } else { "n/a".to_string() }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CalibrationKey, Emissivity, FitRegion};
    use crate::io::spe::{Frame, PixelType, SpeVersion};

    fn result(side: Side, temperature: f64) -> FitResult {
        FitResult {
            side,
            temperature,
            temperature_error: 3.3,
            scale_factor: 1.5,
            emissivity_slope: None,
            emissivity_center: None,
            residual: 0.1,
            rmse: 0.01,
            iterations: 9,
            samples: 300,
            method: FitMethod::Planck,
            emissivity: Emissivity::Grey,
            region: FitRegion::new(550.0, 850.0).unwrap(),
            calibration: Some(CalibrationKey {
                path: "lamp.spe".into(),
                temperature: 2200.0,
                rows: None,
                standard: None,
            }),
            acquired_at: None,
        }
    }

    fn side_report(side: Side, outcome: Result<FitResult, &str>) -> SideReport {
        let (result, error) = match outcome {
            Ok(r) => (Some(r), None),
            Err(e) => (None, Some(e.to_string())),
        };
        SideReport {
            side,
            result,
            error,
            curve: None,
            two_color: None,
        }
    }

    #[test]
    fn summary_lists_both_sides_and_difference() {
        let mut report = FitReport::new(Some("run.spe".into()), Some(0));
        report.sides.push(side_report(Side::Upstream, Ok(result(Side::Upstream, 2510.0))));
        report.sides.push(side_report(Side::Downstream, Ok(result(Side::Downstream, 2490.5))));
        let txt = format_report_summary(&report);

        assert!(txt.contains("Upstream:\n  T = 2510.0 ± 3.3 K\n"), "{txt}");
        assert!(txt.contains("Downstream:\n  T = 2490.5 ± 3.3 K\n"), "{txt}");
        assert!(txt.contains("  samples: 300 in [550.0, 850.0] nm"), "{txt}");
        assert!(txt.contains("  calibration: lamp.spe (2200.0 K)"), "{txt}");
        assert!(txt.ends_with("\nUS - DS: +19.5 K\n"), "{txt}");
    }

    #[test]
    fn failed_side_is_reported_without_difference() {
        let mut report = FitReport::new(None, None);
        report.sides.push(side_report(Side::Upstream, Ok(result(Side::Upstream, 2500.0))));
        report.sides.push(side_report(Side::Downstream, Err("fit stage (Downstream): boom")));
        let txt = format_report_summary(&report);
        assert!(txt.contains("Downstream:\n  FAILED: fit stage (Downstream): boom\n"));
        assert!(!txt.contains("US - DS"));
    }

    #[test]
    fn frame_table_rows() {
        let mut report = FitReport::new(None, Some(2));
        report.sides.push(side_report(Side::Upstream, Ok(result(Side::Upstream, 2500.0))));
        report.sides.push(side_report(Side::Downstream, Err("boom")));
        let txt = format_frame_table(&[report]);
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], format!("{:>6} {:>18} {:>18}", 2, "2500.0 ± 3.3", "failed"));
    }

    #[test]
    fn spe_summary_counts_saturated_pixels() {
        let spe = SpeFile {
            version: SpeVersion::V2,
            pixel_type: PixelType::U16,
            width: 2,
            height: 1,
            exposure_time: 0.5,
            acquired_at: None,
            calibration: WavelengthCalibration::Polynomial([499.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
            detector: None,
            frames: vec![Frame {
                width: 2,
                height: 1,
                data: vec![100.0, 65535.0],
            }],
            source: None,
        };
        let txt = format_spe_summary(&spe, 65534.0);
        assert!(txt.contains("range: [500.00, 501.00] nm"), "{txt}");
        assert!(txt.ends_with(&format!("{:>6} {:>12.1} {:>12.1} {:>12.1} {:>10}\n", 0, 100.0, 65535.0, 32817.5, 1)));
    }
}
