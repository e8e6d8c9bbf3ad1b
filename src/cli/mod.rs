//! Command-line parsing for the black-body temperature fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline and the fitting code.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};

use crate::domain::{Emissivity, FitMethod};
use crate::io::spe::SpeVersion;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "radiant", version, about = "Black-body temperature fits for double-sided heating spectra")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit upstream and downstream temperatures of an SPE acquisition.
    Fit(FitArgs),
    /// Print the header and per-frame statistics of an SPE file.
    Inspect(InspectArgs),
    /// Write a synthetic acquisition, its lamp file, and a matching config.
    Simulate(SimulateArgs),
    /// Plot a previously exported fit report.
    Plot(PlotArgs),
}

/// Options for `radiant fit`.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// SPE data file.
    #[arg(value_name = "SPE")]
    pub data: PathBuf,

    /// Acquisition configuration (JSON). Defaults to $RADIANT_CONFIG.
    #[arg(short = 'c', long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Frame to fit.
    #[arg(long, default_value_t = 0)]
    pub frame: usize,

    /// Fit every frame in parallel and print one line per frame.
    #[arg(long, conflicts_with_all = ["frame", "export_json", "export_txt"])]
    pub all_frames: bool,

    #[command(flatten)]
    pub overrides: FitOverrides,

    /// Compute the two-colour temperature map as well.
    #[arg(long)]
    pub two_color: bool,

    /// Acquisition time used for publication when the file carries none.
    #[arg(long, value_name = "YYYY-MM-DDTHH:MM:SS", value_parser = parse_timestamp)]
    pub timestamp: Option<NaiveDateTime>,

    /// Do not forward results to the configured temperature log.
    #[arg(long)]
    pub no_publish: bool,

    /// Render ASCII plots of both sides.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export the fit report (results + curves) to JSON.
    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Export per-side text files `<stem>_us.txt` and `<stem>_ds.txt`.
    #[arg(long = "export-txt", value_name = "PATH")]
    pub export_txt: Option<PathBuf>,
}

/// Settings applied to both sides on top of the configuration file.
#[derive(Debug, Args, Clone, Default)]
pub struct FitOverrides {
    /// Fit method.
    #[arg(long, value_enum)]
    pub method: Option<FitMethod>,

    /// Emissivity model.
    #[arg(long, value_enum)]
    pub emissivity: Option<Emissivity>,

    /// Lower end of the fit region (nm).
    #[arg(long, requires = "end_nm")]
    pub start_nm: Option<f64>,

    /// Upper end of the fit region (nm).
    #[arg(long, requires = "start_nm")]
    pub end_nm: Option<f64>,

    /// Iteration cap of the non-linear fit.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Lamp temperature (K) for both calibrations.
    #[arg(long)]
    pub calibration_temperature: Option<f64>,
}

/// Options for `radiant inspect`.
#[derive(Debug, Parser)]
pub struct InspectArgs {
    #[arg(value_name = "SPE")]
    pub file: PathBuf,

    /// Counts above this are reported as saturated.
    #[arg(long, default_value_t = crate::config::DEFAULT_SATURATION_THRESHOLD)]
    pub saturation: f64,
}

/// Options for `radiant simulate`.
#[derive(Debug, Parser)]
pub struct SimulateArgs {
    /// Output directory (created if missing).
    #[arg(short = 'o', long, default_value = ".")]
    pub out_dir: PathBuf,

    /// File name stem of the data file.
    #[arg(long, default_value = "synthetic")]
    pub name: String,

    #[arg(long, default_value_t = 2500.0)]
    pub upstream: f64,

    #[arg(long, default_value_t = 2300.0)]
    pub downstream: f64,

    /// Calibration lamp temperature (K).
    #[arg(long, default_value_t = 2200.0)]
    pub lamp: f64,

    #[arg(long, default_value_t = 1)]
    pub frames: usize,

    /// Read noise standard deviation (counts).
    #[arg(long, default_value_t = 15.0)]
    pub noise: f64,

    /// Random seed for reproducible noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Write SPE v2 instead of v3.
    #[arg(long)]
    pub v2: bool,
}

impl SimulateArgs {
    pub fn version(&self) -> SpeVersion {
        if self.v2 { SpeVersion::V2 } else { SpeVersion::V3 }
    }
}

/// Options for plotting a saved report.
#[derive(Debug, Parser)]
pub struct PlotArgs {
    /// Report JSON produced by `radiant fit --export-json`.
    #[arg(value_name = "JSON")]
    pub report: PathBuf,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map_err(|e| format!("expected YYYY-MM-DDTHH:MM:SS: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fit_overrides_parse() {
        let cli = Cli::parse_from([
            "radiant", "fit", "run.spe", "--method", "wien", "--start-nm", "550", "--end-nm", "850",
            "--timestamp", "2026-03-01T12:00:00",
        ]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.overrides.method, Some(FitMethod::Wien));
        assert_eq!(args.overrides.start_nm, Some(550.0));
        assert!(args.timestamp.is_some());
    }

    #[test]
    fn region_bounds_come_in_pairs() {
        let err = Cli::try_parse_from(["radiant", "fit", "run.spe", "--start-nm", "550"]);
        assert!(err.is_err());
    }

    #[test]
    fn all_frames_excludes_exports() {
        let err = Cli::try_parse_from(["radiant", "fit", "run.spe", "--all-frames", "--export-json", "r.json"]);
        assert!(err.is_err());
    }
}
