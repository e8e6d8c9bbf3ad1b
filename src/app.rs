//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - resolves the acquisition configuration
//! - runs the shared pipeline
//! - prints reports/plots, writes exports, and publishes temperatures

use std::fs;
use std::path::Path;

use clap::Parser;
use log::info;

use crate::cli::{Command, FitArgs, FitOverrides, InspectArgs, PlotArgs, SimulateArgs};
use crate::config::{AcquisitionConfig, RegionConfig};
use crate::domain::Side;
use crate::error::{AppError, Error};
use crate::io::datalog::append_data_log;
use crate::io::result::{FitReport, read_report_json, write_report_json};
use crate::publish::{PublishPolicy, TsvLogSink};
use crate::session::Session;

pub mod pipeline;

/// Entry point for the `radiant` binary.
pub fn run() -> Result<(), AppError> {
    // A `.env` file may name the default configuration.
    dotenvy::dotenv().ok();

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Inspect(args) => handle_inspect(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Plot(args) => handle_plot(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = config_from_args(&args)?;
    let data = pipeline::read_data(&args.data)?;
    let mut session = Session::new();

    let policy = PublishPolicy {
        fallback_timestamp: args.timestamp,
        ..config.publish_policy()
    };
    let mut sink = match (&config.publish.log_path, args.no_publish) {
        (Some(path), false) => Some(TsvLogSink::new(path)),
        _ => None,
    };

    if args.all_frames {
        let series = pipeline::fit_all_frames(&mut session, &config, &data);
        for err in &series.setup_errors {
            eprintln!("{err}");
        }
        let reports: Vec<FitReport> = series
            .frames
            .iter()
            .map(|run| run.to_report(Some(args.data.clone())))
            .collect();
        println!("{}", crate::report::format_frame_table(&reports));

        if let Some(path) = &config.publish.data_log {
            let records: Vec<_> = series.frames.iter().map(|run| run.to_log_record(&data)).collect();
            append_data_log(path, &records)?;
            info!("logged {} frame(s) to {}", records.len(), path.display());
        }

        if let Some(sink) = sink.as_mut() {
            for run in &series.frames {
                pipeline::publish_run(sink, run, &policy)?;
            }
        }
        let first_error = series
            .setup_errors
            .into_iter()
            .chain(series.frames.into_iter().flat_map(|run| run.sides).filter_map(|s| s.outcome.err()))
            .next();
        return first_error.map_or(Ok(()), |err| Err(err.into()));
    }

    let run = pipeline::run_acquisition(&mut session, &config, &data, args.frame);
    let report = run.to_report(Some(args.data.clone()));
    println!("{}", crate::report::format_report_summary(&report));

    if args.plot {
        for side in Side::BOTH {
            if let Some(outcome) = run.side(side).and_then(|s| s.outcome.as_ref().ok()) {
                println!("{}:", side.display_name());
                let plot = crate::plot::render_spectrum_plot(
                    &outcome.corrected,
                    Some(&outcome.result),
                    args.width,
                    args.height,
                );
                println!("{plot}");
            }
        }
    }

    // Optional exports.
    if let Some(path) = &args.export_json {
        write_report_json(path, &report)?;
        info!("wrote {}", path.display());
    }
    if let Some(path) = &args.export_txt {
        for written in crate::io::export::write_side_exports(path, &report)? {
            info!("wrote {}", written.display());
        }
    }

    if let Some(path) = &config.publish.data_log {
        append_data_log(path, &[run.to_log_record(&data)])?;
        info!("logged frame {} to {}", run.frame, path.display());
    }

    if let Some(sink) = sink.as_mut() {
        let outcomes = pipeline::publish_run(sink, &run, &policy)?;
        let sides: Vec<Side> = run.results().map(|r| r.side).collect();
        let labelled: Vec<_> = sides.into_iter().zip(outcomes).collect();
        print!("{}", crate::report::format_publish_outcomes(&labelled));
    }

    match run.sides.into_iter().find_map(|s| s.outcome.err()) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Resolve the configuration file and apply command-line overrides.
pub fn config_from_args(args: &FitArgs) -> Result<AcquisitionConfig, AppError> {
    let mut config = AcquisitionConfig::resolve(args.config.as_deref())?;
    apply_overrides(&mut config, &args.overrides);
    if args.two_color {
        config.two_color.enabled = true;
    }
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut AcquisitionConfig, overrides: &FitOverrides) {
    for side in Side::BOTH {
        let cfg = config.side_mut(side);
        if let Some(method) = overrides.method {
            cfg.method = method;
        }
        if let Some(emissivity) = overrides.emissivity {
            cfg.emissivity = emissivity;
        }
        if let (Some(start_nm), Some(end_nm)) = (overrides.start_nm, overrides.end_nm) {
            cfg.fit_region = Some(RegionConfig { start_nm, end_nm });
        }
        if let Some(n) = overrides.max_iterations {
            cfg.max_iterations = n;
        }
        if let Some(t) = overrides.calibration_temperature {
            cfg.calibration_temperature = t;
        }
    }
}

fn handle_inspect(args: InspectArgs) -> Result<(), AppError> {
    let spe = pipeline::read_data(&args.file)?;
    print!("{}", crate::report::format_spe_summary(&spe, args.saturation));
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let opts = crate::data::SimulationOptions {
        frames: args.frames,
        upstream_temperature: args.upstream,
        downstream_temperature: args.downstream,
        lamp_temperature: args.lamp,
        noise: args.noise,
        seed: args.seed,
        version: args.version(),
        ..Default::default()
    };
    let acq = crate::data::simulate_acquisition(&opts)?;

    fs::create_dir_all(&args.out_dir).map_err(Error::from)?;
    let data_path = args.out_dir.join(format!("{}.spe", args.name));
    let lamp_path = args.out_dir.join(format!("{}_lamp.spe", args.name));
    let config_path = args.out_dir.join(format!("{}.json", args.name));

    crate::io::spe::write_spe(&data_path, &acq.data)?;
    crate::io::spe::write_spe(&lamp_path, &acq.lamp)?;

    let config = acq.layout.config(&lamp_path, opts.lamp_temperature);
    write_config(&config_path, &config)?;

    println!("data:   {}", data_path.display());
    println!("lamp:   {}", lamp_path.display());
    println!("config: {}", config_path.display());
    println!(
        "truth:  upstream {:.1} K, downstream {:.1} K",
        opts.upstream_temperature, opts.downstream_temperature
    );
    Ok(())
}

fn write_config(path: &Path, config: &AcquisitionConfig) -> Result<(), Error> {
    let text = serde_json::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))?;
    fs::write(path, text)?;
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let report = read_report_json(&args.report)?;
    println!("{}", crate::report::format_report_summary(&report));

    for side_report in &report.sides {
        if let Some(curve) = &side_report.curve {
            println!("{}:", side_report.side.display_name());
            println!("{}", crate::plot::render_report_curve(curve, args.width, args.height));
        }
    }
    Ok(())
}
