//! Export corrected spectra and fitted curves as plain text.
//!
//! One file per side (`<stem>_us.txt`, `<stem>_ds.txt`), tab separated, with a
//! `#`-prefixed header carrying the fitted temperatures. Easy to load in a
//! spreadsheet or with any `loadtxt`-style reader.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::Side;
use crate::error::Error;
use crate::io::result::FitReport;

/// Path of the per-side export derived from `base` (its extension is replaced).
pub fn side_export_path(base: &Path, side: Side) -> PathBuf {
    let stem = base.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    base.with_file_name(format!("{stem}_{}.txt", side.short_name()))
}

/// Write one text file per side that has a curve. Returns the files written.
pub fn write_side_exports(base: &Path, report: &FitReport) -> Result<Vec<PathBuf>, Error> {
    let mut header = String::from("# Fitted temperatures:\n");
    for side in Side::BOTH {
        if let Some(r) = report.side(side).and_then(|s| s.result.as_ref()) {
            header.push_str(&format!(
                "# {} (K): {:.1}\t{:.1}\n",
                side.display_name(),
                r.temperature,
                r.temperature_error
            ));
        }
    }

    let mut written = Vec::new();
    for side_report in &report.sides {
        let Some(curve) = &side_report.curve else {
            continue;
        };
        let path = side_export_path(base, side_report.side);
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(header.as_bytes())?;
        let tag = side_report.side.short_name().to_uppercase();
        writeln!(out, "# wavelength(nm)\t{tag}_data\t{tag}_fit")?;
        for ((wl, data), fit) in curve.wavelength.iter().zip(&curve.corrected).zip(&curve.fitted) {
            match data {
                Some(v) => writeln!(out, "{wl:.4}\t{v:.6e}\t{fit:.6e}")?,
                None => writeln!(out, "{wl:.4}\tnan\t{fit:.6e}")?,
            }
        }
        out.flush()?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::result::{SideReport, SpectrumCurve};

    #[test]
    fn export_paths_use_side_suffix() {
        assert_eq!(
            side_export_path(Path::new("/tmp/run_001.spe"), Side::Upstream),
            PathBuf::from("/tmp/run_001_us.txt")
        );
        assert_eq!(
            side_export_path(Path::new("out"), Side::Downstream),
            PathBuf::from("out_ds.txt")
        );
    }

    #[test]
    fn writes_one_file_per_curve() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("run.txt");
        let mut report = FitReport::new(None, None);
        report.sides.push(SideReport {
            side: Side::Upstream,
            result: None,
            error: Some("failed".into()),
            curve: Some(SpectrumCurve {
                wavelength: vec![600.0, 601.0],
                corrected: vec![Some(1.5), None],
                usable: vec![true, false],
                fitted: vec![1.4, 1.6],
            }),
            two_color: None,
        });

        let written = write_side_exports(&base, &report).unwrap();
        assert_eq!(written, vec![dir.path().join("run_us.txt")]);
        let text = std::fs::read_to_string(&written[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "# wavelength(nm)\tUS_data\tUS_fit");
        assert_eq!(lines[2], "600.0000\t1.500000e0\t1.400000e0");
        assert_eq!(lines[3], "601.0000\tnan\t1.600000e0");
    }
}
