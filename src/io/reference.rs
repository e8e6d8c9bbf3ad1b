//! Tabulated lamp reference spectra.
//!
//! Vendors ship standard lamp spectra as two-column text (wavelength nm,
//! relative radiance). The delimiter varies between sources, so it is detected
//! from the first data line: `,`, `;`, tab, or runs of spaces. Lines starting
//! with `#` and a leading non-numeric header line are skipped.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use log::debug;

use crate::domain::{Spectrum, SpectrumMeta};
use crate::error::Error;

/// Load a standard lamp spectrum. Rows are sorted by wavelength.
pub fn read_reference(path: &Path) -> Result<Spectrum, Error> {
    let text = {
        let mut file = File::open(path)?;
        let mut text = String::new();
        file.read_to_string(&mut text)?;
        text
    };
    let mut spectrum = parse_reference(&text)?;
    debug!("loaded {} reference samples from {}", spectrum.len(), path.display());
    spectrum = Spectrum::new(
        spectrum.wavelength().to_vec(),
        spectrum.intensity().to_vec(),
        SpectrumMeta {
            source: Some(path.to_path_buf()),
            ..SpectrumMeta::default()
        },
    )?;
    Ok(spectrum)
}

pub fn parse_reference(text: &str) -> Result<Spectrum, Error> {
    let delimiter = detect_delimiter(text);
    let normalized;
    let body = match delimiter {
        Some(_) => text,
        None => {
            normalized = text
                .lines()
                .map(|line| line.split_whitespace().collect::<Vec<_>>().join("\t"))
                .collect::<Vec<_>>()
                .join("\n");
            normalized.as_str()
        }
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter.unwrap_or(b'\t'))
        .comment(Some(b'#'))
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let mut rows: Vec<(f64, f64)> = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| Error::Format(format!("reference spectrum: {e}")))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        match parse_row(&record) {
            Some(row) => rows.push(row),
            None if rows.is_empty() && line == 0 => continue,
            None => {
                return Err(Error::Format(format!(
                    "reference spectrum line {}: expected two numeric columns",
                    line + 1
                )));
            }
        }
    }

    if rows.len() < 2 {
        return Err(Error::Format(format!(
            "reference spectrum needs at least 2 samples, found {}",
            rows.len()
        )));
    }
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (wavelength, intensity) = rows.into_iter().unzip();
    Spectrum::new(wavelength, intensity, SpectrumMeta::default())
}

/// Write a two-column, tab-separated reference spectrum that [`read_reference`] accepts.
pub fn write_reference(path: &Path, spectrum: &Spectrum) -> Result<(), Error> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(csv_io)?;
    writer.write_record(["wavelength_nm", "intensity"]).map_err(csv_io)?;
    for (wl, v) in spectrum.wavelength().iter().zip(spectrum.intensity()) {
        writer
            .write_record([wl.to_string(), v.to_string()])
            .map_err(csv_io)?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_io(err: csv::Error) -> Error {
    Error::Io(std::io::Error::other(err))
}

fn detect_delimiter(text: &str) -> Option<u8> {
    let first = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .unwrap_or("");
    [b',', b';', b'\t']
        .into_iter()
        .find(|&d| first.as_bytes().contains(&d))
}

fn parse_row(record: &StringRecord) -> Option<(f64, f64)> {
    let wl = record.get(0)?.parse::<f64>().ok()?;
    let v = record.get(1)?.parse::<f64>().ok()?;
    (wl.is_finite() && v.is_finite()).then_some((wl, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_delimiters() {
        for text in [
            "500,1.0\n600,2.0\n700,3.0\n",
            "500;1.0\n600;2.0\n700;3.0\n",
            "500\t1.0\n600\t2.0\n700\t3.0\n",
            "  500   1.0\n600 2.0\n  700    3.0\n",
        ] {
            let s = parse_reference(text).unwrap();
            assert_eq!(s.wavelength(), &[500.0, 600.0, 700.0], "{text:?}");
            assert_eq!(s.intensity(), &[1.0, 2.0, 3.0]);
        }
    }

    #[test]
    fn skips_header_and_comments_and_sorts() {
        let text = "# lamp certificate\nwavelength,radiance\n700,3\n500,1\n600,2\n";
        let s = parse_reference(text).unwrap();
        assert_eq!(s.wavelength(), &[500.0, 600.0, 700.0]);
    }

    #[test]
    fn rejects_garbage_rows() {
        assert!(matches!(parse_reference("500,1\nabc,def\n600,2\n"), Err(Error::Format(_))));
        assert!(matches!(parse_reference("500,1\n"), Err(Error::Format(_))));
    }

    #[test]
    fn written_reference_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lamp.txt");
        let s = Spectrum::new(vec![500.0, 650.5], vec![0.25, 1.0], SpectrumMeta::default()).unwrap();
        write_reference(&path, &s).unwrap();
        let back = read_reference(&path).unwrap();
        assert_eq!(back.wavelength(), s.wavelength());
        assert_eq!(back.intensity(), s.intensity());
        assert_eq!(back.meta().source.as_deref(), Some(path.as_path()));
    }
}
