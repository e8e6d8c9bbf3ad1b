//! Per-acquisition data log.
//!
//! Every fitted frame appends one tab-separated row holding both sides'
//! temperature, error, scale factor and integrated counts, next to the
//! detector settings of the file. The header is written only when the file is
//! new or empty, so a log can span many sessions.
//!
//! Sides that failed leave their columns empty.

use std::fs::{File, OpenOptions};
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One row of the data log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataLogRecord {
    #[serde(rename = "# File")]
    pub file: String,
    #[serde(rename = "Frame")]
    pub frame: usize,
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "T_DS")]
    pub t_ds: Option<f64>,
    #[serde(rename = "T_US")]
    pub t_us: Option<f64>,
    #[serde(rename = "T_DS_error")]
    pub t_ds_error: Option<f64>,
    #[serde(rename = "T_US_error")]
    pub t_us_error: Option<f64>,
    #[serde(rename = "Detector")]
    pub detector: String,
    #[serde(rename = "Exposure Time [sec]")]
    pub exposure_time: f64,
    #[serde(rename = "Gain")]
    pub gain: f64,
    #[serde(rename = "scaling_DS")]
    pub scaling_ds: Option<f64>,
    #[serde(rename = "scaling_US")]
    pub scaling_us: Option<f64>,
    #[serde(rename = "counts_DS")]
    pub counts_ds: Option<f64>,
    #[serde(rename = "counts_US")]
    pub counts_us: Option<f64>,
}

/// Append `records` to the log at `path`, creating it with a header if needed.
pub fn append_data_log(path: &Path, records: &[DataLogRecord]) -> Result<(), Error> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let fresh = file.metadata()?.len() == 0;

    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(fresh)
        .from_writer(file);
    for record in records {
        writer.serialize(record).map_err(|e| log_error(path, e))?;
    }
    writer.flush()?;
    debug!("appended {} row(s) to {}", records.len(), path.display());
    Ok(())
}

pub fn read_data_log(path: &Path) -> Result<Vec<DataLogRecord>, Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(File::open(path)?);
    reader
        .deserialize()
        .map(|row| row.map_err(|e| log_error(path, e)))
        .collect()
}

fn log_error(path: &Path, err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::Format(format!("data log {}: {other:?}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(file: &str, t_us: Option<f64>) -> DataLogRecord {
        DataLogRecord {
            file: file.into(),
            frame: 0,
            path: "/data/run".into(),
            t_ds: Some(2301.5),
            t_us,
            t_ds_error: Some(4.2),
            t_us_error: t_us.map(|_| 3.0),
            detector: "PIXIS: 100BR".into(),
            exposure_time: 0.1,
            gain: 1.0,
            scaling_ds: Some(2.5e-9),
            scaling_us: t_us.map(|_| 3.0e-9),
            counts_ds: Some(1.25e7),
            counts_us: t_us.map(|_| 1.5e7),
        }
    }

    #[test]
    fn appends_rows_below_a_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datalog.txt");
        let first = record("a.spe", Some(2512.0));
        let second = record("b.spe", None);
        append_data_log(&path, std::slice::from_ref(&first)).unwrap();
        append_data_log(&path, std::slice::from_ref(&second)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("# File").count(), 1);
        assert!(text.starts_with("# File\tFrame\tPath\tT_DS\tT_US\t"), "{text}");

        let rows = read_data_log(&path).unwrap();
        assert_eq!(rows, vec![first, second]);
    }

    #[test]
    fn unreadable_rows_are_format_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datalog.txt");
        append_data_log(&path, &[record("a.spe", Some(2512.0))]).unwrap();
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str("b.spe\tnot-a-frame\n");
        std::fs::write(&path, text).unwrap();
        assert!(matches!(read_data_log(&path), Err(Error::Format(_))));
    }
}
