//! Princeton Instruments SPE reader and writer (header versions 2.x and 3.x).
//!
//! Layout (little-endian, 4100-byte binary header, frames follow back to back):
//!
//! | offset | type    | field                                      |
//! |--------|---------|--------------------------------------------|
//! | 10     | f32     | exposure time (s)                          |
//! | 20     | 9 ASCII | acquisition date `ddMmmyyyy`               |
//! | 42     | u16     | pixels per row                             |
//! | 108    | i16     | pixel type (0 f32, 1 i32, 2 i16, 3 u16, 8 u32) |
//! | 172    | 6 ASCII | acquisition time `HHMMSS`                  |
//! | 656    | u16     | rows per frame                             |
//! | 678    | u64     | XML footer offset (version 3 only)         |
//! | 1446   | i32     | frame count                                |
//! | 1992   | f32     | header version                             |
//! | 3263   | 6 × f64 | wavelength polynomial, ascending order     |
//! | 4098   | i16     | magic `0x5555`                             |
//!
//! The wavelength of pixel `i` (0-based) is the polynomial evaluated at `i + 1`.
//! Version 3 files carry an XML footer whose wavelength table, creation time,
//! and exposure time take precedence over the binary header.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime};
use log::{debug, warn};
use regex::Regex;

use crate::domain::{RowRange, Spectrum, SpectrumMeta};
use crate::error::Error;
use crate::math::polyval;

pub const HEADER_LEN: usize = 4100;
const MAGIC: i16 = 0x5555;

const OFF_EXPOSURE: usize = 10;
const OFF_DATE: usize = 20;
const OFF_WIDTH: usize = 42;
const OFF_PIXEL_TYPE: usize = 108;
const OFF_TIME: usize = 172;
const OFF_HEIGHT: usize = 656;
const OFF_XML: usize = 678;
const OFF_FRAMES: usize = 1446;
const OFF_VERSION: usize = 1992;
const OFF_POLYNOMIAL: usize = 3263;
const OFF_MAGIC: usize = 4098;

pub const POLYNOMIAL_TERMS: usize = 6;

static WAVELENGTH_TABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Wavelength(?:\s[^>]*)?>([^<]+)</Wavelength>").expect("static regex"));
static WAVELENGTH_ERROR_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<WavelengthError(?:\s[^>]*)?>([^<]+)</WavelengthError>").expect("static regex")
});
static ORIGIN_CREATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<Origin\s[^>]*created="([^"]+)""#).expect("static regex"));
static EXPOSURE_MS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<ExposureTime(?:\s[^>]*)?>([^<]+)</ExposureTime>").expect("static regex"));
static CAMERA_MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<Camera\s[^>]*\bmodel="([^"]+)""#).expect("static regex"));
static REGION_OF_INTEREST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<RegionOfInterest\s[^>]*\bx="(\d+)"[^>]*\bwidth="(\d+)""#).expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeVersion {
    V2,
    V3,
}

impl SpeVersion {
    fn header_value(self) -> f32 {
        match self {
            SpeVersion::V2 => 2.5,
            SpeVersion::V3 => 3.0,
        }
    }
}

/// On-disk pixel encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    F32,
    I32,
    I16,
    U16,
    U32,
}

impl PixelType {
    fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(PixelType::F32),
            1 => Some(PixelType::I32),
            2 => Some(PixelType::I16),
            3 => Some(PixelType::U16),
            8 => Some(PixelType::U32),
            _ => None,
        }
    }

    fn code(self) -> i16 {
        match self {
            PixelType::F32 => 0,
            PixelType::I32 => 1,
            PixelType::I16 => 2,
            PixelType::U16 => 3,
            PixelType::U32 => 8,
        }
    }

    pub fn size(self) -> usize {
        match self {
            PixelType::I16 | PixelType::U16 => 2,
            PixelType::F32 | PixelType::I32 | PixelType::U32 => 4,
        }
    }

    fn decode(self, b: &[u8]) -> f64 {
        match self {
            PixelType::F32 => f32::from_le_bytes(le(b, 0)) as f64,
            PixelType::I32 => i32::from_le_bytes(le(b, 0)) as f64,
            PixelType::I16 => i16::from_le_bytes(le(b, 0)) as f64,
            PixelType::U16 => u16::from_le_bytes(le(b, 0)) as f64,
            PixelType::U32 => u32::from_le_bytes(le(b, 0)) as f64,
        }
    }

    fn encode(self, value: f64, out: &mut Vec<u8>) {
        // Float-to-int `as` casts saturate, which is the clamping we want here.
        match self {
            PixelType::F32 => out.extend_from_slice(&(value as f32).to_le_bytes()),
            PixelType::I32 => out.extend_from_slice(&(value.round() as i32).to_le_bytes()),
            PixelType::I16 => out.extend_from_slice(&(value.round() as i16).to_le_bytes()),
            PixelType::U16 => out.extend_from_slice(&(value.round() as u16).to_le_bytes()),
            PixelType::U32 => out.extend_from_slice(&(value.round() as u32).to_le_bytes()),
        }
    }
}

/// How pixel indices map to wavelengths.
#[derive(Debug, Clone, PartialEq)]
pub enum WavelengthCalibration {
    /// Ascending coefficients evaluated at the 1-based pixel index.
    Polynomial([f64; POLYNOMIAL_TERMS]),
    /// One wavelength per pixel, from a version 3 XML footer.
    Table(Vec<f64>),
}

impl WavelengthCalibration {
    pub fn wavelengths(&self, width: usize) -> Vec<f64> {
        match self {
            WavelengthCalibration::Polynomial(coefficients) => (0..width)
                .map(|i| polyval(coefficients, (i + 1) as f64))
                .collect(),
            WavelengthCalibration::Table(values) => values.iter().copied().take(width).collect(),
        }
    }
}

/// One detector readout, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl Frame {
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.width..(row + 1) * self.width]
    }
}

/// A parsed SPE file.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeFile {
    pub version: SpeVersion,
    pub pixel_type: PixelType,
    pub width: usize,
    pub height: usize,
    /// Seconds.
    pub exposure_time: f64,
    pub acquired_at: Option<NaiveDateTime>,
    pub calibration: WavelengthCalibration,
    /// Camera model from the version 3 footer.
    pub detector: Option<String>,
    pub frames: Vec<Frame>,
    pub source: Option<PathBuf>,
}

/// Read and parse an SPE file. The handle is closed before parsing starts.
pub fn read_spe(path: &Path) -> Result<SpeFile, Error> {
    let bytes = {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        bytes
    };
    let mut spe = parse_spe(&bytes)?;
    spe.source = Some(path.to_path_buf());
    debug!(
        "read {}: {:?}, {}x{} px, {} frame(s), exposure {} s",
        path.display(),
        spe.version,
        spe.width,
        spe.height,
        spe.frames.len(),
        spe.exposure_time
    );
    Ok(spe)
}

/// Parse an SPE image from memory.
pub fn parse_spe(bytes: &[u8]) -> Result<SpeFile, Error> {
    let actual = bytes.len() as u64;
    if bytes.len() < HEADER_LEN {
        return Err(Error::TruncatedFile {
            expected: HEADER_LEN as u64,
            actual,
        });
    }

    let magic = i16::from_le_bytes(le(bytes, OFF_MAGIC));
    if magic != MAGIC {
        return Err(Error::Format(format!("bad magic value {magic:#06x}")));
    }
    let header_version = f32::from_le_bytes(le(bytes, OFF_VERSION));
    let version = match header_version {
        v if (2.0..3.0).contains(&v) => SpeVersion::V2,
        v if (3.0..4.0).contains(&v) => SpeVersion::V3,
        v => return Err(Error::Format(format!("unsupported header version {v}"))),
    };

    let width = u16::from_le_bytes(le(bytes, OFF_WIDTH)) as usize;
    let height = u16::from_le_bytes(le(bytes, OFF_HEIGHT)) as usize;
    let frame_count = i32::from_le_bytes(le(bytes, OFF_FRAMES));
    let type_code = i16::from_le_bytes(le(bytes, OFF_PIXEL_TYPE));
    let pixel_type = PixelType::from_code(type_code)
        .ok_or_else(|| Error::Format(format!("unknown pixel type code {type_code}")))?;
    if width == 0 || height == 0 || frame_count < 1 {
        return Err(Error::Format(format!(
            "invalid dimensions {width}x{height} with {frame_count} frame(s)"
        )));
    }
    let frame_count = frame_count as usize;

    let xml_offset = u64::from_le_bytes(le(bytes, OFF_XML));
    let data_end = match version {
        SpeVersion::V2 => actual,
        SpeVersion::V3 => {
            if xml_offset == 0 {
                return Err(Error::Format("version 3 header without XML footer offset".into()));
            }
            if xml_offset > actual {
                return Err(Error::TruncatedFile {
                    expected: xml_offset,
                    actual,
                });
            }
            xml_offset
        }
    };

    // Header fields are untrusted; a corrupt frame count must not overflow.
    let overflow = || {
        Error::Format(format!(
            "declared size of {frame_count} frame(s) of {width}x{height} overflows"
        ))
    };
    let frame_bytes = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(pixel_type.size()))
        .ok_or_else(overflow)?;
    let expected = frame_bytes
        .checked_mul(frame_count)
        .and_then(|n| n.checked_add(HEADER_LEN))
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(overflow)?;
    if expected > data_end {
        return Err(Error::TruncatedFile {
            expected,
            actual: data_end,
        });
    }

    let frames = (0..frame_count)
        .map(|f| {
            let start = HEADER_LEN + f * frame_bytes;
            let data = bytes[start..start + frame_bytes]
                .chunks_exact(pixel_type.size())
                .map(|b| pixel_type.decode(b))
                .collect();
            Frame { width, height, data }
        })
        .collect();

    let mut coefficients = [0.0; POLYNOMIAL_TERMS];
    for (k, c) in coefficients.iter_mut().enumerate() {
        *c = f64::from_le_bytes(le(bytes, OFF_POLYNOMIAL + 8 * k));
    }

    let mut spe = SpeFile {
        version,
        pixel_type,
        width,
        height,
        exposure_time: f32::from_le_bytes(le(bytes, OFF_EXPOSURE)) as f64,
        acquired_at: header_timestamp(bytes),
        calibration: WavelengthCalibration::Polynomial(coefficients),
        detector: None,
        frames,
        source: None,
    };

    if version == SpeVersion::V3 {
        let xml = String::from_utf8_lossy(&bytes[xml_offset as usize..]);
        apply_xml_footer(&mut spe, &xml);
    }

    Ok(spe)
}

fn header_timestamp(bytes: &[u8]) -> Option<NaiveDateTime> {
    let date = ascii_field(&bytes[OFF_DATE..OFF_DATE + 9]);
    let time = ascii_field(&bytes[OFF_TIME..OFF_TIME + 6]);
    NaiveDateTime::parse_from_str(&format!("{date}{time}"), "%d%b%Y%H%M%S").ok()
}

fn ascii_field(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

fn apply_xml_footer(spe: &mut SpeFile, xml: &str) {
    if let Some(created) = ORIGIN_CREATED.captures(xml).and_then(|c| c.get(1)) {
        match DateTime::parse_from_rfc3339(created.as_str()) {
            Ok(ts) => spe.acquired_at = Some(ts.naive_local()),
            Err(e) => warn!("ignoring unparsable creation time '{}': {e}", created.as_str()),
        }
    }

    if let Some(model) = CAMERA_MODEL.captures(xml).and_then(|c| c.get(1)) {
        spe.detector = Some(model.as_str().to_string());
    }

    if let Some(ms) = EXPOSURE_MS
        .captures(xml)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
    {
        spe.exposure_time = ms / 1000.0;
    }

    let table = parse_wavelength_table(xml);
    if let Some(mut table) = table {
        if table.len() > spe.width {
            let (x, w) = REGION_OF_INTEREST
                .captures(xml)
                .and_then(|c| Some((c[1].parse::<usize>().ok()?, c[2].parse::<usize>().ok()?)))
                .unwrap_or((0, spe.width));
            if x + w <= table.len() {
                table = table[x..x + w].to_vec();
            }
        }
        if table.len() == spe.width {
            spe.calibration = WavelengthCalibration::Table(table);
        } else {
            warn!(
                "XML wavelength table has {} entries for {} pixels; using header polynomial",
                table.len(),
                spe.width
            );
        }
    }
}

fn parse_wavelength_table(xml: &str) -> Option<Vec<f64>> {
    if let Some(values) = WAVELENGTH_TABLE.captures(xml).and_then(|c| c.get(1)) {
        return values
            .as_str()
            .split(',')
            .map(|v| v.trim().parse::<f64>().ok())
            .collect();
    }
    let pairs = WAVELENGTH_ERROR_TABLE.captures(xml).and_then(|c| c.get(1))?;
    pairs
        .as_str()
        .split_whitespace()
        .map(|pair| pair.split(',').next()?.parse::<f64>().ok())
        .collect()
}

/// Serialize an SPE image. Version 2 files can only carry a polynomial calibration.
pub fn encode_spe(spe: &SpeFile) -> Result<Vec<u8>, Error> {
    if spe.width == 0 || spe.width > u16::MAX as usize || spe.height == 0 || spe.height > u16::MAX as usize {
        return Err(Error::Format(format!(
            "frame size {}x{} cannot be stored in an SPE header",
            spe.width, spe.height
        )));
    }
    if spe.frames.is_empty() {
        return Err(Error::Format("an SPE file needs at least one frame".into()));
    }
    if let Some(bad) = spe.frames.iter().find(|f| f.data.len() != spe.width * spe.height) {
        return Err(Error::ShapeMismatch {
            expected: spe.width * spe.height,
            actual: bad.data.len(),
        });
    }

    let mut out = vec![0u8; HEADER_LEN];
    put(&mut out, OFF_EXPOSURE, &(spe.exposure_time as f32).to_le_bytes());
    put(&mut out, OFF_WIDTH, &(spe.width as u16).to_le_bytes());
    put(&mut out, OFF_HEIGHT, &(spe.height as u16).to_le_bytes());
    put(&mut out, OFF_PIXEL_TYPE, &spe.pixel_type.code().to_le_bytes());
    put(&mut out, OFF_FRAMES, &(spe.frames.len() as i32).to_le_bytes());
    put(&mut out, OFF_VERSION, &spe.version.header_value().to_le_bytes());
    put(&mut out, OFF_MAGIC, &MAGIC.to_le_bytes());
    if let Some(ts) = spe.acquired_at {
        put(&mut out, OFF_DATE, ts.format("%d%b%Y").to_string().as_bytes());
        put(&mut out, OFF_TIME, ts.format("%H%M%S").to_string().as_bytes());
    }

    match (&spe.calibration, spe.version) {
        (WavelengthCalibration::Polynomial(coefficients), _) => {
            for (k, c) in coefficients.iter().enumerate() {
                put(&mut out, OFF_POLYNOMIAL + 8 * k, &c.to_le_bytes());
            }
        }
        (WavelengthCalibration::Table(_), SpeVersion::V2) => {
            return Err(Error::Format(
                "version 2 files store the wavelength axis as a polynomial only".into(),
            ));
        }
        (WavelengthCalibration::Table(_), SpeVersion::V3) => {}
    }

    for frame in &spe.frames {
        for &v in &frame.data {
            spe.pixel_type.encode(v, &mut out);
        }
    }

    if spe.version == SpeVersion::V3 {
        let offset = out.len() as u64;
        put(&mut out, OFF_XML, &offset.to_le_bytes());
        out.extend_from_slice(xml_footer(spe).as_bytes());
    }

    Ok(out)
}

/// Write an SPE file, replacing any existing file at `path`.
pub fn write_spe(path: &Path, spe: &SpeFile) -> Result<(), Error> {
    let bytes = encode_spe(spe)?;
    let mut file = File::create(path)?;
    file.write_all(&bytes)?;
    Ok(())
}

fn xml_footer(spe: &SpeFile) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><SpeFormat version="3.0">"#);
    if let Some(ts) = spe.acquired_at {
        xml.push_str(&format!(
            concat!(
                r#"<DataHistories><DataHistory>"#,
                r#"<Origin software="radiant-fit" created="{}+00:00"/>"#,
                r#"</DataHistory></DataHistories>"#
            ),
            ts.format("%Y-%m-%dT%H:%M:%S%.f")
        ));
    }
    if let WavelengthCalibration::Table(values) = &spe.calibration {
        let list: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        xml.push_str(&format!(
            "<Calibrations><WavelengthMapping><Wavelength>{}</Wavelength></WavelengthMapping></Calibrations>",
            list.join(",")
        ));
    }
    if let Some(model) = &spe.detector {
        xml.push_str(&format!(
            r#"<Hardware><Cameras><Camera id="1" model="{model}"/></Cameras></Hardware>"#
        ));
    }
    xml.push_str(&format!(
        "<Experiment><ExposureTime>{}</ExposureTime></Experiment></SpeFormat>",
        spe.exposure_time * 1000.0
    ));
    xml
}

impl SpeFile {
    pub fn wavelengths(&self) -> Vec<f64> {
        self.calibration.wavelengths(self.width)
    }

    fn frame(&self, index: usize) -> Result<&Frame, Error> {
        self.frames.get(index).ok_or(Error::FrameOutOfRange {
            index,
            frames: self.frames.len(),
        })
    }

    fn resolve_rows(&self, rows: Option<RowRange>) -> Result<RowRange, Error> {
        let rows = rows.unwrap_or(RowRange::new(0, self.height - 1));
        if rows.is_empty() || rows.end >= self.height {
            return Err(Error::Config(format!(
                "{rows} outside detector with {} rows",
                self.height
            )));
        }
        Ok(rows)
    }

    fn meta(&self) -> SpectrumMeta {
        SpectrumMeta {
            exposure_time: self.exposure_time,
            acquired_at: self.acquired_at,
            side: None,
            source: self.source.clone(),
        }
    }

    fn column_reduce(&self, frame: &Frame, rows: RowRange, init: f64, f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
        let mut out = vec![init; self.width];
        for r in rows.start..=rows.end {
            for (acc, &v) in out.iter_mut().zip(frame.row(r)) {
                *acc = f(*acc, v);
            }
        }
        out
    }

    /// Sum of `rows` (all rows when `None`) for one frame.
    pub fn spectrum(&self, frame: usize, rows: Option<RowRange>) -> Result<Spectrum, Error> {
        let frame = self.frame(frame)?;
        let rows = self.resolve_rows(rows)?;
        let intensity = self.column_reduce(frame, rows, 0.0, |acc, v| acc + v);
        Spectrum::new(self.wavelengths(), intensity, self.meta())
    }

    /// Row sum averaged over the inclusive frame range (all frames when `None`).
    pub fn averaged_spectrum(&self, rows: Option<RowRange>, frames: Option<(usize, usize)>) -> Result<Spectrum, Error> {
        let (first, last) = frames.unwrap_or((0, self.frames.len() - 1));
        if first > last {
            return Err(Error::Config(format!("frame range {first}..={last} is empty")));
        }
        self.frame(last)?;
        let rows = self.resolve_rows(rows)?;
        let mut sum = vec![0.0; self.width];
        for frame in &self.frames[first..=last] {
            for (acc, v) in sum.iter_mut().zip(self.column_reduce(frame, rows, 0.0, |a, v| a + v)) {
                *acc += v;
            }
        }
        let n = (last - first + 1) as f64;
        let intensity = sum.into_iter().map(|v| v / n).collect();
        Spectrum::new(self.wavelengths(), intensity, self.meta())
    }

    /// Per-column maximum pixel value of `rows`, used to detect saturation.
    pub fn column_peaks(&self, frame: usize, rows: Option<RowRange>) -> Result<Spectrum, Error> {
        let frame = self.frame(frame)?;
        let rows = self.resolve_rows(rows)?;
        let peaks = self.column_reduce(frame, rows, f64::NEG_INFINITY, f64::max);
        Spectrum::new(self.wavelengths(), peaks, self.meta())
    }
}

fn le<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

fn put(out: &mut [u8], offset: usize, value: &[u8]) {
    out[offset..offset + value.len()].copy_from_slice(value);
}
