//! Acquisition configuration.
//!
//! One JSON document describes both optical paths and the publication policy.
//! Every key is optional and takes the default shown by
//! `AcquisitionConfig::default()`; unknown keys are rejected so typos surface
//! immediately instead of silently falling back to defaults.
//!
//! ```json
//! {
//!   "upstream":   { "calibration_file": "lamp_us.spe", "calibration_temperature": 2200,
//!                   "rows": { "start": 10, "end": 20 },
//!                   "fit_region": { "start_nm": 550, "end_nm": 850 } },
//!   "downstream": { "calibration_file": "lamp_ds.spe", "calibration_temperature": 2200,
//!                   "rows": { "start": 60, "end": 70 } },
//!   "publish":    { "log_path": "temperatures.tsv", "error_limit": 100 }
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::calibration::DEFAULT_GRID_TOLERANCE_NM;
use crate::domain::{Emissivity, FitMethod, FitRegion, RowRange, Side};
use crate::error::Error;
use crate::fit::{DEFAULT_GRID_POINTS, DEFAULT_PIXEL_DELTA, FitOptions};
use crate::publish::PublishPolicy;

/// Environment variable naming the default configuration file.
pub const CONFIG_ENV: &str = "RADIANT_CONFIG";

/// Highest raw count considered unsaturated on a 16-bit detector.
pub const DEFAULT_SATURATION_THRESHOLD: f64 = 65534.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcquisitionConfig {
    pub upstream: SideConfig,
    pub downstream: SideConfig,
    pub publish: PublishConfig,
    pub two_color: TwoColorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SideConfig {
    /// Detector rows summed into this side's spectrum; all rows when unset.
    pub rows: Option<RowRange>,
    pub calibration_file: Option<PathBuf>,
    /// Lamp temperature (K) when the lamp is treated as a black body.
    pub calibration_temperature: f64,
    /// Tabulated lamp spectrum; replaces the black-body lamp model when set.
    pub standard_spectrum_path: Option<PathBuf>,
    pub calibration_background: BackgroundConfig,
    pub background: BackgroundConfig,
    pub fit_region: Option<RegionConfig>,
    /// Raw-count ceiling; `null` disables saturation checks.
    pub saturation_threshold: Option<f64>,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    pub seed_temperature: f64,
    /// Seed from the previous result of the same side when one exists.
    pub seed_from_previous: bool,
    pub method: FitMethod,
    pub emissivity: Emissivity,
    pub grid_tolerance_nm: f64,
}

impl Default for SideConfig {
    fn default() -> Self {
        Self {
            rows: None,
            calibration_file: None,
            calibration_temperature: 2000.0,
            standard_spectrum_path: None,
            calibration_background: BackgroundConfig::default(),
            background: BackgroundConfig::default(),
            fit_region: None,
            saturation_threshold: Some(DEFAULT_SATURATION_THRESHOLD),
            max_iterations: 200,
            convergence_tolerance: 1e-6,
            seed_temperature: 2000.0,
            seed_from_previous: true,
            method: FitMethod::Planck,
            emissivity: Emissivity::Grey,
            grid_tolerance_nm: DEFAULT_GRID_TOLERANCE_NM,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    #[default]
    None,
    Scalar,
    PerPixelFile,
    /// Rows of the same frame that see no sample emission.
    InSitu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundConfig {
    pub mode: BackgroundMode,
    /// Counts subtracted in `scalar` mode.
    pub value: f64,
    /// SPE file for `per_pixel_file` mode.
    pub path: Option<PathBuf>,
    /// Detector rows for `in_situ` mode.
    pub rows: Option<RowRange>,
    pub scale: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            mode: BackgroundMode::None,
            value: 0.0,
            path: None,
            rows: None,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    pub start_nm: f64,
    pub end_nm: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Tab-separated temperature log; publication is off when unset.
    pub log_path: Option<PathBuf>,
    /// Results with a larger 1σ error (K) are not forwarded.
    pub error_limit: Option<f64>,
    /// Per-acquisition data log; one row appended per fitted frame.
    pub data_log: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TwoColorConfig {
    pub enabled: bool,
    pub grid_points: usize,
    pub pixel_delta: usize,
}

impl Default for TwoColorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grid_points: DEFAULT_GRID_POINTS,
            pixel_delta: DEFAULT_PIXEL_DELTA,
        }
    }
}

impl AcquisitionConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("cannot open '{}': {e}", path.display())))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Config(format!("'{}': {e}", path.display())))?;
        config.validate()?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `explicit`, else from `$RADIANT_CONFIG`, else use defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn side(&self, side: Side) -> &SideConfig {
        match side {
            Side::Upstream => &self.upstream,
            Side::Downstream => &self.downstream,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideConfig {
        match side {
            Side::Upstream => &mut self.upstream,
            Side::Downstream => &mut self.downstream,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        for side in Side::BOTH {
            self.side(side)
                .validate()
                .map_err(|e| Error::Config(format!("{}: {e}", side.short_name())))?;
        }
        if let Some(limit) = self.publish.error_limit {
            if !(limit > 0.0) {
                return Err(Error::Config(format!("publish.error_limit must be > 0 (got {limit})")));
            }
        }
        let tc = &self.two_color;
        if tc.pixel_delta == 0 || tc.grid_points <= tc.pixel_delta {
            return Err(Error::Config(format!(
                "two_color.pixel_delta must be in 1..{} (got {})",
                tc.grid_points, tc.pixel_delta
            )));
        }
        Ok(())
    }

    pub fn publish_policy(&self) -> PublishPolicy {
        PublishPolicy {
            error_limit: self.publish.error_limit,
            fallback_timestamp: None,
        }
    }
}

impl SideConfig {
    fn validate(&self) -> Result<(), String> {
        let t = self.calibration_temperature;
        if !(t.is_finite() && t > 0.0) {
            return Err(format!("calibration_temperature must be > 0 K (got {t})"));
        }
        if !(self.seed_temperature.is_finite() && self.seed_temperature > 0.0) {
            return Err(format!("seed_temperature must be > 0 K (got {})", self.seed_temperature));
        }
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".into());
        }
        if !(self.convergence_tolerance > 0.0) {
            return Err(format!(
                "convergence_tolerance must be > 0 (got {})",
                self.convergence_tolerance
            ));
        }
        if !(self.grid_tolerance_nm >= 0.0) {
            return Err(format!("grid_tolerance_nm must be >= 0 (got {})", self.grid_tolerance_nm));
        }
        if let Some(rows) = self.rows {
            if rows.is_empty() {
                return Err(format!("rows {rows} is empty"));
            }
        }
        if let Some(region) = self.fit_region {
            FitRegion::new(region.start_nm, region.end_nm).map_err(|e| e.to_string())?;
        }
        self.background.validate("background")?;
        self.calibration_background.validate("calibration_background")?;
        Ok(())
    }

    pub fn region(&self) -> FitRegion {
        self.fit_region
            .and_then(|r| FitRegion::new(r.start_nm, r.end_nm).ok())
            .unwrap_or_else(FitRegion::unbounded)
    }

    /// Fit options for this side, seeded from `previous` when allowed.
    pub fn fit_options(&self, previous: Option<f64>) -> FitOptions {
        let previous = previous.filter(|t| self.seed_from_previous && t.is_finite() && *t > 0.0);
        let seed = previous.unwrap_or(self.seed_temperature);
        FitOptions {
            method: self.method,
            emissivity: self.emissivity,
            seed_temperature: seed,
            max_iterations: self.max_iterations,
            tolerance: self.convergence_tolerance,
            saturation_threshold: self.saturation_threshold,
            wien_seed: previous.is_none(),
        }
    }
}

impl BackgroundConfig {
    fn validate(&self, name: &str) -> Result<(), String> {
        if !self.scale.is_finite() {
            return Err(format!("{name}.scale must be finite"));
        }
        match self.mode {
            BackgroundMode::None => Ok(()),
            BackgroundMode::Scalar if !self.value.is_finite() => Err(format!("{name}.value must be finite")),
            BackgroundMode::Scalar => Ok(()),
            BackgroundMode::PerPixelFile if self.path.is_none() => {
                Err(format!("{name}.path is required for per_pixel_file mode"))
            }
            BackgroundMode::PerPixelFile => Ok(()),
            BackgroundMode::InSitu => match self.rows {
                Some(rows) if !rows.is_empty() => Ok(()),
                _ => Err(format!("{name}.rows is required for in_situ mode")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = AcquisitionConfig::from_json("{}").unwrap();
        assert_eq!(config, AcquisitionConfig::default());
        assert_eq!(config.upstream.max_iterations, 200);
        assert_eq!(config.upstream.saturation_threshold, Some(DEFAULT_SATURATION_THRESHOLD));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = AcquisitionConfig::from_json(r#"{ "upstream": { "calibraton_file": "x.spe" } }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("calibraton_file"), "{err}");
    }

    #[test]
    fn nested_values_parse() {
        let config = AcquisitionConfig::from_json(
            r#"{
                "upstream": {
                    "rows": { "start": 3, "end": 9 },
                    "method": "wien",
                    "background": { "mode": "in_situ", "rows": { "start": 20, "end": 26 } },
                    "fit_region": { "start_nm": 550, "end_nm": 850 }
                },
                "publish": { "error_limit": 75 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.upstream.rows, Some(RowRange::new(3, 9)));
        assert_eq!(config.upstream.method, FitMethod::Wien);
        assert_eq!(config.upstream.background.mode, BackgroundMode::InSitu);
        assert_eq!(config.upstream.region(), FitRegion::new(550.0, 850.0).unwrap());
        assert_eq!(config.downstream.region(), FitRegion::unbounded());
        assert_eq!(config.publish_policy().error_limit, Some(75.0));
    }

    #[test]
    fn inconsistent_values_fail_validation() {
        for doc in [
            r#"{ "downstream": { "calibration_temperature": 0 } }"#,
            r#"{ "upstream": { "fit_region": { "start_nm": 900, "end_nm": 500 } } }"#,
            r#"{ "upstream": { "background": { "mode": "per_pixel_file" } } }"#,
            r#"{ "publish": { "error_limit": -1 } }"#,
            r#"{ "two_color": { "grid_points": 100, "pixel_delta": 150 } }"#,
        ] {
            assert!(matches!(AcquisitionConfig::from_json(doc), Err(Error::Config(_))), "{doc}");
        }
    }

    #[test]
    fn previous_temperature_seeds_when_enabled() {
        let mut side = SideConfig::default();
        assert_eq!(side.fit_options(Some(2750.0)).seed_temperature, 2750.0);
        assert!(!side.fit_options(Some(2750.0)).wien_seed);
        side.seed_from_previous = false;
        assert_eq!(side.fit_options(Some(2750.0)).seed_temperature, 2000.0);
        assert!(side.fit_options(Some(2750.0)).wien_seed);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, br#"{ "downstream": { "seed_temperature": 1800 } }"#).unwrap();
        let config = AcquisitionConfig::load(file.path()).unwrap();
        assert_eq!(config.downstream.seed_temperature, 1800.0);
    }
}
