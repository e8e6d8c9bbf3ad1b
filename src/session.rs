//! Caller-owned state carried between acquisitions.
//!
//! Holds the calibration curves loaded so far (keyed by file, lamp
//! temperature, rows, and standard spectrum) and the latest result per side,
//! which seeds the next fit of that side.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::debug;

use crate::calibration::CalibrationCurve;
use crate::domain::{CalibrationKey, FitResult, RowRange, Side};

type CacheId = (PathBuf, u64, Option<RowRange>, Option<PathBuf>);

#[derive(Debug, Default)]
pub struct Session {
    calibrations: HashMap<CacheId, Arc<CalibrationCurve>>,
    previous: HashMap<Side, FitResult>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached curve for `key`, building it with `load` on first use.
    pub fn calibration<E>(
        &mut self,
        side: Side,
        key: &CalibrationKey,
        load: impl FnOnce() -> Result<CalibrationCurve, E>,
    ) -> Result<Arc<CalibrationCurve>, E> {
        let id = key.cache_id();
        if let Some(curve) = self.calibrations.get(&id) {
            debug!("{side}: calibration cache hit for {}", key.path.display());
            return Ok(Arc::clone(curve));
        }
        debug!("{side}: calibration cache miss for {}", key.path.display());
        let curve = Arc::new(load()?);
        self.calibrations.insert(id, Arc::clone(&curve));
        Ok(curve)
    }

    pub fn cached_calibrations(&self) -> usize {
        self.calibrations.len()
    }

    pub fn record(&mut self, result: &FitResult) {
        self.previous.insert(result.side, result.clone());
    }

    pub fn previous(&self, side: Side) -> Option<&FitResult> {
        self.previous.get(&side)
    }

    pub fn previous_temperature(&self, side: Side) -> Option<f64> {
        self.previous(side).map(|r| r.temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::LampReference;
    use crate::domain::{Spectrum, SpectrumMeta};
    use crate::error::Error;

    fn curve() -> CalibrationCurve {
        let s = Spectrum::new(vec![500.0, 600.0, 700.0], vec![1.0, 2.0, 3.0], SpectrumMeta::default()).unwrap();
        CalibrationCurve::from_reference(&s, &LampReference::BlackBody { temperature: 2500.0 }).unwrap()
    }

    fn key(temperature: f64) -> CalibrationKey {
        CalibrationKey {
            path: PathBuf::from("lamp.spe"),
            temperature,
            rows: None,
            standard: None,
        }
    }

    #[test]
    fn curves_are_loaded_once_per_key() {
        let mut session = Session::new();
        let mut loads = 0;
        for _ in 0..3 {
            session
                .calibration(Side::Upstream, &key(2500.0), || {
                    loads += 1;
                    Ok::<_, Error>(curve())
                })
                .unwrap();
        }
        assert_eq!(loads, 1);

        // A different lamp temperature is a different curve.
        session
            .calibration(Side::Downstream, &key(2600.0), || Ok::<_, Error>(curve()))
            .unwrap();
        assert_eq!(session.cached_calibrations(), 2);
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let mut session = Session::new();
        let err = session
            .calibration(Side::Upstream, &key(2500.0), || {
                Err(Error::InvalidCalibration("no response".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCalibration(_)));
        assert_eq!(session.cached_calibrations(), 0);
    }
}
