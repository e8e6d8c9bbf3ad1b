//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - detector geometry and wavelength windows (`Side`, `RowRange`, `FitRegion`)
//! - the immutable `Spectrum` value passed between stages
//! - fit outputs (`FitResult`, `CalibrationKey`, etc.)

pub mod types;

pub use types::*;
