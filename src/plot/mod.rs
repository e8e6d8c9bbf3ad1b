//! Terminal plots of corrected spectra and fitted curves.

pub mod ascii;

pub use ascii::*;
