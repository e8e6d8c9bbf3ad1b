//! Reporting utilities: acquisition summaries and file inspection.

pub mod format;

pub use format::*;
