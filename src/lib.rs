//! `radiant-fit` library crate.
//!
//! The binary (`radiant`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable without spawning processes
//! - acquisition software can embed the fit and supply its own
//!   [`publish::TemperatureSink`]
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod background;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod publish;
pub mod report;
pub mod session;
