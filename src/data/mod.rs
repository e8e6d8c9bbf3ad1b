//! Synthetic data used by the `simulate` command and by tests.

pub mod synthetic;

pub use synthetic::*;
