//! Mathematical utilities: radiation laws, least squares, and grid helpers.

pub mod interp;
pub mod ols;
pub mod planck;

pub use interp::*;
pub use ols::*;
pub use planck::*;
