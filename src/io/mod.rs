//! Input/output helpers.
//!
//! - SPE v2/v3 read/write (`spe`)
//! - tabulated lamp reference spectra (`reference`)
//! - fit report JSON read/write (`result`)
//! - per-side text exports (`export`)
//! - the per-acquisition data log (`datalog`)

pub mod datalog;
pub mod export;
pub mod reference;
pub mod result;
pub mod spe;

pub use datalog::*;
pub use export::*;
pub use reference::*;
pub use result::*;
pub use spe::*;
