//! Input/output helpers.
//!
//! - CSV ingest of sweeps and transients (`ingest`)
//! - conductivity / figure-of-merit CSV exports (`export`)
//! - fit result JSON read/write (`curve`)

pub mod curve;
pub mod export;
pub mod ingest;

pub use curve::*;
pub use export::*;
pub use ingest::*;
