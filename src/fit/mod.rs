//! Resonance fitting.
//!
//! Responsibilities:
//!
//! - build the fit window around the sweep minimum
//! - fit one of the closed-form models inside it
//! - run many independent fits in parallel, keeping partial results

pub mod batch;
pub mod fitter;

pub use batch::*;
pub use fitter::*;
