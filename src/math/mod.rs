//! Numerical utilities: least squares, Levenberg–Marquardt and sampling grids.

pub mod grid;
pub mod lm;
pub mod ols;

pub use grid::*;
pub use lm::*;
pub use ols::*;
