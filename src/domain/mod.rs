//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - validated measurement inputs (`Sweep`, `VoltageTrace`, `TraceFrame`)
//! - model selection enums (`ModelKind`, `WindowBoundary`, `CouplingRegime`)
//! - fit and conversion outputs (`ResonanceFit`, `ConductivityTrace`, `FomTable`)

pub mod types;

pub use types::*;
