//! `trmc-fit` library crate.
//!
//! Time-resolved microwave conductivity (TRMC) analysis: fit the cavity
//! resonance, derive the calibration constant K, and convert detector voltage
//! transients into photoconductivity and a per-fluence figure of merit.
//!
//! The binary (`trmc`) is a thin wrapper around this library so that core
//! logic is testable without spawning processes.

pub mod app;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod conversion;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod timeseries;
