//! Experiment-level configuration: cavity geometry, physical constants and
//! figure-of-merit normalization.
//!
//! Every field carries its unit in the doc comment. Defaults reproduce the
//! X-band cavity and constants the lab analysis has always used; a JSON file
//! passed with `--config` overrides any subset of them.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrmcError};

/// Inner dimensions of the rectangular measurement cavity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CavityGeometry {
    /// Broad wall width (m).
    pub width_m: f64,
    /// Narrow wall height (m).
    pub height_m: f64,
    /// Cavity length (m).
    pub length_m: f64,
}

impl Default for CavityGeometry {
    fn default() -> Self {
        Self {
            width_m: 22.86e-3,
            height_m: 10.16e-3,
            length_m: 76e-3,
        }
    }
}

impl CavityGeometry {
    /// `width / height` (dimensionless).
    pub fn aspect_ratio(&self) -> f64 {
        self.width_m / self.height_m
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalConstants {
    /// Vacuum permittivity ε0 (F/m).
    pub vacuum_permittivity: f64,
    /// Relative permittivity εr of the cavity filling (dimensionless).
    pub relative_permittivity: f64,
    /// Elementary charge e (C).
    pub elementary_charge: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            vacuum_permittivity: 8.85e-12,
            relative_permittivity: 1.0,
            elementary_charge: 1.6e-19,
        }
    }
}

/// Normalization constants for the figure of merit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FomConfig {
    /// Geometric factor β (dimensionless).
    pub beta: f64,
    /// Illuminated area before correction (cm²).
    pub effective_area: f64,
    /// Transmission correction applied to `effective_area` (0.9 for the ITO substrate).
    pub area_correction: f64,
    /// Fraction of incident photons absorbed, M (dimensionless).
    pub m: f64,
}

impl Default for FomConfig {
    fn default() -> Self {
        Self {
            beta: 1.0,
            effective_area: 1.0,
            area_correction: 0.9,
            m: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub cavity: CavityGeometry,
    pub constants: PhysicalConstants,
    pub fom: FomConfig,
}

impl ExperimentConfig {
    /// Load a (possibly partial) configuration from JSON.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| TrmcError::io(path, e))?;
        let config: ExperimentConfig = serde_json::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("cavity.width_m", self.cavity.width_m),
            ("cavity.height_m", self.cavity.height_m),
            ("cavity.length_m", self.cavity.length_m),
            ("constants.vacuum_permittivity", self.constants.vacuum_permittivity),
            ("constants.relative_permittivity", self.constants.relative_permittivity),
            ("constants.elementary_charge", self.constants.elementary_charge),
            ("fom.effective_area", self.fom.effective_area),
            ("fom.area_correction", self.fom.area_correction),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TrmcError::Config(format!("{name} must be finite and > 0, got {value}")));
            }
        }
        if !(self.fom.beta.is_finite() && self.fom.m.is_finite()) {
            return Err(TrmcError::Config("fom.beta and fom.m must be finite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn defaults_match_x_band_cavity() {
        let c = ExperimentConfig::default();
        assert_relative_eq!(c.cavity.aspect_ratio(), 22.86 / 10.16, max_relative = 1e-12);
        assert_relative_eq!(c.fom.area_correction, 0.9);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let c: ExperimentConfig =
            serde_json::from_str(r#"{ "cavity": { "length_m": 0.05 }, "fom": { "beta": 2.2 } }"#).unwrap();
        assert_relative_eq!(c.cavity.length_m, 0.05);
        assert_relative_eq!(c.cavity.width_m, 22.86e-3);
        assert_relative_eq!(c.fom.beta, 2.2);
        assert_relative_eq!(c.constants.elementary_charge, 1.6e-19);
    }

    #[test]
    fn validate_rejects_zero_height() {
        let mut c = ExperimentConfig::default();
        c.cavity.height_m = 0.0;
        assert!(matches!(c.validate(), Err(TrmcError::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join("trmc_fit_config_test.json");
        std::fs::write(&path, r#"{ "constants": { "relative_permittivity": 2.0 } }"#).unwrap();
        let c = ExperimentConfig::from_json_file(&path).unwrap();
        assert_relative_eq!(c.constants.relative_permittivity, 2.0);
        let _ = std::fs::remove_file(&path);
    }
}
