//! Read/write fit result JSON files.
//!
//! The fit document is the portable record of one resonance fit:
//! - model kind, parameters, covariance and fit quality
//! - the calibration derived from it (when the model allows one)
//! - the fitted curve sampled over the fit window, for quick plotting
//!
//! `schema_version` tracks [`MODEL_SCHEMA_VERSION`]; documents from another
//! version are rejected on read.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::domain::{FitParams, FitQuality, FitWindow, MODEL_SCHEMA_VERSION, ModelKind, ResonanceFit, Sweep};
use crate::error::{Result, TrmcError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDocument {
    pub schema_version: u32,
    pub tool: String,
    pub created_at: DateTime<Utc>,
    pub model: ModelKind,
    pub params: FitParams,
    pub std_errors: Option<Vec<f64>>,
    pub covariance: Option<Vec<Vec<f64>>>,
    pub window: FitWindow,
    pub quality: FitQuality,
    pub calibration: Option<Calibration>,
    pub curve: FitCurve,
}

/// Fitted model sampled at the sweep frequencies inside the fit window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitCurve {
    pub frequency_hz: Vec<f64>,
    pub value: Vec<f64>,
}

impl FitDocument {
    pub fn new(fit: &ResonanceFit, sweep: &Sweep, calibration: Option<Calibration>) -> Self {
        let (frequency_hz, value) = fit.fitted_curve(sweep).into_iter().unzip();
        Self {
            schema_version: MODEL_SCHEMA_VERSION,
            tool: "trmc".to_string(),
            created_at: Utc::now(),
            model: fit.kind(),
            params: fit.params,
            std_errors: fit.std_errors(),
            covariance: fit.covariance.clone(),
            window: fit.window,
            quality: fit.quality,
            calibration,
            curve: FitCurve { frequency_hz, value },
        }
    }
}

/// Write a fit document as pretty JSON.
pub fn write_fit_json(path: &Path, doc: &FitDocument) -> Result<()> {
    let file = File::create(path).map_err(|e| TrmcError::io(path, e))?;
    serde_json::to_writer_pretty(file, doc)?;
    Ok(())
}

/// Read a fit document, rejecting other schema versions.
pub fn read_fit_json(path: &Path) -> Result<FitDocument> {
    let file = File::open(path).map_err(|e| TrmcError::io(path, e))?;
    let doc: FitDocument = serde_json::from_reader(file)?;
    if doc.schema_version != MODEL_SCHEMA_VERSION {
        return Err(TrmcError::InvalidInput(format!(
            "fit document schema version {} is not supported (expected {MODEL_SCHEMA_VERSION})",
            doc.schema_version
        )));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::lorentzian_sweep;
    use crate::domain::LorentzianParams;
    use crate::fit::{FitOptions, fit_sweep};

    #[test]
    fn document_survives_a_file_and_rejects_other_versions() {
        let sweep = lorentzian_sweep(
            &LorentzianParams {
                f0: 9.0e9,
                linewidth: 1.5e7,
                r0: 0.2,
                r_inf: 0.9,
            },
            8.9e9,
            9.1e9,
            401,
        )
        .unwrap();
        let fit = fit_sweep(&sweep, ModelKind::Lorentzian, &FitOptions::default()).unwrap();
        let doc = FitDocument::new(&fit, &sweep, None);
        assert_eq!(doc.curve.frequency_hz.len(), fit.window.len());
        assert_eq!(doc.model, ModelKind::Lorentzian);

        let path = std::env::temp_dir().join(format!("trmc_fit_{}.json", std::process::id()));
        write_fit_json(&path, &doc).unwrap();
        let back = read_fit_json(&path).unwrap();
        assert_eq!(back.model, doc.model);
        assert_eq!(back.window, doc.window);
        approx::assert_relative_eq!(
            back.params.resonance_frequency(),
            doc.params.resonance_frequency(),
            max_relative = 1e-12
        );

        let mut old = doc.clone();
        old.schema_version = MODEL_SCHEMA_VERSION + 1;
        write_fit_json(&path, &old).unwrap();
        assert!(matches!(read_fit_json(&path), Err(TrmcError::InvalidInput(_))));
        std::fs::remove_file(path).ok();
    }
}
