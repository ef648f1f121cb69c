//! Shared analysis pipelines used by the CLI commands.
//!
//! Keeping these in one place avoids duplicating the core workflow:
//! sweep -> fit -> K; traces + K -> conductivity -> peak / FOM;
//! multi-column transient -> peak-aligned window
//!
//! The command handlers can then focus on printing and exports.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::calibration::{Calibration, CalibrationInput, calibrate, calibrate_with_diagnostics};
use crate::config::ExperimentConfig;
use crate::conversion::{convert_all, fom_row, subtract_pretrigger_mean, subtract_trace};
use crate::data::{SyntheticExperiment, TransientSpec, synthetic_experiment};
use crate::domain::{
    BatchItem, ConductivityTrace, CouplingRegime, FomTable, ModelKind, ResonanceFit, Sweep, TraceFrame, VoltageTrace,
};
use crate::error::{Result, TrmcError};
use crate::fit::{FitOptions, fit_all, fit_sweep};
use crate::io::ingest::{ColumnRef, IngestReport, load_frame, load_sweep, load_trace};
use crate::timeseries::offset_to_peak;

/// Where and how to fit a resonance sweep.
#[derive(Debug, Clone)]
pub struct ResonanceConfig {
    pub model: ModelKind,
    pub options: FitOptions,
    pub regime: CouplingRegime,
    pub freq_column: ColumnRef,
    pub value_column: ColumnRef,
    pub diagnostics: bool,
}

#[derive(Debug, Clone)]
pub struct FitRunConfig {
    pub sweeps: Vec<PathBuf>,
    pub resonance: ResonanceConfig,
    pub experiment: ExperimentConfig,
}

/// Outputs of fitting one sweep.
#[derive(Debug, Clone)]
pub struct SweepFit {
    pub sweep: Sweep,
    pub fit: ResonanceFit,
    /// `None` for the quadratic model, which has no linewidth.
    pub calibration: Option<Calibration>,
    pub ingest: IngestReport,
}

/// Load, fit and (for Lorentzian kinds) calibrate one sweep.
pub fn fit_sweep_file(path: &Path, resonance: &ResonanceConfig, experiment: &ExperimentConfig) -> Result<SweepFit> {
    let (sweep, ingest) = load_sweep(path, &resonance.freq_column, &resonance.value_column)?;
    let fit = fit_sweep(&sweep, resonance.model, &resonance.options)?;
    let calibration = calibrate_fit(&fit, resonance, experiment)?;
    Ok(SweepFit {
        sweep,
        fit,
        calibration,
        ingest,
    })
}

/// Fit every sweep file; a file that fails to load or fit keeps its slot.
pub fn fit_sweep_files(config: &FitRunConfig) -> Vec<BatchItem<String, ResonanceFit>> {
    let mut loaded = Vec::with_capacity(config.sweeps.len());
    let mut failed = Vec::new();
    for (i, path) in config.sweeps.iter().enumerate() {
        let key = path.display().to_string();
        match load_sweep(path, &config.resonance.freq_column, &config.resonance.value_column) {
            Ok((sweep, _)) => loaded.push((key, sweep)),
            Err(err) => {
                warn!(path = %key, error = %err, "could not load sweep");
                failed.push((i, BatchItem { key, outcome: Err(err) }));
            }
        }
    }

    let mut fitted = fit_all(&loaded, config.resonance.model, &config.resonance.options).into_iter();
    let mut failed = failed.into_iter().peekable();
    (0..config.sweeps.len())
        .filter_map(|i| match failed.peek() {
            Some((j, _)) if *j == i => failed.next().map(|(_, item)| item),
            _ => fitted.next(),
        })
        .collect()
}

fn calibrate_fit(
    fit: &ResonanceFit,
    resonance: &ResonanceConfig,
    experiment: &ExperimentConfig,
) -> Result<Option<Calibration>> {
    if fit.kind() == ModelKind::Quadratic {
        return Ok(None);
    }
    let input = CalibrationInput::from_fit(fit)?;
    let cal = if resonance.diagnostics {
        calibrate_with_diagnostics(&input, resonance.regime, &experiment.cavity, &experiment.constants)?
    } else {
        calibrate(&input, resonance.regime, &experiment.cavity, &experiment.constants)?
    };
    Ok(Some(cal))
}

/// Source of the calibration constant for a conversion run.
#[derive(Debug, Clone)]
pub enum KSource {
    Given(f64),
    Sweep(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ConvertRunConfig {
    pub traces: Vec<(f64, PathBuf)>,
    pub time_column: ColumnRef,
    pub voltage_column: ColumnRef,
    pub background_voltage: f64,
    pub k: KSource,
    pub resonance: ResonanceConfig,
    pub pretrigger: Option<f64>,
    pub subtract_lowest: bool,
    /// `(time_before, time_after)` for peak alignment.
    pub align: Option<(f64, Option<f64>)>,
    pub experiment: ExperimentConfig,
}

/// All computed outputs of one conversion run.
#[derive(Debug, Clone)]
pub struct ConvertOutput {
    pub k: f64,
    pub sweep_fit: Option<SweepFit>,
    pub conductivity: Vec<(f64, ConductivityTrace)>,
    /// Fluences whose trace could not be loaded or converted, with the reason.
    pub skipped: Vec<(f64, String)>,
    pub fom: FomTable,
}

/// Execute the conversion pipeline from files.
pub fn run_convert(config: &ConvertRunConfig) -> Result<ConvertOutput> {
    let (k, sweep_fit) = match &config.k {
        KSource::Given(k) => (*k, None),
        KSource::Sweep(path) => {
            let fitted = fit_sweep_file(path, &config.resonance, &config.experiment)?;
            let cal = fitted.calibration.ok_or_else(|| {
                TrmcError::InvalidCalibrationInput(format!(
                    "model {} cannot provide K; use a Lorentzian model or pass --k",
                    config.resonance.model.display_name()
                ))
            })?;
            (cal.k, Some(fitted))
        }
    };

    let mut traces = Vec::with_capacity(config.traces.len());
    let mut unreadable = Vec::new();
    for (fluence, path) in &config.traces {
        match load_trace(path, &config.time_column, &config.voltage_column) {
            Ok((trace, _)) => traces.push((*fluence, trace)),
            Err(err) => {
                warn!(fluence, path = %path.display(), error = %err, "could not load trace; skipping");
                unreadable.push((*fluence, format!("{}: {err}", path.display())));
            }
        }
    }

    let mut out = convert_traces(
        traces,
        config.background_voltage,
        k,
        config.pretrigger,
        config.subtract_lowest,
        config.align,
        &config.experiment,
    );
    unreadable.append(&mut out.skipped);
    out.skipped = unreadable;
    out.sweep_fit = sweep_fit;
    Ok(out)
}

/// Conversion pipeline on in-memory traces.
///
/// A trace that fails reference subtraction, conversion, alignment or the FOM
/// step is reported in `skipped`; the FOM table covers the rest, in input order.
pub fn convert_traces(
    mut traces: Vec<(f64, VoltageTrace)>,
    background_voltage: f64,
    k: f64,
    pretrigger: Option<f64>,
    subtract_lowest: bool,
    align: Option<(f64, Option<f64>)>,
    experiment: &ExperimentConfig,
) -> ConvertOutput {
    let mut skipped = Vec::new();

    if let Some(until) = pretrigger {
        traces = traces
            .into_iter()
            .map(|(fluence, trace)| (fluence, subtract_pretrigger_mean(&trace, until)))
            .collect();
    }
    let reference = subtract_lowest
        .then(|| traces.iter().min_by(|a, b| a.0.total_cmp(&b.0)).map(|(_, t)| t.clone()))
        .flatten();
    if let Some(reference) = reference {
        traces = traces
            .into_iter()
            .filter_map(|(fluence, trace)| match subtract_trace(&trace, &reference) {
                Ok(diff) => Some((fluence, diff)),
                Err(err) => {
                    warn!(fluence, error = %err, "reference subtraction failed; skipping");
                    skipped.push((fluence, err.to_string()));
                    None
                }
            })
            .collect();
    }

    let mut conductivity = Vec::with_capacity(traces.len());
    let mut rows = Vec::with_capacity(traces.len());
    for item in convert_all(&traces, background_voltage, k) {
        let fluence = item.key;
        let outcome = item.outcome.and_then(|g| {
            let g = match align {
                Some((before, after)) => align_on_peak(&g, before, after)?,
                None => g,
            };
            let row = fom_row(fluence, &g, &experiment.fom, &experiment.constants)?;
            Ok((g, row))
        });
        match outcome {
            Ok((g, row)) => {
                conductivity.push((fluence, g));
                rows.push(row);
            }
            Err(err) => {
                warn!(fluence, error = %err, "trace skipped");
                skipped.push((fluence, err.to_string()));
            }
        }
    }

    info!(
        converted = conductivity.len(),
        skipped = skipped.len(),
        k = %format!("{k:.3e}"),
        "conversion finished"
    );

    ConvertOutput {
        k,
        sweep_fit: None,
        conductivity,
        skipped,
        fom: FomTable { rows },
    }
}

fn align_on_peak(trace: &ConductivityTrace, before: f64, after: Option<f64>) -> Result<ConductivityTrace> {
    let frame = TraceFrame::new(trace.time().to_vec(), vec![trace.conductivity().to_vec()])?;
    let aligned = offset_to_peak(&frame, before, after)?;
    let values = aligned.column(0).unwrap_or_default().to_vec();
    ConductivityTrace::new(aligned.time().to_vec(), values)
}

#[derive(Debug, Clone)]
pub struct AlignRunConfig {
    pub input: PathBuf,
    pub time_column: ColumnRef,
    /// Data columns; the peak of the first one positions the window.
    pub columns: Vec<ColumnRef>,
    pub time_before: f64,
    pub time_after: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AlignOutput {
    pub frame: TraceFrame,
    /// One output header per data column.
    pub names: Vec<String>,
    pub ingest: IngestReport,
}

/// Load a multi-column transient and cut the window around the first column's peak.
pub fn run_align(config: &AlignRunConfig) -> Result<AlignOutput> {
    let (frame, ingest) = load_frame(&config.input, &config.time_column, &config.columns)?;
    let aligned = offset_to_peak(&frame, config.time_before, config.time_after)?;
    info!(
        path = %config.input.display(),
        columns = aligned.columns().len(),
        samples = aligned.len(),
        "aligned on peak"
    );
    Ok(AlignOutput {
        frame: aligned,
        names: config.columns.iter().map(column_label).collect(),
        ingest,
    })
}

fn column_label(column: &ColumnRef) -> String {
    match column {
        ColumnRef::Name(name) => name.clone(),
        ColumnRef::Index(i) => format!("column_{i}"),
    }
}

/// Outputs of the synthetic end-to-end run.
#[derive(Debug, Clone)]
pub struct DemoOutput {
    pub experiment: SyntheticExperiment,
    pub fit: ResonanceFit,
    pub calibration: Calibration,
    pub conversion: ConvertOutput,
}

/// Generate a synthetic experiment and push it through fit, calibration and conversion.
pub fn run_demo(fluences: &[f64], seed: u64, experiment: &ExperimentConfig) -> Result<DemoOutput> {
    let spec = TransientSpec::default();
    let synthetic = synthetic_experiment(fluences, &spec, &experiment.cavity, &experiment.constants, seed)?;

    let fit = fit_sweep(&synthetic.sweep, ModelKind::Lorentzian, &FitOptions::default())?;
    let input = CalibrationInput::from_fit(&fit)?;
    let calibration = calibrate_with_diagnostics(
        &input,
        CouplingRegime::UnderCoupled,
        &experiment.cavity,
        &experiment.constants,
    )?;

    let pretrigger = Some(spec.trigger * 0.8);
    let conversion = convert_traces(
        synthetic.traces.clone(),
        synthetic.background_voltage,
        calibration.k,
        pretrigger,
        false,
        Some((spec.trigger * 0.5, None)),
        experiment,
    );

    Ok(DemoOutput {
        experiment: synthetic,
        fit,
        calibration,
        conversion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn demo_recovers_the_synthetic_calibration() {
        let out = run_demo(&[1e13, 1e14], 3, &ExperimentConfig::default()).unwrap();
        assert_relative_eq!(out.calibration.k, out.experiment.k, max_relative = 0.05);
        assert_eq!(out.conversion.fom.rows.len(), 2);
        assert!(out.conversion.skipped.is_empty());

        // Peak ΔG scales with fluence.
        let rows = &out.conversion.fom.rows;
        let ratio = rows[1].max_conductivity / rows[0].max_conductivity;
        assert!(ratio > 8.0 && ratio < 12.0, "ratio={ratio}");
        // Aligned traces start half a trigger delay before their peak.
        assert!(out.conversion.conductivity[0].1.time()[0] < 0.0);
    }

    fn temp_csv(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("trmc_pipeline_{}_{name}.csv", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn given_k_config(traces: Vec<(f64, PathBuf)>) -> ConvertRunConfig {
        ConvertRunConfig {
            traces,
            time_column: ColumnRef::Index(0),
            voltage_column: ColumnRef::Index(1),
            background_voltage: 0.025,
            k: KSource::Given(-1.0e4),
            resonance: ResonanceConfig {
                model: ModelKind::Lorentzian,
                options: FitOptions::default(),
                regime: CouplingRegime::UnderCoupled,
                freq_column: ColumnRef::Index(0),
                value_column: ColumnRef::Index(1),
                diagnostics: false,
            },
            pretrigger: None,
            subtract_lowest: false,
            align: None,
            experiment: ExperimentConfig::default(),
        }
    }

    #[test]
    fn failed_conversion_is_skipped_not_fatal() {
        let good = VoltageTrace::new(vec![0.0, 1.0, 2.0], vec![0.0, 1e-3, 0.0]).unwrap();
        let empty = VoltageTrace::new(vec![], vec![]).unwrap();
        let out = convert_traces(
            vec![(1e14, good), (2e14, empty)],
            0.025,
            -1.0e4,
            None,
            false,
            Some((1.0, None)),
            &ExperimentConfig::default(),
        );
        assert_eq!(out.conductivity.len(), 1);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].0, 2e14);
        assert_eq!(out.fom.rows[0].fluence, 1e14);
    }

    #[test]
    fn empty_and_zero_fluence_siblings_are_skipped_without_alignment() {
        let good = VoltageTrace::new(vec![0.0, 1.0, 2.0], vec![0.0, 1e-3, 0.0]).unwrap();
        let empty = VoltageTrace::new(vec![], vec![]).unwrap();
        let out = convert_traces(
            vec![(1e14, good.clone()), (2e14, empty), (0.0, good)],
            0.025,
            -1.0e4,
            None,
            false,
            None,
            &ExperimentConfig::default(),
        );
        assert_eq!(out.fom.rows.len(), 1);
        assert_eq!(out.fom.rows[0].fluence, 1e14);
        assert_eq!(out.conductivity.len(), 1);

        assert_eq!(out.skipped.len(), 2);
        assert_eq!(out.skipped[0].0, 2e14);
        assert!(out.skipped[0].1.contains("empty trace"), "{}", out.skipped[0].1);
        assert_eq!(out.skipped[1].0, 0.0);
        assert!(out.skipped[1].1.contains("division by zero"), "{}", out.skipped[1].1);
    }

    #[test]
    fn mismatched_axis_is_skipped_during_reference_subtraction() {
        let low = VoltageTrace::new(vec![0.0, 1.0, 2.0], vec![1e-4, 2e-4, 1e-4]).unwrap();
        let shifted = VoltageTrace::new(vec![0.5, 1.5, 2.5], vec![1e-4, 9e-4, 1e-4]).unwrap();
        let out = convert_traces(
            vec![(1e13, low), (5e14, shifted)],
            0.025,
            -1.0e4,
            None,
            true,
            None,
            &ExperimentConfig::default(),
        );
        assert_eq!(out.fom.rows.len(), 1);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].0, 5e14);
    }

    #[test]
    fn unreadable_trace_file_is_skipped() {
        let good = temp_csv("good_trace", "t,v\n0,0\n1e-9,1e-3\n2e-9,0\n");
        let missing = std::env::temp_dir().join("trmc_pipeline_definitely_missing_trace.csv");
        let config = given_k_config(vec![(3e13, missing.clone()), (1e14, good.clone())]);

        let out = run_convert(&config).unwrap();
        assert_eq!(out.k, -1.0e4);
        assert_eq!(out.fom.rows.len(), 1);
        assert_eq!(out.fom.rows[0].fluence, 1e14);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].0, 3e13);
        assert!(out.skipped[0].1.contains(&missing.display().to_string()));
        std::fs::remove_file(good).ok();
    }

    #[test]
    fn lowest_fluence_reference_zeroes_itself() {
        let t = vec![0.0, 1.0, 2.0];
        let low = VoltageTrace::new(t.clone(), vec![1e-4, 2e-4, 1e-4]).unwrap();
        let high = VoltageTrace::new(t, vec![1e-4, 9e-4, 1e-4]).unwrap();
        let out = convert_traces(
            vec![(5e14, high), (1e13, low)],
            0.025,
            -1.0e4,
            None,
            true,
            None,
            &ExperimentConfig::default(),
        );
        assert_eq!(out.fom.rows[0].fluence, 5e14);
        assert!(out.fom.rows[0].max_conductivity > 0.0);
        assert_eq!(out.fom.rows[1].max_conductivity, 0.0);
    }

    #[test]
    fn align_cuts_every_column_around_the_first_peak() {
        let path = temp_csv(
            "frame",
            "time,a,b\n0,0.0,5\n1,0.2,6\n2,1.0,7\n3,0.5,8\n4,0.1,9\n5,0.0,10\n",
        );
        let config = AlignRunConfig {
            input: path.clone(),
            time_column: ColumnRef::Name("time".into()),
            columns: vec![ColumnRef::Name("a".into()), ColumnRef::Index(2)],
            time_before: 1.0,
            time_after: Some(2.0),
        };
        let out = run_align(&config).unwrap();
        assert_eq!(out.frame.time(), &[-1.0, 0.0, 1.0, 2.0]);
        assert_eq!(out.frame.column(0).unwrap(), &[0.2, 1.0, 0.5, 0.1]);
        assert_eq!(out.frame.column(1).unwrap(), &[6.0, 7.0, 8.0, 9.0]);
        assert_eq!(out.names, vec!["a".to_string(), "column_2".to_string()]);
        std::fs::remove_file(path).ok();
    }
}
