//! Command-line parsing for the TRMC analysis tool.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! fitting, calibration and conversion code.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use crate::domain::{CouplingRegime, ModelKind, WindowBoundary};
use crate::fit::DEFAULT_WINDOW_HALF_WIDTH;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "trmc", version, about = "Microwave-cavity TRMC resonance fitting and conductivity conversion")]
pub struct Cli {
    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Experiment configuration JSON (cavity geometry, constants, FOM normalization).
    #[arg(long, global = true, value_name = "JSON")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit cavity resonance sweep(s) and report the calibration constant K.
    Fit(FitArgs),
    /// Convert voltage transients to photoconductivity and tabulate the figure of merit.
    Convert(ConvertArgs),
    /// Cut a peak-aligned window out of a multi-column transient CSV.
    Align(AlignArgs),
    /// Run the whole pipeline on reproducible synthetic data.
    Demo(DemoArgs),
}

/// Resonance fit options shared by `fit` and `convert --sweep`.
#[derive(Debug, Args, Clone)]
pub struct ResonanceArgs {
    /// Model fitted to the reflectivity dip.
    #[arg(long, value_enum, default_value_t = ModelKind::Lorentzian)]
    pub model: ModelKind,

    /// Window half-width (samples) around the sweep minimum.
    #[arg(long, default_value_t = DEFAULT_WINDOW_HALF_WIDTH)]
    pub window: usize,

    /// Window end convention (defaults to the model's own).
    #[arg(long, value_enum)]
    pub boundary: Option<WindowBoundary>,

    /// Cavity coupling regime used for K.
    #[arg(long, value_enum, default_value_t = CouplingRegime::UnderCoupled)]
    pub regime: CouplingRegime,

    /// Maximum model evaluations for the Lorentzian fits.
    #[arg(long, default_value_t = 1000)]
    pub max_evaluations: usize,

    /// Sweep CSV frequency column (header name or zero-based index).
    #[arg(long, default_value = "0")]
    pub freq_column: String,

    /// Sweep CSV reflectivity column (header name or zero-based index).
    #[arg(long, default_value = "1")]
    pub value_column: String,

    /// Log Q, RC time and K while calibrating.
    #[arg(long)]
    pub diagnostics: bool,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Sweep CSV file(s); more than one runs a batch fit.
    #[arg(long, value_name = "CSV", required = true, num_args = 1..)]
    pub sweep: Vec<PathBuf>,

    #[command(flatten)]
    pub resonance: ResonanceArgs,

    /// Write the fit result document (JSON). Single-sweep runs only.
    #[arg(long = "export-fit", value_name = "JSON")]
    pub export_fit: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ConvertArgs {
    /// Transient as `FLUENCE=FILE` (photons/cm² per pulse); repeat per fluence.
    #[arg(long, value_name = "FLUENCE=CSV", required = true, num_args = 1..)]
    pub trace: Vec<TraceInput>,

    /// Trace CSV time column (header name or zero-based index).
    #[arg(long, default_value = "0")]
    pub time_column: String,

    /// Trace CSV voltage column (header name or zero-based index).
    #[arg(long, default_value = "1")]
    pub voltage_column: String,

    /// Steady-state detector voltage V_background (V).
    #[arg(long, allow_negative_numbers = true)]
    pub background_voltage: f64,

    /// Calibration constant K; mutually exclusive with `--sweep`.
    #[arg(long, allow_negative_numbers = true, conflicts_with = "sweep", required_unless_present = "sweep")]
    pub k: Option<f64>,

    /// Derive K from a resonance sweep CSV instead.
    #[arg(long, value_name = "CSV")]
    pub sweep: Option<PathBuf>,

    #[command(flatten)]
    pub resonance: ResonanceArgs,

    /// Subtract the mean of all samples before this time (s) from each trace.
    #[arg(long, allow_negative_numbers = true)]
    pub pretrigger: Option<f64>,

    /// Subtract the lowest-fluence trace from every trace.
    #[arg(long)]
    pub subtract_lowest: bool,

    /// Align each conductivity trace on its peak, keeping this much time before it (s).
    #[arg(long)]
    pub time_before: Option<f64>,

    /// With `--time-before`: keep this much time after the peak (s); default keeps the rest.
    #[arg(long, requires = "time_before")]
    pub time_after: Option<f64>,

    /// Write conductivity traces (long-format CSV).
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Write the per-fluence peak / figure-of-merit table (CSV).
    #[arg(long = "export-fom", value_name = "CSV")]
    pub export_fom: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct AlignArgs {
    /// Transient CSV with one time column and one or more data columns.
    #[arg(long, value_name = "CSV")]
    pub input: PathBuf,

    /// Time column (header name or zero-based index).
    #[arg(long, default_value = "0")]
    pub time_column: String,

    /// Data columns to keep; the peak of the first one positions the window.
    #[arg(long, value_delimiter = ',', required = true, num_args = 1..)]
    pub columns: Vec<String>,

    /// Time kept before the peak (s).
    #[arg(long)]
    pub time_before: f64,

    /// Time kept after the peak (s); default keeps the rest.
    #[arg(long)]
    pub time_after: Option<f64>,

    /// Write the aligned window (CSV); otherwise only a summary is printed.
    #[arg(long, value_name = "CSV")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Random seed for the synthetic sweep and transients.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Fluences to simulate (photons/cm² per pulse).
    #[arg(long, value_delimiter = ',', default_values_t = vec![1e13, 3e13, 1e14, 3e14])]
    pub fluences: Vec<f64>,

    /// Write the synthetic conductivity traces (long-format CSV).
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

/// One `FLUENCE=FILE` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceInput {
    pub fluence: f64,
    pub path: PathBuf,
}

impl FromStr for TraceInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (fluence, path) = s
            .split_once('=')
            .ok_or_else(|| format!("expected FLUENCE=FILE, got '{s}'"))?;
        let fluence: f64 = fluence
            .trim()
            .parse()
            .map_err(|_| format!("invalid fluence '{fluence}'"))?;
        if !(fluence.is_finite() && fluence > 0.0) {
            return Err(format!("fluence must be finite and > 0, got {fluence}"));
        }
        if path.trim().is_empty() {
            return Err("missing trace file after '='".to_string());
        }
        Ok(Self {
            fluence,
            path: PathBuf::from(path.trim()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn trace_input_parses_fluence_and_path() {
        let t: TraceInput = "6.45e14=data/shot1.csv".parse().unwrap();
        assert_eq!(t.fluence, 6.45e14);
        assert_eq!(t.path, PathBuf::from("data/shot1.csv"));
        assert!("data.csv".parse::<TraceInput>().is_err());
        assert!("0=data.csv".parse::<TraceInput>().is_err());
        assert!("1e14=".parse::<TraceInput>().is_err());
    }

    #[test]
    fn convert_requires_k_or_sweep() {
        let base = ["trmc", "convert", "--trace", "1e14=a.csv", "--background-voltage", "0.03"];
        assert!(Cli::try_parse_from(base).is_err());

        let mut with_k = base.to_vec();
        with_k.extend(["--k", "-1.7e4"]);
        let cli = Cli::try_parse_from(with_k).unwrap();
        match cli.command {
            Command::Convert(args) => assert_eq!(args.k, Some(-1.7e4)),
            other => panic!("unexpected command: {other:?}"),
        }

        let mut both = base.to_vec();
        both.extend(["--k", "1", "--sweep", "s.csv"]);
        assert!(Cli::try_parse_from(both).is_err());
    }

    #[test]
    fn align_takes_a_column_list() {
        let cli = Cli::try_parse_from([
            "trmc",
            "align",
            "--input",
            "frame.csv",
            "--columns",
            "a,3",
            "--time-before",
            "2e-8",
        ])
        .unwrap();
        match cli.command {
            Command::Align(args) => {
                assert_eq!(args.columns, vec!["a".to_string(), "3".to_string()]);
                assert_eq!(args.time_before, 2e-8);
                assert!(args.time_after.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["trmc", "align", "--input", "frame.csv", "--time-before", "1"]).is_err());
    }

    #[test]
    fn fit_defaults() {
        let cli = Cli::try_parse_from(["trmc", "-v", "fit", "--sweep", "s.csv"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Fit(args) => {
                assert_eq!(args.resonance.window, 105);
                assert_eq!(args.resonance.model, ModelKind::Lorentzian);
                assert_eq!(args.resonance.regime, CouplingRegime::UnderCoupled);
                assert!(args.resonance.boundary.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
