//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs the log subscriber
//! - loads the experiment configuration
//! - runs the fit / convert / align / demo pipelines
//! - prints reports and writes optional exports

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{AlignArgs, Command, ConvertArgs, DemoArgs, FitArgs, ResonanceArgs};
use crate::config::ExperimentConfig;
use crate::error::{Result, TrmcError};
use crate::fit::FitOptions;
use crate::io::ingest::ColumnRef;
use crate::math::LmOptions;

pub mod pipeline;

use pipeline::{AlignRunConfig, ConvertRunConfig, FitRunConfig, KSource, ResonanceConfig};

/// Entry point for the `trmc` binary.
pub fn run() -> Result<()> {
    let cli = crate::cli::Cli::parse();
    init_tracing(cli.verbose);

    let experiment = match &cli.config {
        Some(path) => ExperimentConfig::from_json_file(path)?,
        None => ExperimentConfig::default(),
    };
    debug!(?experiment, "experiment configuration");

    match cli.command {
        Command::Fit(args) => handle_fit(&args, experiment),
        Command::Convert(args) => handle_convert(&args, experiment),
        Command::Align(args) => handle_align(&args),
        Command::Demo(args) => handle_demo(&args, &experiment),
    }
}

/// Install the `fmt` subscriber on stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second initialisation (e.g. from a host application) is not an error here.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_fit(args: &FitArgs, experiment: ExperimentConfig) -> Result<()> {
    let config = fit_config_from_args(args, experiment);

    if let [path] = config.sweeps.as_slice() {
        let out = pipeline::fit_sweep_file(path, &config.resonance, &config.experiment)?;
        println!(
            "{}",
            crate::report::format_fit_summary(
                &path.display().to_string(),
                &out.sweep,
                &out.fit,
                out.calibration.as_ref()
            )
        );
        if let Some(export) = &args.export_fit {
            let doc = crate::io::curve::FitDocument::new(&out.fit, &out.sweep, out.calibration);
            crate::io::curve::write_fit_json(export, &doc)?;
        }
        return Ok(());
    }

    if args.export_fit.is_some() {
        warn!("--export-fit is ignored for batch fits");
    }
    let items = pipeline::fit_sweep_files(&config);
    println!("{}", crate::report::format_batch_fits(&items));
    if items.iter().all(|i| i.outcome.is_err()) {
        return Err(TrmcError::FitDidNotConverge("no sweep could be fitted".into()));
    }
    Ok(())
}

fn handle_convert(args: &ConvertArgs, experiment: ExperimentConfig) -> Result<()> {
    let config = convert_config_from_args(args, experiment)?;
    let out = pipeline::run_convert(&config)?;

    if let Some(fit) = &out.sweep_fit {
        let label = match &config.k {
            KSource::Sweep(path) => path.display().to_string(),
            KSource::Given(_) => "resonance sweep".to_string(),
        };
        println!(
            "{}",
            crate::report::format_fit_summary(&label, &fit.sweep, &fit.fit, fit.calibration.as_ref())
        );
    }
    println!("K = {:.6e}", out.k);
    println!("{}", crate::report::format_conversion_summary(&out.conductivity));
    for (fluence, reason) in &out.skipped {
        println!("skipped fluence={fluence:.4e}: {reason}");
    }
    if out.conductivity.is_empty() {
        return Err(TrmcError::empty_trace("no trace could be converted"));
    }
    println!("{}", crate::report::format_fom_table(&out.fom));

    if let Some(path) = &args.export {
        crate::io::export::write_conductivity_csv(path, &out.conductivity)?;
    }
    if let Some(path) = &args.export_fom {
        crate::io::export::write_fom_csv(path, &out.fom)?;
    }
    Ok(())
}

fn handle_align(args: &AlignArgs) -> Result<()> {
    let out = pipeline::run_align(&align_config_from_args(args))?;
    println!("{}", crate::report::format_aligned_frame(&out.frame, &out.names));
    if let Some(path) = &args.output {
        crate::io::export::write_frame_csv(path, &out.frame, &out.names)?;
    }
    Ok(())
}

fn handle_demo(args: &DemoArgs, experiment: &ExperimentConfig) -> Result<()> {
    let out = pipeline::run_demo(&args.fluences, args.seed, experiment)?;
    println!(
        "{}",
        crate::report::format_fit_summary(
            &format!("synthetic (seed {})", args.seed),
            &out.experiment.sweep,
            &out.fit,
            Some(&out.calibration)
        )
    );
    println!(
        "K (true) = {:.6e} | K (fitted) = {:.6e}\n",
        out.experiment.k, out.calibration.k
    );
    println!("{}", crate::report::format_fom_table(&out.conversion.fom));

    if let Some(path) = &args.export {
        crate::io::export::write_conductivity_csv(path, &out.conversion.conductivity)?;
    }
    Ok(())
}

pub fn resonance_config_from_args(args: &ResonanceArgs) -> ResonanceConfig {
    ResonanceConfig {
        model: args.model,
        options: FitOptions {
            initial_guess: Vec::new(),
            bounds: None,
            window_half_width: args.window,
            boundary: args.boundary,
            solver: LmOptions {
                max_evaluations: args.max_evaluations,
                ..LmOptions::default()
            },
        },
        regime: args.regime,
        freq_column: column_ref(&args.freq_column),
        value_column: column_ref(&args.value_column),
        diagnostics: args.diagnostics,
    }
}

pub fn fit_config_from_args(args: &FitArgs, experiment: ExperimentConfig) -> FitRunConfig {
    FitRunConfig {
        sweeps: args.sweep.clone(),
        resonance: resonance_config_from_args(&args.resonance),
        experiment,
    }
}

pub fn convert_config_from_args(args: &ConvertArgs, experiment: ExperimentConfig) -> Result<ConvertRunConfig> {
    let k = match (args.k, &args.sweep) {
        (Some(k), _) => KSource::Given(k),
        (None, Some(path)) => KSource::Sweep(path.clone()),
        (None, None) => return Err(TrmcError::Config("either --k or --sweep is required".into())),
    };
    Ok(ConvertRunConfig {
        traces: args.trace.iter().map(|t| (t.fluence, t.path.clone())).collect(),
        time_column: column_ref(&args.time_column),
        voltage_column: column_ref(&args.voltage_column),
        background_voltage: args.background_voltage,
        k,
        resonance: resonance_config_from_args(&args.resonance),
        pretrigger: args.pretrigger,
        subtract_lowest: args.subtract_lowest,
        align: args.time_before.map(|before| (before, args.time_after)),
        experiment,
    })
}

pub fn align_config_from_args(args: &AlignArgs) -> AlignRunConfig {
    AlignRunConfig {
        input: args.input.clone(),
        time_column: column_ref(&args.time_column),
        columns: args.columns.iter().map(|c| column_ref(c)).collect(),
        time_before: args.time_before,
        time_after: args.time_after,
    }
}

fn column_ref(s: &str) -> ColumnRef {
    match s.parse::<ColumnRef>() {
        Ok(c) => c,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use crate::domain::ModelKind;

    #[test]
    fn convert_args_map_to_run_config() {
        let cli = Cli::try_parse_from([
            "trmc",
            "convert",
            "--trace",
            "1e14=a.csv",
            "2e14=b.csv",
            "--background-voltage",
            "0.03",
            "--sweep",
            "s.csv",
            "--voltage-column",
            "dV",
            "--time-before",
            "5e-9",
        ])
        .unwrap();
        let Command::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        let config = convert_config_from_args(&args, ExperimentConfig::default()).unwrap();
        assert_eq!(config.traces.len(), 2);
        assert!(matches!(config.k, KSource::Sweep(_)));
        assert_eq!(config.voltage_column, ColumnRef::Name("dV".into()));
        assert_eq!(config.time_column, ColumnRef::Index(0));
        assert_eq!(config.align, Some((5e-9, None)));
    }

    #[test]
    fn align_args_map_to_column_refs() {
        let cli = Cli::try_parse_from([
            "trmc",
            "align",
            "--input",
            "f.csv",
            "--time-column",
            "t",
            "--columns",
            "dV,2",
            "--time-before",
            "1e-8",
            "--time-after",
            "5e-8",
        ])
        .unwrap();
        let Command::Align(args) = cli.command else {
            panic!("expected align");
        };
        let config = align_config_from_args(&args);
        assert_eq!(config.time_column, ColumnRef::Name("t".into()));
        assert_eq!(config.columns, vec![ColumnRef::Name("dV".into()), ColumnRef::Index(2)]);
        assert_eq!(config.time_after, Some(5e-8));
    }

    #[test]
    fn resonance_args_carry_window_and_budget() {
        let cli = Cli::try_parse_from([
            "trmc",
            "fit",
            "--sweep",
            "s.csv",
            "--model",
            "quadratic",
            "--window",
            "40",
            "--max-evaluations",
            "50",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let config = fit_config_from_args(&args, ExperimentConfig::default());
        assert_eq!(config.resonance.model, ModelKind::Quadratic);
        assert_eq!(config.resonance.options.window_half_width, 40);
        assert_eq!(config.resonance.options.solver.max_evaluations, 50);
    }
}
