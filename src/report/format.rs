//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized

use crate::calibration::Calibration;
use crate::domain::{BatchItem, ConductivityTrace, FomTable, ResonanceFit, Sweep, TraceFrame};
use crate::report::{compute_residuals, worst_residual};

/// Format a single resonance fit (parameters with uncertainties, quality, calibration).
pub fn format_fit_summary(label: &str, sweep: &Sweep, fit: &ResonanceFit, calibration: Option<&Calibration>) -> String {
    let mut out = String::new();

    out.push_str("=== trmc - cavity resonance fit ===\n");
    out.push_str(&format!("Sweep: {label}\n"));
    out.push_str(&format!(
        "Points: n={} | f=[{:.6e}, {:.6e}] Hz\n",
        sweep.len(),
        sweep.frequency().first().copied().unwrap_or(f64::NAN),
        sweep.frequency().last().copied().unwrap_or(f64::NAN),
    ));
    out.push_str(&format!(
        "Window: [{}, {}) around index {} ({} points)\n",
        fit.window.lo,
        fit.window.hi,
        fit.window.center,
        fit.window.len()
    ));

    out.push_str(&format!("\nModel: {}\n", fit.kind().display_name()));
    let values = fit.params.to_vec();
    let errors = fit.std_errors();
    for (i, name) in fit.kind().param_names().iter().enumerate() {
        let err = errors
            .as_ref()
            .and_then(|e| e.get(i))
            .map(|e| format!(" ± {e:.3e}"))
            .unwrap_or_default();
        out.push_str(&format!("- {name:<10} {:>14.6e}{err}\n", values[i]));
    }
    out.push_str(&format!(
        "- {:<10} {:>14.6e}\n",
        "f_res",
        fit.params.resonance_frequency()
    ));

    out.push_str(&format!(
        "\nQuality: SSE={:.3e} RMSE={:.3e} n={} evaluations={}\n",
        fit.quality.sse, fit.quality.rmse, fit.quality.n, fit.quality.evaluations
    ));
    if let Some(worst) = compute_residuals(sweep, fit).ok().as_deref().and_then(worst_residual) {
        out.push_str(&format!(
            "Worst residual: {:+.3e} at {:.6e} Hz\n",
            worst.residual, worst.frequency
        ));
    }

    if let Some(cal) = calibration {
        out.push_str(&format!("\nCalibration ({:?}):\n", cal.regime));
        out.push_str(&format!("- Q    = {:.1}\n", cal.q));
        out.push_str(&format!("- t_RC = {:.3e} s\n", cal.t_rc));
        out.push_str(&format!("- K    = {:.6e}\n", cal.k));
    }

    out
}

/// Format the per-fluence peak conductivity / figure-of-merit table.
pub fn format_fom_table(table: &FomTable) -> String {
    let mut out = String::new();
    out.push_str(format!("{:>14} {:>16} {:>16}\n", "fluence", "max_dG", "FOM").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<14} {:-<16} {:-<16}\n", "", "", "").trim_end());
    out.push('\n');
    for row in &table.rows {
        out.push_str(&format!(
            "{:>14.4e} {:>16.6e} {:>16.6e}\n",
            row.fluence, row.max_conductivity, row.fom
        ));
    }
    out
}

/// One line per batch item: the resonance frequency, or why the fit failed.
pub fn format_batch_fits<K: std::fmt::Display>(items: &[BatchItem<K, ResonanceFit>]) -> String {
    let mut out = String::new();
    for item in items {
        match &item.outcome {
            Ok(fit) => out.push_str(&format!(
                "{:<24} f_res={:.6e} Hz RMSE={:.3e}\n",
                truncate(&item.key.to_string(), 24),
                fit.params.resonance_frequency(),
                fit.quality.rmse
            )),
            Err(err) => out.push_str(&format!("{:<24} FAILED: {err}\n", truncate(&item.key.to_string(), 24))),
        }
    }
    out
}

/// Short description of converted traces (sample count and time span).
pub fn format_conversion_summary(traces: &[(f64, ConductivityTrace)]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Converted traces: {}\n", traces.len()));
    for (fluence, trace) in traces {
        let span = match (trace.time().first(), trace.time().last()) {
            (Some(a), Some(b)) => format!("[{a:.3e}, {b:.3e}] s"),
            _ => "empty".to_string(),
        };
        out.push_str(&format!("- fluence={fluence:.4e}: n={} t={span}\n", trace.len()));
    }
    out
}

/// One line per column of a peak-aligned window: peak value and time span.
pub fn format_aligned_frame(frame: &TraceFrame, names: &[String]) -> String {
    let span = match (frame.time().first(), frame.time().last()) {
        (Some(a), Some(b)) => format!("[{a:.3e}, {b:.3e}] s"),
        _ => "empty".to_string(),
    };
    let mut out = format!("Aligned window: n={} t={span}\n", frame.len());
    for (name, col) in names.iter().zip(frame.columns()) {
        let at_zero = frame
            .time()
            .iter()
            .position(|&t| t == 0.0)
            .map(|i| format!("{:.4e}", col[i]))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("- {:<16} value at peak={at_zero}\n", truncate(name, 16)));
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FomRow;
    use crate::error::TrmcError;

    #[test]
    fn fom_table_has_one_line_per_row() {
        let table = FomTable {
            rows: vec![
                FomRow {
                    fluence: 1e14,
                    max_conductivity: 0.5,
                    fom: 3.47e4,
                },
                FomRow {
                    fluence: 2e14,
                    max_conductivity: 0.8,
                    fom: 2.7e4,
                },
            ],
        };
        let text = format_fom_table(&table);
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().next().unwrap().contains("FOM"));
        assert!(text.contains("1.0000e14"));
    }

    #[test]
    fn batch_lines_report_failures_by_key() {
        let items: Vec<BatchItem<String, ResonanceFit>> = vec![BatchItem {
            key: "sample-a".to_string(),
            outcome: Err(TrmcError::FitDidNotConverge("window too small".into())),
        }];
        let text = format_batch_fits(&items);
        assert!(text.starts_with("sample-a"));
        assert!(text.contains("FAILED"));
    }

    #[test]
    fn aligned_frame_lists_columns_at_the_peak() {
        let frame = TraceFrame::new(vec![-1.0, 0.0, 1.0], vec![vec![0.2, 1.0, 0.5], vec![6.0, 7.0, 8.0]]).unwrap();
        let text = format_aligned_frame(&frame, &["a".to_string(), "b".to_string()]);
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("Aligned window: n=3"));
        assert!(text.contains("7.0000e0"));
    }

    #[test]
    fn truncate_marks_cut_strings() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
