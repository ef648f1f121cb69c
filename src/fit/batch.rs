//! Fit many sweeps at once (e.g. one per probe frequency or sample).
//!
//! Sweeps are independent, so they are fitted on the rayon pool. Output order
//! matches input order, and every input key gets exactly one outcome: a sweep
//! that fails to fit is reported, never dropped, and never stops its siblings.

use std::fmt::Debug;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{BatchItem, ModelKind, ResonanceFit, Sweep};
use crate::fit::fitter::{FitOptions, fit_sweep};

pub fn fit_all<K>(sweeps: &[(K, Sweep)], kind: ModelKind, opts: &FitOptions) -> Vec<BatchItem<K, ResonanceFit>>
where
    K: Clone + Debug + Send + Sync,
{
    let items: Vec<BatchItem<K, ResonanceFit>> = sweeps
        .par_iter()
        .map(|(key, sweep)| {
            let outcome = fit_sweep(sweep, kind, opts);
            if let Err(err) = &outcome {
                warn!(key = ?key, error = %err, "sweep fit failed; skipping");
            }
            BatchItem {
                key: key.clone(),
                outcome,
            }
        })
        .collect();

    let failed = items.iter().filter(|i| i.outcome.is_err()).count();
    info!(
        total = items.len(),
        failed,
        model = kind.display_name(),
        "batch fit finished"
    );
    items
}
