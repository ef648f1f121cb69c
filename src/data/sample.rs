//! Synthetic microwave sweeps and photoconductivity transients.
//!
//! Used by `trmc demo` and by tests. All noise comes from a seeded `StdRng`, so
//! the same arguments always give the same data.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::config::{CavityGeometry, PhysicalConstants};
use crate::domain::{CouplingRegime, FitParams, LorentzianParams, Sweep, VoltageTrace};
use crate::error::{Result, TrmcError};
use crate::math::linspace;

/// Noise-free Lorentzian reflectivity dip sampled on `n` evenly spaced frequencies.
pub fn lorentzian_sweep(params: &LorentzianParams, start: f64, stop: f64, n: usize) -> Result<Sweep> {
    let freq = linspace(start, stop, n)?;
    let model = FitParams::Lorentzian(*params);
    let values = freq.iter().map(|&f| model.evaluate(f)).collect();
    Sweep::new(freq, values)
}

/// [`lorentzian_sweep`] plus white Gaussian noise of standard deviation `sigma`.
pub fn noisy_lorentzian_sweep(
    params: &LorentzianParams,
    start: f64,
    stop: f64,
    n: usize,
    sigma: f64,
    seed: u64,
) -> Result<Sweep> {
    let clean = lorentzian_sweep(params, start, stop, n)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = noise(sigma)?;
    let values = clean.values().iter().map(|v| v + normal.sample(&mut rng)).collect();
    Sweep::new(clean.frequency().to_vec(), values)
}

/// Shape of a synthetic laser-pulse transient.
///
/// The photoconductance follows a bi-exponential (rise, decay) after the trigger;
/// the recorded voltage is `ΔV = −ΔG · K · V_background` plus a DC offset and noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransientSpec {
    pub samples: usize,
    /// Sample spacing (s).
    pub dt: f64,
    /// Laser trigger time (s).
    pub trigger: f64,
    /// Rise time constant (s).
    pub rise: f64,
    /// Decay time constant (s).
    pub decay: f64,
    /// Peak photoconductance per photon/cm² (S·cm²).
    pub conductance_per_fluence: f64,
    /// DC offset added to every sample (V).
    pub offset: f64,
    /// Noise standard deviation (V).
    pub noise: f64,
}

impl Default for TransientSpec {
    fn default() -> Self {
        Self {
            samples: 1000,
            dt: 1e-9,
            trigger: 100e-9,
            rise: 5e-9,
            decay: 80e-9,
            conductance_per_fluence: 1e-20,
            offset: 2e-4,
            noise: 2e-6,
        }
    }
}

/// One voltage transient at the given fluence.
pub fn transient(spec: &TransientSpec, fluence: f64, k: f64, background_voltage: f64, seed: u64) -> Result<VoltageTrace> {
    if spec.samples == 0 {
        return Err(TrmcError::InvalidInput("transient needs at least one sample".into()));
    }
    if !(spec.dt > 0.0 && spec.rise > 0.0 && spec.decay > spec.rise) {
        return Err(TrmcError::InvalidInput(
            "transient needs dt > 0 and 0 < rise < decay".into(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let normal = noise(spec.noise)?;
    let peak = biexp_peak(spec.rise, spec.decay);
    let amplitude = spec.conductance_per_fluence * fluence;

    let time: Vec<f64> = (0..spec.samples).map(|i| i as f64 * spec.dt).collect();
    let voltage = time
        .iter()
        .map(|&t| {
            let g = amplitude * biexp(t - spec.trigger, spec.rise, spec.decay) / peak;
            -g * k * background_voltage + spec.offset + normal.sample(&mut rng)
        })
        .collect();
    VoltageTrace::new(time, voltage)
}

/// A complete synthetic experiment: one cavity sweep plus one transient per fluence.
#[derive(Debug, Clone)]
pub struct SyntheticExperiment {
    pub sweep: Sweep,
    pub truth: LorentzianParams,
    pub k: f64,
    pub background_voltage: f64,
    pub traces: Vec<(f64, VoltageTrace)>,
}

/// Build a reproducible synthetic run around an X-band resonance.
///
/// The transients are generated with the K implied by `truth`, so converting them
/// with a fitted K should recover `conductance_per_fluence · fluence` at the peak.
pub fn synthetic_experiment(
    fluences: &[f64],
    spec: &TransientSpec,
    cavity: &CavityGeometry,
    constants: &PhysicalConstants,
    seed: u64,
) -> Result<SyntheticExperiment> {
    let truth = LorentzianParams {
        f0: 9.05e9,
        linewidth: 1.2e7,
        r0: 0.06,
        r_inf: 0.6,
    };
    let sweep = noisy_lorentzian_sweep(&truth, 8.95e9, 9.15e9, 801, 1e-3, seed)?;
    let k = crate::calibration::calc_k(
        truth.f0,
        truth.linewidth,
        truth.r0 / truth.r_inf,
        CouplingRegime::UnderCoupled,
        cavity,
        constants,
    )?;
    let background_voltage = 0.025;

    let traces = fluences
        .iter()
        .enumerate()
        .map(|(i, &fluence)| {
            transient(spec, fluence, k, background_voltage, seed.wrapping_add(i as u64 + 1)).map(|t| (fluence, t))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SyntheticExperiment {
        sweep,
        truth,
        k,
        background_voltage,
        traces,
    })
}

fn noise(sigma: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, sigma).map_err(|e| TrmcError::InvalidInput(format!("noise distribution error: {e}")))
}

fn biexp(t: f64, rise: f64, decay: f64) -> f64 {
    if t < 0.0 {
        return 0.0;
    }
    (-t / decay).exp() - (-t / rise).exp()
}

/// Maximum of [`biexp`], reached at `t* = ln(decay/rise) · rise·decay / (decay − rise)`.
fn biexp_peak(rise: f64, decay: f64) -> f64 {
    let t_star = (decay / rise).ln() * rise * decay / (decay - rise);
    biexp(t_star, rise, decay)
}
