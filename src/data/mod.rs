pub mod sample;

pub use sample::{SyntheticExperiment, TransientSpec, synthetic_experiment};
