//! Error taxonomy shared by the library and the `trmc` binary.
//!
//! Every variant maps to a process exit code (see [`TrmcError::exit_code`]):
//!
//! - `2`: bad input, configuration or I/O
//! - `3`: degenerate data (empty traces)
//! - `4`: numerical failure (fit, calibration, division)

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrmcError>;

#[derive(Debug, Error)]
pub enum TrmcError {
    /// The optimizer could not satisfy its bounds, ran out of iterations, or
    /// produced a non-finite objective.
    #[error("fit did not converge: {0}")]
    FitDidNotConverge(String),

    /// Non-physical calibration parameters (e.g. `R0 <= 0`).
    #[error("invalid calibration input: {0}")]
    InvalidCalibrationInput(String),

    #[error("division by zero: {0}")]
    DivideByZero(String),

    /// A trace with no usable samples; `context` names the trace (fluence, key, ...).
    #[error("empty trace: {context}")]
    EmptyTrace { context: String },

    /// Malformed in-memory data (non-monotone time axis, length mismatch, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrmcError {
    pub fn empty_trace(context: impl Into<String>) -> Self {
        Self::EmptyTrace {
            context: context.into(),
        }
    }

    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            TrmcError::InvalidInput(_)
            | TrmcError::Config(_)
            | TrmcError::Io { .. }
            | TrmcError::Csv(_)
            | TrmcError::Json(_) => 2,
            TrmcError::EmptyTrace { .. } => 3,
            TrmcError::FitDidNotConverge(_)
            | TrmcError::InvalidCalibrationInput(_)
            | TrmcError::DivideByZero(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_group_by_failure_class() {
        assert_eq!(TrmcError::Config("x".into()).exit_code(), 2);
        assert_eq!(TrmcError::empty_trace("fluence=1e14").exit_code(), 3);
        assert_eq!(TrmcError::DivideByZero("bg".into()).exit_code(), 4);
    }

    #[test]
    fn empty_trace_message_carries_context() {
        let err = TrmcError::empty_trace("fluence=6.45e14");
        assert!(err.to_string().contains("fluence=6.45e14"));
    }
}
