use std::error::Error;
use std::fmt;

/// Custom error type for detector failures.
///
/// Configuration problems surface before any model state is touched, so a
/// failed build never leaves a partially constructed detector behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    /// Malformed or dimension-mismatched input matrix.
    InputShape(String),
    /// Predict-family call on a detector that has not been fitted.
    NotFitted(String),
    /// Invalid settings: unknown activation, bad layer spec, out-of-range rate.
    Configuration(String),
}

impl fmt::Display for DetectorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DetectorError::InputShape(msg) => write!(f, "input shape error: {}", msg),
            DetectorError::NotFitted(msg) => write!(f, "not fitted: {}", msg),
            DetectorError::Configuration(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl Error for DetectorError {}
