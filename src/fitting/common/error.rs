use thiserror::Error;

/// Enum of the possible error variants that may be encountered while fitting a sweep
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FittingError {
    /// Fewer samples than a fitting stage needs to constrain its parameters
    #[error("insufficient data: need at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Frequency and response arrays differ in length
    #[error("length mismatch: {frequencies} frequencies but {response} response samples")]
    LengthMismatch { frequencies: usize, response: usize },

    /// Data that cannot be fitted at all, e.g. non-finite frequencies
    #[error("{0}")]
    InvalidInput(String),

    /// The solver rejected the problem setup
    #[error("{0}")]
    BadFit(String),
}

#[cfg(feature = "python")]
impl From<FittingError> for pyo3::PyErr {
    fn from(value: FittingError) -> Self {
        let msg = value.to_string();
        pyo3::exceptions::PyValueError::new_err(msg)
    }
}
