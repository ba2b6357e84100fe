use crate::fitting::common::error::FittingError;
use crate::utils::sweep_file::SweepFileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CirclefitError {
    /// The sweep could not be fitted
    #[error("{0}")]
    Fitting(#[from] FittingError),

    /// Unable to read a sweep from disk
    #[error("{0}")]
    SweepFile(#[from] SweepFileError),
}

#[cfg(feature = "python")]
impl From<CirclefitError> for pyo3::PyErr {
    fn from(value: CirclefitError) -> Self {
        let msg = value.to_string();
        pyo3::exceptions::PyValueError::new_err(msg)
    }
}
