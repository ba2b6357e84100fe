use crate::fitting::common::error::FittingError;
use crate::fitting::common::least_squares::SolverConfig;
use num_complex::Complex64;

/// Smallest sweep the full pipeline accepts
pub const MIN_SWEEP_POINTS: usize = 4;

/// A swept-frequency measurement: ascending frequencies (Hz) paired with complex responses.
#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
    frequencies: Vec<f64>,
    response: Vec<Complex64>,
}

impl Sweep {
    /// # Errors
    /// Will return `Err` if the arrays differ in length, hold fewer than
    /// [`MIN_SWEEP_POINTS`] samples, or contain non-finite frequencies.
    pub fn new(frequencies: Vec<f64>, response: Vec<Complex64>) -> Result<Sweep, FittingError> {
        check_lengths(&frequencies, &response, MIN_SWEEP_POINTS)?;
        if frequencies.iter().any(|f| !f.is_finite()) {
            Err(FittingError::InvalidInput(
                "sweep contains non-finite frequencies".to_string(),
            ))?
        }
        Ok(Sweep {
            frequencies,
            response,
        })
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn response(&self) -> &[Complex64] {
        &self.response
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Checks that a frequency/response pair is usable by a stage needing `needed` points
pub(crate) fn check_lengths(
    frequencies: &[f64],
    response: &[Complex64],
    needed: usize,
) -> Result<(), FittingError> {
    if frequencies.len() != response.len() {
        Err(FittingError::LengthMismatch {
            frequencies: frequencies.len(),
            response: response.len(),
        })?
    }
    if frequencies.len() < needed {
        Err(FittingError::InsufficientData {
            needed,
            got: frequencies.len(),
        })?
    }
    Ok(())
}

/// Result of the amplitude-only pre-fit
/// `|S|^2 = a1 + a2 (f - fr) + (a3 + a4 (f - fr)) / (1 + 4 qr^2 ((f - fr) / fr)^2)`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SkewedLorentzianParams {
    /// Background level
    pub a1: f64,
    /// Background slope
    pub a2: f64,
    /// Resonance amplitude, negative for a dip
    pub a3: f64,
    /// Resonance amplitude slope
    pub a4: f64,
    pub fr: f64,
    pub qr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub xc: f64,
    pub yc: f64,
    pub r0: f64,
}

impl Circle {
    pub fn center(&self) -> Complex64 {
        Complex64::new(self.xc, self.yc)
    }

    pub fn is_finite(&self) -> bool {
        self.xc.is_finite() && self.yc.is_finite() && self.r0.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseFitParams {
    pub theta0: f64,
    pub qr: f64,
    pub fr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSlopeFitParams {
    pub theta0: f64,
    pub qr: f64,
    pub fr: f64,
    /// Residual linear phase trend in rad/Hz
    pub slope: f64,
}

/// Coupling geometry of the measured port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortType {
    /// Resonator side-coupled to a feedline, measured in transmission
    #[default]
    Notch,
    /// Directly coupled resonator measured in reflection
    Reflection,
}

/// How the cable delay is obtained during calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayMode {
    /// Use the given delay in seconds
    Fixed(f64),
    /// Fit the delay that makes the trace most circular, optionally seeded by the phase slope
    Fit { guess: bool },
    /// Remove the residual phase slope of the resonance iteratively
    PhaseSlope { iterations: usize },
}

impl Default for DelayMode {
    fn default() -> Self {
        DelayMode::Fixed(0.0)
    }
}

/// Knobs of the calibration and circle fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    pub port: PortType,
    /// The resonance shows up as a peak in |S|, not a dip
    pub is_peak: bool,
    /// Treat the background amplitude as flat
    pub ignore_slope: bool,
    pub delay: DelayMode,
    /// Follow the algebraic circle fit with the geometric refinement passes
    pub refine_results: bool,
    /// Estimate parameter uncertainties from the fit covariance
    pub calc_errors: bool,
    /// Assumed suppression of a parasitic background path in dB, for [`FanoRange`]
    pub isolation_db: f64,
    pub solver: SolverConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            port: PortType::Notch,
            is_peak: false,
            ignore_slope: true,
            delay: DelayMode::default(),
            refine_results: false,
            calc_errors: true,
            isolation_db: 15.0,
            solver: SolverConfig::default(),
        }
    }
}

/// Parameters needed to move a raw trace into the canonical frame and back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Cable delay in seconds
    pub delay: f64,
    /// Amplitude of the off-resonant point
    pub amp_norm: f64,
    /// Phase of the off-resonant point
    pub alpha: f64,
    /// Resonance frequency from the calibration phase fit
    pub fr: f64,
    /// Loaded quality factor from the calibration phase fit
    pub qr: f64,
    /// Background amplitude slope that was subtracted
    pub slope: f64,
    /// Frequency the background slope is referenced to
    pub fr_cal: f64,
}

impl Calibration {
    /// A calibration that leaves data untouched
    pub fn identity() -> Calibration {
        Calibration {
            delay: 0.0,
            amp_norm: 1.0,
            alpha: 0.0,
            fr: 0.0,
            qr: 0.0,
            slope: 0.0,
            fr_cal: 0.0,
        }
    }
}

/// 1-sigma uncertainties of a notch fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitErrors {
    pub fr_err: f64,
    pub abs_qc_err: f64,
    pub qr_err: f64,
    pub phi0_err: f64,
    pub qi_no_corr_err: f64,
    pub qi_dia_corr_err: f64,
}

/// Systematic ranges of `Qi` and `Qc` if a background path leaking past the resonator
/// interferes with it (Fano interference). NaN when the mismatch angle is too large for the
/// assumed leakage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanoRange {
    /// Background amplitude relative to the resonant path
    pub b: f64,
    pub qi_min: f64,
    /// Infinite if the leakage allows a lossless resonator
    pub qi_max: f64,
    pub qc_min: f64,
    pub qc_max: f64,
}

/// Resonator parameters of a notch port
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitResult {
    pub fr: f64,
    /// Loaded quality factor
    pub qr: f64,
    /// Magnitude of the complex coupling quality factor
    pub abs_qc: f64,
    /// Coupling quality factor after diameter correction, `1 / Re(1 / Qc)`
    pub qc_dia_corr: f64,
    pub qi_dia_corr: f64,
    pub qi_no_corr: f64,
    /// Impedance mismatch angle
    pub phi0: f64,
    pub theta0: f64,
    pub chi_square: f64,
    pub errors: Option<FitErrors>,
    pub fano: FanoRange,
}

impl FitResult {
    /// Complex coupling quality factor `|Qc| exp(-i phi0)`
    pub fn complex_qc(&self) -> Complex64 {
        Complex64::from_polar(self.abs_qc, -self.phi0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectionFitErrors {
    pub fr_err: f64,
    pub qc_err: f64,
    pub qr_err: f64,
    pub qi_err: f64,
}

/// Resonator parameters of a reflection port
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectionFitResult {
    pub fr: f64,
    pub qr: f64,
    pub qc: f64,
    pub qi: f64,
    pub theta0: f64,
    pub chi_square: f64,
    pub errors: Option<ReflectionFitErrors>,
    pub fano: FanoRange,
}

/// Fitted parameters of either port type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PortFit {
    Notch(FitResult),
    Reflection(ReflectionFitResult),
}

impl PortFit {
    pub fn fr(&self) -> f64 {
        match self {
            PortFit::Notch(r) => r.fr,
            PortFit::Reflection(r) => r.fr,
        }
    }

    pub fn qr(&self) -> f64 {
        match self {
            PortFit::Notch(r) => r.qr,
            PortFit::Reflection(r) => r.qr,
        }
    }

    /// Coupling quality factor used for photon number estimates
    pub fn qc(&self) -> f64 {
        match self {
            PortFit::Notch(r) => r.abs_qc,
            PortFit::Reflection(r) => r.qc,
        }
    }

    /// Internal quality factor, diameter corrected for notch ports
    pub fn qi(&self) -> f64 {
        match self {
            PortFit::Notch(r) => r.qi_dia_corr,
            PortFit::Reflection(r) => r.qi,
        }
    }

    pub fn chi_square(&self) -> f64 {
        match self {
            PortFit::Notch(r) => r.chi_square,
            PortFit::Reflection(r) => r.chi_square,
        }
    }
}

/// Lorentzian fit of `|S21|^2` for a resonator measured through itself
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionFitResult {
    pub fr: f64,
    pub qr: f64,
    /// Peak power transmission `A^2`
    pub amp_sqr: f64,
    pub fr_err: f64,
    pub qr_err: f64,
    pub amp_sqr_err: f64,
    /// `sum (|z|^2 - model)^2 / (N - 3)`
    pub chi_square: f64,
    pub converged: bool,
}

/// Every parameter of the full notch model, environment included
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntireModelParams {
    pub fr: f64,
    pub abs_qc: f64,
    pub qr: f64,
    pub phi0: f64,
    /// Cable delay in seconds
    pub delay: f64,
    pub amp_norm: f64,
    pub alpha: f64,
}

/// Joint least squares fit of [`EntireModelParams`] to raw data
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntireModelFit {
    pub params: EntireModelParams,
    /// 1-sigma uncertainties, scaled by the scatter of the residuals
    pub errors: EntireModelParams,
    /// `sum |z - model|^2 / (N - 7)`
    pub chi_square: f64,
    pub converged: bool,
}

/// Everything produced by fitting one raw sweep end to end
#[derive(Debug, Clone, PartialEq)]
pub struct Autofit {
    pub calibration: Calibration,
    pub result: PortFit,
    /// Trace in the canonical frame
    pub normalized: Vec<Complex64>,
    /// Model evaluated at every sweep frequency, in raw units
    pub model: Vec<Complex64>,
    /// Mean squared distance between `model` and the raw trace
    pub raw_chi_square: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_rejects_mismatched_lengths() {
        let err = Sweep::new(vec![1.0; 5], vec![Complex64::new(1.0, 0.0); 4]).unwrap_err();
        assert_eq!(
            err,
            FittingError::LengthMismatch {
                frequencies: 5,
                response: 4
            }
        );
    }

    #[test]
    fn sweep_rejects_short_input() {
        let err = Sweep::new(vec![1.0; 3], vec![Complex64::new(1.0, 0.0); 3]).unwrap_err();
        assert_eq!(err, FittingError::InsufficientData { needed: 4, got: 3 });
    }

    #[test]
    fn sweep_rejects_nan_frequency() {
        let f = vec![1.0, 2.0, f64::NAN, 4.0];
        assert!(matches!(
            Sweep::new(f, vec![Complex64::new(1.0, 0.0); 4]),
            Err(FittingError::InvalidInput(_))
        ));
    }

    #[test]
    fn complex_qc_carries_mismatch_angle() {
        let result = FitResult {
            fr: 5e9,
            qr: 1e4,
            abs_qc: 2e4,
            qc_dia_corr: 2e4,
            qi_dia_corr: 2e4,
            qi_no_corr: 2e4,
            phi0: 0.3,
            theta0: 0.0,
            chi_square: 0.0,
            errors: None,
            fano: FanoRange {
                b: 0.0,
                qi_min: 2e4,
                qi_max: 2e4,
                qc_min: 2e4,
                qc_max: 2e4,
            },
        };
        let qc = result.complex_qc();
        assert!((qc.norm() - 2e4).abs() < 1e-8);
        assert!((qc.arg() + 0.3).abs() < 1e-12);
    }
}
