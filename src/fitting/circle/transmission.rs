//! Resonators measured through themselves, where the resonance is a peak in transmission.
//!
//! Only the power transmission carries the resonance here, so no circle is fitted:
//! `|S21|^2 = A^2 / (1 + 4 Qr^2 ((f - fr) / fr)^2)`.
use crate::fitting::circle::fitstruct::{check_lengths, TransmissionFitResult};
use crate::fitting::common::error::FittingError;
use crate::fitting::common::least_squares::{FitSession, SolverConfig};
use itertools::Itertools;
use num_complex::Complex64;
use tracing::debug;

type Result<T> = std::result::Result<T, FittingError>;

const PARAMS: &[&str] = &["fr", "Qr", "A^2"];
const QR_SEED: f64 = 1e3;

pub fn lorentzian_sqr(f: f64, fr: f64, qr: f64, amp_sqr: f64) -> f64 {
    let x = (f - fr) / fr;
    amp_sqr / (1.0 + 4.0 * qr * qr * x * x)
}

/// Fits the Lorentzian to `|z|^2`.
///
/// Seeds are the frequency and height of the largest sample and the loaded Q from the width at
/// half maximum. Uncertainties are the solver errors scaled by the scatter of the residuals.
///
/// # Errors
/// Will return `Err` if the arrays differ in length or hold fewer than three points.
pub fn fit_transmission(
    f_data: &[f64],
    z_data: &[Complex64],
    config: SolverConfig,
) -> Result<TransmissionFitResult> {
    check_lengths(f_data, z_data, PARAMS.len())?;
    let amplitude_sqr: Vec<f64> = z_data.iter().map(|z| z.norm_sqr()).collect();
    let peak = amplitude_sqr
        .iter()
        .position_max_by(|a, b| a.total_cmp(b))
        .unwrap_or(0);
    let (fr, amp_sqr) = (f_data[peak], amplitude_sqr[peak]);
    let seed = [fr, half_width_qr(f_data, &amplitude_sqr, fr, amp_sqr), amp_sqr];

    let session = FitSession::new("transmission lorentzian", PARAMS).with_config(config);
    let fit = session.solve(f_data.len(), &seed, |p, deviates| {
        for (d, (&f, &y)) in deviates.iter_mut().zip(f_data.iter().zip(&amplitude_sqr)) {
            *d = y - lorentzian_sqr(f, p[0], p[1], p[2]);
        }
    })?;

    let dof = f_data.len().saturating_sub(PARAMS.len()).max(1) as f64;
    let chi_square = fit.chi_squared / dof;
    let e = |i: usize| fit.xerror.get(i).copied().unwrap_or(f64::NAN) * chi_square.sqrt();
    let result = TransmissionFitResult {
        fr: fit.params[0],
        // the model only sees Qr^2
        qr: fit.params[1].abs(),
        amp_sqr: fit.params[2],
        fr_err: e(0),
        qr_err: e(1),
        amp_sqr_err: e(2),
        chi_square,
        converged: fit.converged,
    };
    debug!(?result, "transmission fit");
    Ok(result)
}

/// `fr / FWHM` from the samples above half the peak, [`QR_SEED`] if the peak is a single sample
fn half_width_qr(f_data: &[f64], amplitude_sqr: &[f64], fr: f64, peak: f64) -> f64 {
    let above = f_data
        .iter()
        .zip(amplitude_sqr)
        .filter(|(_, a)| **a >= 0.5 * peak)
        .map(|(&f, _)| f);
    match above.minmax().into_option() {
        Some((lo, hi)) if hi > lo => fr / (hi - lo),
        _ => QR_SEED,
    }
}
