//! Amplitude-only pre-fit of a resonance on a sloped background.
//!
//! Model (J. Gao, PhD thesis, Caltech 2008, appendix E):
//! `|S|^2 = A1 + A2 (f - fr) + (A3 + A4 (f - fr)) / (1 + 4 Qr^2 ((f - fr) / fr)^2)`
use crate::fitting::circle::fitstruct::{check_lengths, SkewedLorentzianParams};
use crate::fitting::common::error::FittingError;
use crate::fitting::common::least_squares::{FitSession, SolverConfig};
use itertools::Itertools;
use num_complex::Complex64;
use tracing::warn;

type Result<T> = std::result::Result<T, FittingError>;

const PARAMS: &[&str] = &["A1", "A2", "A3", "A4", "fr", "Qr"];
const QR_SEED: f64 = 1e3;

/// Fits the skewed Lorentzian to `|z|^2` with the default solver settings.
///
/// `is_peak` selects whether the resonance is a maximum or a minimum of `|z|`.
///
/// # Errors
/// Will return `Err` if the arrays differ in length or hold fewer than three points.
pub fn fit_skewed_lorentzian(
    f_data: &[f64],
    z_data: &[Complex64],
    is_peak: bool,
) -> Result<SkewedLorentzianParams> {
    fit_skewed_lorentzian_with(f_data, z_data, is_peak, SolverConfig::default())
}

/// [`fit_skewed_lorentzian`] with explicit solver settings
pub fn fit_skewed_lorentzian_with(
    f_data: &[f64],
    z_data: &[Complex64],
    is_peak: bool,
    config: SolverConfig,
) -> Result<SkewedLorentzianParams> {
    check_lengths(f_data, z_data, 3)?;
    let amplitude_sqr: Vec<f64> = z_data.iter().map(|z| z.norm_sqr()).collect();
    let seed = seed_params(f_data, &amplitude_sqr, is_peak);

    let residuals = |p: &[f64], deviates: &mut [f64]| {
        for (d, (&f, &y)) in deviates.iter_mut().zip(f_data.iter().zip(&amplitude_sqr)) {
            *d = y - skewed_lorentzian(f, p);
        }
    };

    // Background level, resonance amplitude and frequency stay at their seeds first, leaving
    // three parameters for a better starting point of the full fit
    let mut session = FitSession::new("skewed lorentzian", PARAMS).with_config(config);
    session.fix_only(&[0, 2, 4]);
    let first = session.solve(f_data.len(), &to_vec(&seed), residuals)?;

    session.free_all();
    if f_data.len() < session.num_params() {
        warn!(
            num_points = f_data.len(),
            "too few points for the full skewed lorentzian fit, keeping the reduced fit"
        );
        return Ok(from_slice(&first.params));
    }
    let full = session.solve(f_data.len(), &first.params, residuals)?;
    Ok(from_slice(&full.params))
}

/// Evaluates the model at frequency `f` for parameters `[A1, A2, A3, A4, fr, Qr]`
pub(crate) fn skewed_lorentzian(f: f64, p: &[f64]) -> f64 {
    let (a1, a2, a3, a4, fr, qr) = (p[0], p[1], p[2], p[3], p[4], p[5]);
    let df = f - fr;
    let x = df / fr;
    a1 + a2 * df + (a3 + a4 * df) / (1.0 + 4.0 * qr * qr * x * x)
}

/// Starting values: background from the lower endpoint, amplitude and frequency from the extremum
pub(crate) fn seed_params(
    f_data: &[f64],
    amplitude_sqr: &[f64],
    is_peak: bool,
) -> SkewedLorentzianParams {
    let first = amplitude_sqr[0];
    let last = amplitude_sqr[amplitude_sqr.len() - 1];
    let max_amp = amplitude_sqr.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let extremum = if is_peak {
        amplitude_sqr.iter().position_max_by(|a, b| a.total_cmp(b))
    } else {
        amplitude_sqr.iter().position_min_by(|a, b| a.total_cmp(b))
    }
    .unwrap_or(0);
    SkewedLorentzianParams {
        a1: first.min(last),
        a2: 0.0,
        a3: if is_peak { max_amp } else { -max_amp },
        a4: 0.0,
        fr: f_data[extremum],
        qr: QR_SEED,
    }
}

fn to_vec(p: &SkewedLorentzianParams) -> Vec<f64> {
    vec![p.a1, p.a2, p.a3, p.a4, p.fr, p.qr]
}

fn from_slice(p: &[f64]) -> SkewedLorentzianParams {
    SkewedLorentzianParams {
        a1: p[0],
        a2: p[1],
        a3: p[2],
        a4: p[3],
        fr: p[4],
        qr: p[5],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FR: f64 = 5.0e9;
    const QR: f64 = 1.0e4;

    fn frequencies() -> Vec<f64> {
        let span = 10.0 * FR / QR;
        (0..201)
            .map(|i| FR - span + 2.0 * span * i as f64 / 200.0)
            .collect()
    }

    fn lorentz(f: f64) -> f64 {
        let x = (f - FR) / FR;
        1.0 / (1.0 + 4.0 * QR * QR * x * x)
    }

    fn as_response(amp_sqr: impl Iterator<Item = f64>) -> Vec<Complex64> {
        amp_sqr.map(|a| Complex64::new(a.sqrt(), 0.0)).collect()
    }

    #[test]
    fn dip_is_recovered() {
        let f = frequencies();
        let z = as_response(f.iter().map(|&f| 0.9 - 0.6 * lorentz(f)));
        let p = fit_skewed_lorentzian(&f, &z, false).unwrap();
        assert_relative_eq!(p.fr, FR, max_relative = 1e-7);
        assert_relative_eq!(p.qr.abs(), QR, max_relative = 1e-3);
        assert_relative_eq!(p.a3, -0.6, max_relative = 1e-3);
        assert_relative_eq!(p.a1, 0.9, max_relative = 1e-3);
    }

    #[test]
    fn peak_and_dip_select_opposite_extrema() {
        let f = frequencies();
        let dip: Vec<f64> = f.iter().map(|&f| 0.7 - 0.6 * lorentz(f)).collect();
        let peak: Vec<f64> = f.iter().map(|&f| 0.1 + 0.6 * lorentz(f)).collect();
        // the extremum frequency differs from the sweep centre so the two choices are distinct
        let dip_seed = seed_params(&f, &dip, false);
        let wrong_seed = seed_params(&f, &dip, true);
        assert_eq!(dip_seed.fr, f[100]);
        assert_ne!(wrong_seed.fr, f[100]);
        assert!(dip_seed.a3 < 0.0);
        assert!(seed_params(&f, &peak, true).a3 > 0.0);

        let dip_fit = fit_skewed_lorentzian(&f, &as_response(dip.into_iter()), false).unwrap();
        let peak_fit = fit_skewed_lorentzian(&f, &as_response(peak.into_iter()), true).unwrap();
        assert_relative_eq!(dip_fit.a3.abs(), peak_fit.a3.abs(), max_relative = 1e-3);
        assert_relative_eq!(peak_fit.a3, 0.6, max_relative = 1e-3);
        assert_relative_eq!(peak_fit.fr, FR, max_relative = 1e-7);
    }

    #[test]
    fn short_sweep_keeps_reduced_fit() {
        let f = vec![FR - 1e6, FR - 1e5, FR, FR + 1e5, FR + 1e6];
        let z = as_response(f.iter().map(|&f| 1.0 - 0.5 * lorentz(f)));
        let p = fit_skewed_lorentzian(&f, &z, false).unwrap();
        assert_eq!(p.fr, FR);
    }

    #[test]
    fn mismatched_lengths() {
        let f = frequencies();
        let z = vec![Complex64::new(1.0, 0.0); 10];
        assert!(matches!(
            fit_skewed_lorentzian(&f, &z, false),
            Err(FittingError::LengthMismatch { .. })
        ));
    }
}
