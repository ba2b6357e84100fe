//! Fits of the phase response around the resonance circle.
//!
//! The centred phase follows `theta(f) = theta0 + 2 atan(2 Qr (1 - f / fr))`. `theta0`, `Qr` and
//! `fr` are strongly correlated, so a joint fit from a rough seed tends to stall in a local
//! minimum. [`phase_fit`] therefore refines them in stages before the final joint fit.
use crate::fitting::circle::fitstruct::{check_lengths, PhaseFitParams, PhaseSlopeFitParams};
use crate::fitting::circle::geometry::wrap_angle;
use crate::fitting::common::error::FittingError;
use crate::fitting::common::least_squares::{FitSession, SolverConfig};
use itertools::Itertools;
use num_complex::Complex64;

type Result<T> = std::result::Result<T, FittingError>;

pub const MIN_PHASE_POINTS: usize = 3;

const PARAMS: &[&str] = &["theta0", "Qr", "fr"];
const SLOPE_PARAMS: &[&str] = &["theta0", "Qr", "fr", "slope"];

const THETA0: usize = 0;
const QR: usize = 1;
const FR: usize = 2;

/// Held-fixed parameters of each stage, in order
const STAGES: [&[usize]; 5] = [&[QR], &[THETA0], &[THETA0, QR], &[THETA0, FR], &[]];

pub(crate) fn phase_model(f: f64, theta0: f64, qr: f64, fr: f64) -> f64 {
    theta0 + 2.0 * (2.0 * qr * (1.0 - f / fr)).atan()
}

/// Phase of the centred trace at the sample closest to `fr`, where the resonance term of the
/// model vanishes. A starting value for `theta0`.
pub fn theta0_at(f_data: &[f64], centered: &[Complex64], fr: f64) -> f64 {
    f_data
        .iter()
        .position_min_by(|a, b| (*a - fr).abs().total_cmp(&(*b - fr).abs()))
        .and_then(|i| centered.get(i))
        .map_or(0.0, |z| z.arg())
}

/// Staged fit of the phase of centred data with the default solver settings.
///
/// # Errors
/// Will return `Err` if the arrays differ in length or hold fewer than three points.
pub fn phase_fit(
    f_data: &[f64],
    z_data: &[Complex64],
    theta0: f64,
    qr: f64,
    fr: f64,
) -> Result<PhaseFitParams> {
    phase_fit_with(f_data, z_data, theta0, qr, fr, SolverConfig::default())
}

/// [`phase_fit`] with explicit solver settings.
///
/// Stages:
/// 1. `Qr` fixed, fit `theta0` and `fr`
/// 2. `theta0` fixed, fit `Qr` and `fr`
/// 3. fit `fr` alone
/// 4. fit `Qr` alone
/// 5. fit all three
///
/// Each stage starts where the previous one stopped. A stage that fails to converge is logged by
/// the solver and its last iterate is carried forward.
pub fn phase_fit_with(
    f_data: &[f64],
    z_data: &[Complex64],
    theta0: f64,
    qr: f64,
    fr: f64,
    config: SolverConfig,
) -> Result<PhaseFitParams> {
    check_lengths(f_data, z_data, MIN_PHASE_POINTS)?;
    let phase: Vec<f64> = z_data.iter().map(|z| z.arg()).collect();
    let residuals = |p: &[f64], deviates: &mut [f64]| {
        for (d, (&f, &y)) in deviates.iter_mut().zip(f_data.iter().zip(&phase)) {
            *d = wrap_angle(y - phase_model(f, p[THETA0], p[QR], p[FR]));
        }
    };

    let mut session = FitSession::new("phase fit", PARAMS).with_config(config);
    let mut params = vec![theta0, qr, fr];
    for fixed in STAGES {
        session.fix_only(fixed);
        params = session.solve(f_data.len(), &params, residuals)?.params;
    }
    Ok(PhaseFitParams {
        theta0: params[THETA0],
        qr: params[QR],
        fr: params[FR],
    })
}

/// Joint fit of `theta0 + 2 atan(2 Qr (1 - f / fr)) - slope * f`, for traces whose cable delay
/// has not been removed completely.
///
/// # Errors
/// Will return `Err` if the arrays differ in length or hold fewer than four points.
pub fn phase_fit_wslope(
    f_data: &[f64],
    z_data: &[Complex64],
    seed: PhaseSlopeFitParams,
    config: SolverConfig,
) -> Result<PhaseSlopeFitParams> {
    check_lengths(f_data, z_data, SLOPE_PARAMS.len())?;
    let phase: Vec<f64> = z_data.iter().map(|z| z.arg()).collect();

    // The slope is fitted as a phase change across half the sweep, against a frequency offset
    // in [-1, 1]. In rad/Hz the solver's finite-difference step would wrap the phase.
    let (f_min, f_max) = f_data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &f| (lo.min(f), hi.max(f)));
    let f_mid = 0.5 * (f_min + f_max);
    let half_span = if f_max > f_min { 0.5 * (f_max - f_min) } else { 1.0 };
    let offsets: Vec<f64> = f_data.iter().map(|f| (f - f_mid) / half_span).collect();

    let session = FitSession::new("phase fit with slope", SLOPE_PARAMS).with_config(config);
    let fit = session.solve(
        f_data.len(),
        &[
            seed.theta0 - seed.slope * f_mid,
            seed.qr,
            seed.fr,
            seed.slope * half_span,
        ],
        |p, deviates| {
            let points = f_data.iter().zip(&offsets).zip(&phase);
            for (d, ((&f, &u), &y)) in deviates.iter_mut().zip(points) {
                let model = phase_model(f, p[0], p[1], p[2]) - p[3] * u;
                *d = wrap_angle(y - model);
            }
        },
    )?;
    let slope = fit.params[3] / half_span;
    Ok(PhaseSlopeFitParams {
        theta0: fit.params[0] + slope * f_mid,
        qr: fit.params[1],
        fr: fit.params[2],
        slope,
    })
}
