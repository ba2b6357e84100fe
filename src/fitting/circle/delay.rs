//! Electrical delay of the measurement lines.
//!
//! A delay `tau` multiplies the resonator response by `exp(-2 pi i f tau)`, which bends the
//! resonance circle into a spiral. Every estimator here works on that distortion, and
//! [`remove_cable_delay`] multiplies by `exp(+2 pi i f tau)` to undo it.
use crate::fitting::circle::fitstruct::{check_lengths, PhaseSlopeFitParams};
use crate::fitting::circle::geometry::{algebraic_circle, center, MIN_CIRCLE_POINTS};
use crate::fitting::circle::phase::{phase_fit_wslope, theta0_at};
use crate::fitting::common::error::FittingError;
use crate::fitting::common::least_squares::{FitSession, SolverConfig};
use crate::fitting::common::line_fit::LineFit;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::debug;

type Result<T> = std::result::Result<T, FittingError>;

/// Residual evaluations allowed for the delay fit
pub const DELAY_FIT_MAX_FEV: usize = 200;
/// Default number of slope removal passes of [`optimize_delay`]
pub const DEFAULT_SLOPE_ITERATIONS: usize = 4;

/// The delay is solved for in nanoseconds so the solver's finite-difference step stays small
/// against a period of the sweep frequency.
const NANOSECOND: f64 = 1e-9;
const DELAY_PARAM: &[&str] = &["delay_ns"];

/// Undoes a cable delay of `delay` seconds
pub fn remove_cable_delay(f_data: &[f64], z_data: &[Complex64], delay: f64) -> Vec<Complex64> {
    f_data
        .iter()
        .zip(z_data)
        .map(|(&f, &z)| z * Complex64::from_polar(1.0, 2.0 * PI * f * delay))
        .collect()
}

/// Removes jumps larger than pi between consecutive phases by adding multiples of 2 pi
pub fn unwrap_phase(phase: &[f64]) -> Vec<f64> {
    let mut unwrapped = Vec::with_capacity(phase.len());
    let mut offset = 0.0;
    let mut previous: Option<f64> = None;
    for &p in phase {
        if let Some(prev) = previous {
            let jump = p - prev;
            if jump > PI {
                offset -= 2.0 * PI * ((jump + PI) / (2.0 * PI)).floor();
            } else if jump < -PI {
                offset += 2.0 * PI * ((PI - jump) / (2.0 * PI)).floor();
            }
        }
        previous = Some(p);
        unwrapped.push(p + offset);
    }
    unwrapped
}

/// Delay from the mean slope of the unwrapped phase, `-slope / 2 pi`.
///
/// The resonance itself adds to the phase slope, so this is only a starting value.
///
/// # Errors
/// Will return `Err` if the arrays differ in length or hold fewer than two points.
pub fn guess_delay(f_data: &[f64], z_data: &[Complex64]) -> Result<f64> {
    check_lengths(f_data, z_data, 2)?;
    let phase: Vec<f64> = z_data.iter().map(|z| z.arg()).collect();
    let line = LineFit::fit(f_data, &unwrap_phase(&phase));
    let delay = -line.slope / (2.0 * PI);
    debug!(delay, delay_err = line.slope_err / (2.0 * PI), "cable delay from phase slope");
    Ok(delay)
}

/// Tolerances of the delay fit: tighter than the default and capped at
/// [`DELAY_FIT_MAX_FEV`] evaluations
pub fn delay_fit_config(base: SolverConfig) -> SolverConfig {
    SolverConfig {
        ftol: 1e-12,
        xtol: 1e-12,
        max_fev: DELAY_FIT_MAX_FEV,
        ..base
    }
}

/// Finds the delay that makes the corrected trace most circular: for every trial delay the
/// trace is corrected, an algebraic circle is fitted, and the deviates are the distances of
/// the points from that circle.
///
/// # Errors
/// Will return `Err` if the arrays differ in length or hold fewer than three points.
pub fn fit_delay(
    f_data: &[f64],
    z_data: &[Complex64],
    delay: f64,
    config: SolverConfig,
) -> Result<f64> {
    check_lengths(f_data, z_data, MIN_CIRCLE_POINTS)?;
    let session = FitSession::new("cable delay", DELAY_PARAM).with_config(config);
    let fit = session.solve(f_data.len(), &[delay / NANOSECOND], |p, deviates| {
        let corrected = remove_cable_delay(f_data, z_data, p[0] * NANOSECOND);
        let circle = algebraic_circle(&corrected);
        let zc = circle.center();
        for (d, z) in deviates.iter_mut().zip(&corrected) {
            *d = (z - zc).norm() - circle.r0;
        }
    })?;
    let fitted = fit.params[0] * NANOSECOND;
    debug!(seed = delay, delay = fitted, "cable delay fitted");
    Ok(fitted)
}

/// Removes the delay by repeatedly fitting the residual linear phase slope of the centred
/// trace and stepping the delay against it.
///
/// A residual delay `tau - delay` rotates the trace about the origin by `2 pi f (tau - delay)`.
/// Seen from the circle centre that rotation is magnified by up to `(|zc| + r0) / r0`, so each
/// pass adds `slope r0 / (2 pi (|zc| + r0))`. For a circle through the origin this is
/// `slope / 4 pi`. The step never overshoots, so passes converge monotonically.
///
/// `qr` and `fr` seed the phase fits and `theta0` is read off the trace at `fr`. `iterations`
/// counts the slope fits; at least one is done.
///
/// # Errors
/// Will return `Err` if the arrays differ in length, hold fewer than four points, or the
/// corrected trace collapses to a point.
pub fn optimize_delay(
    f_data: &[f64],
    z_data: &[Complex64],
    qr: f64,
    fr: f64,
    iterations: usize,
    config: SolverConfig,
) -> Result<f64> {
    check_lengths(f_data, z_data, 4)?;

    let mut delay = 0.0;
    for _ in 0..iterations.max(1) {
        let corrected = remove_cable_delay(f_data, z_data, delay);
        let circle = algebraic_circle(&corrected);
        let centered = center(&corrected, circle.center());
        let seed = PhaseSlopeFitParams {
            theta0: theta0_at(f_data, &centered, fr),
            qr,
            fr,
            slope: 0.0,
        };
        let fit = phase_fit_wslope(f_data, &centered, seed, config)?;

        let gain = (circle.center().norm() + circle.r0) / circle.r0;
        if !(gain.is_finite() && circle.r0 > 0.0) {
            Err(FittingError::BadFit(format!(
                "no circle left to remove the delay from (r0 = {})",
                circle.r0
            )))?
        }
        delay += fit.slope / (2.0 * PI * gain);
        debug!(delay, slope = fit.slope, gain, "phase slope removal pass");
    }
    Ok(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::circle::port::s21_notch;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const FR: f64 = 5.0e9;
    const QR: f64 = 1.0e4;
    const DELAY: f64 = 30e-9;

    fn delayed_notch(delay: f64) -> (Vec<f64>, Vec<Complex64>) {
        let f: Vec<f64> = (0..401).map(|i| FR - 4e6 + 2e4 * i as f64).collect();
        let z = f
            .iter()
            .map(|&f| s21_notch(f, FR, QR, 2.0e4, 0.2, 0.8, 1.1, delay))
            .collect();
        (f, z)
    }

    #[test]
    fn removing_the_delay_restores_the_circle() {
        let (f, z) = delayed_notch(DELAY);
        let (_, clean) = delayed_notch(0.0);
        let corrected = remove_cable_delay(&f, &z, DELAY);
        for (a, b) in corrected.iter().zip(&clean) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn unwrap_follows_a_steady_ramp() {
        let ramp: Vec<f64> = (0..50).map(|i| 0.4 * i as f64).collect();
        let wrapped: Vec<f64> = ramp
            .iter()
            .map(|p| Complex64::from_polar(1.0, *p).arg())
            .collect();
        for (u, r) in unwrap_phase(&wrapped).iter().zip(&ramp) {
            assert_abs_diff_eq!(u, r, epsilon = 1e-9);
        }
    }

    #[test]
    fn guess_is_close_and_fit_is_exact() {
        let (f, z) = delayed_notch(DELAY);
        let guess = guess_delay(&f, &z).unwrap();
        assert!((guess - DELAY).abs() < 0.5 * DELAY);
        let fitted = fit_delay(&f, &z, guess, delay_fit_config(SolverConfig::default())).unwrap();
        assert_relative_eq!(fitted, DELAY, max_relative = 1e-4);
    }

    #[test]
    fn slope_removal_recovers_injected_delay() {
        let (f, z) = delayed_notch(DELAY);
        let delay = optimize_delay(&f, &z, QR, FR, 8, SolverConfig::default()).unwrap();
        assert_relative_eq!(delay, DELAY, max_relative = 0.02);

        // a single pass already moves towards the injected delay
        let one = optimize_delay(&f, &z, QR, FR, 1, SolverConfig::default()).unwrap();
        assert!(one > 0.0, "first pass went to {one}");
    }

    #[test]
    fn slope_removal_leaves_clean_data_alone() {
        let (f, z) = delayed_notch(0.0);
        let delay = optimize_delay(&f, &z, QR, FR, DEFAULT_SLOPE_ITERATIONS, SolverConfig::default())
            .unwrap();
        assert!(delay.abs() < 1e-12);
    }
}
