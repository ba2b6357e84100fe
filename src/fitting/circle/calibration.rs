//! Moves a raw trace into the canonical frame, where the off-resonant point sits at `1` (notch)
//! or `-1` (reflection) and the cable delay is gone.
use crate::fitting::circle::delay::{
    delay_fit_config, fit_delay, guess_delay, optimize_delay, remove_cable_delay,
};
use crate::fitting::circle::fitstruct::{
    check_lengths, Calibration, DelayMode, FitConfig, PortType, MIN_SWEEP_POINTS,
};
use crate::fitting::circle::geometry::{center, fit_circle, periodic_boundary};
use crate::fitting::circle::lorentzian::fit_skewed_lorentzian_with;
use crate::fitting::circle::phase::{phase_fit_with, theta0_at};
use crate::fitting::common::error::FittingError;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::debug;

type Result<T> = std::result::Result<T, FittingError>;

/// Finds the delay, the off-resonant point and seeds for `fr` and `Qr`.
///
/// The trace is scaled by its largest magnitude, the skewed Lorentzian gives `fr` and `Qr` seeds,
/// the delay is resolved according to `config.delay`, and the off-resonant point is read from a
/// circle and phase fit of the corrected trace.
///
/// `slope` in the result is in the units the port subtracts it in: response units per Hz for a
/// notch port, squared magnitude per Hz for a reflection port. It is zero with `ignore_slope`.
///
/// # Errors
/// Will return `Err` if the arrays differ in length, hold fewer than four points, or the response
/// is zero everywhere.
pub fn do_calibration(
    f_data: &[f64],
    z_data: &[Complex64],
    config: &FitConfig,
) -> Result<Calibration> {
    check_lengths(f_data, z_data, MIN_SWEEP_POINTS)?;
    let scale = z_data.iter().map(|z| z.norm()).fold(0.0, f64::max);
    if !(scale.is_finite() && scale > 0.0) {
        Err(FittingError::InvalidInput(format!(
            "cannot calibrate a response with peak magnitude {scale}"
        )))?
    }
    let scaled: Vec<Complex64> = z_data.iter().map(|z| z / scale).collect();

    let lorentzian = fit_skewed_lorentzian_with(f_data, &scaled, config.is_peak, config.solver)?;
    let fr_cal = lorentzian.fr;
    let slope = if config.ignore_slope {
        0.0
    } else {
        match config.port {
            PortType::Notch => lorentzian.a2 * scale,
            PortType::Reflection => lorentzian.a2 * scale * scale,
        }
    };
    let detrended: Vec<Complex64> = remove_slope(f_data, z_data, slope, fr_cal, config.port)
        .into_iter()
        .map(|z| z / scale)
        .collect();

    let delay = match config.delay {
        DelayMode::Fixed(delay) => delay,
        DelayMode::Fit { guess } => {
            let seed = if guess {
                guess_delay(f_data, &detrended)?
            } else {
                0.0
            };
            fit_delay(f_data, &detrended, seed, delay_fit_config(config.solver))?
        }
        DelayMode::PhaseSlope { iterations } => optimize_delay(
            f_data,
            &detrended,
            lorentzian.qr.abs(),
            fr_cal,
            iterations,
            config.solver,
        )?,
    };

    let corrected = remove_cable_delay(f_data, &detrended, delay);
    let circle = fit_circle(&corrected, false)?;
    let zc = circle.center();
    let centered = center(&corrected, zc);
    let theta0 = theta0_at(f_data, &centered, fr_cal);
    let phase = phase_fit_with(
        f_data,
        &centered,
        theta0,
        lorentzian.qr.abs(),
        fr_cal,
        config.solver,
    )?;

    // Far from resonance the centred phase approaches theta0 + pi
    let beta = periodic_boundary(phase.theta0 + PI, PI);
    let off_resonant = scale * (zc + Complex64::from_polar(circle.r0, beta));
    let (amp_norm, alpha) = match config.port {
        PortType::Notch => (off_resonant.norm(), off_resonant.arg()),
        PortType::Reflection => (
            scale * (circle.r0 + zc.norm()),
            periodic_boundary(off_resonant.arg() + PI, PI),
        ),
    };

    let calibration = Calibration {
        delay,
        amp_norm,
        alpha,
        fr: phase.fr,
        qr: phase.qr,
        slope,
        fr_cal,
    };
    debug!(?calibration, "calibration finished");
    Ok(calibration)
}

/// Applies a calibration: removes slope, delay, amplitude and phase offset.
///
/// Normalizing with [`Calibration::identity`] returns the data unchanged.
pub fn do_normalization(
    f_data: &[f64],
    z_data: &[Complex64],
    calibration: &Calibration,
    port: PortType,
) -> Vec<Complex64> {
    remove_slope(f_data, z_data, calibration.slope, calibration.fr_cal, port)
        .into_iter()
        .zip(f_data)
        .map(|(z, &f)| {
            z / calibration.amp_norm
                * Complex64::from_polar(1.0, -calibration.alpha + 2.0 * PI * calibration.delay * f)
        })
        .collect()
}

/// Notch ports lose `slope (f - fr_cal)` from the complex response, reflection ports from `|z|^2`
pub(crate) fn remove_slope(
    f_data: &[f64],
    z_data: &[Complex64],
    slope: f64,
    fr_cal: f64,
    port: PortType,
) -> Vec<Complex64> {
    if slope == 0.0 {
        return z_data.to_vec();
    }
    f_data
        .iter()
        .zip(z_data)
        .map(|(&f, &z)| match port {
            PortType::Notch => z - slope * (f - fr_cal),
            PortType::Reflection => {
                let magnitude = (z.norm_sqr() - slope * (f - fr_cal)).max(0.0).sqrt();
                Complex64::from_polar(magnitude, z.arg())
            }
        })
        .collect()
}

/// Inverse of [`remove_slope`]
pub(crate) fn add_slope(
    f_data: &[f64],
    z_data: &[Complex64],
    slope: f64,
    fr_cal: f64,
    port: PortType,
) -> Vec<Complex64> {
    if slope == 0.0 {
        return z_data.to_vec();
    }
    f_data
        .iter()
        .zip(z_data)
        .map(|(&f, &z)| match port {
            PortType::Notch => z + slope * (f - fr_cal),
            PortType::Reflection => {
                let magnitude = (z.norm_sqr() + slope * (f - fr_cal)).max(0.0).sqrt();
                Complex64::from_polar(magnitude, z.arg())
            }
        })
        .collect()
}
