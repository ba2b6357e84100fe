use crate::fitting::circle::calibration::{
    add_slope, do_calibration, do_normalization, remove_slope,
};
use crate::fitting::circle::fitstruct::{
    Autofit, Calibration, EntireModelFit, EntireModelParams, FitConfig, PortFit, PortType, Sweep,
};
use crate::fitting::circle::port::{circlefit_port, s11_reflection, s21_notch};
use crate::fitting::common::error::FittingError;
use crate::fitting::common::least_squares::{FitSession, SolverConfig};
use crate::utils::constants::HBAR;
use crate::utils::units::PowerUnit;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, FittingError>;

const ENTIRE_MODEL: &[&str] = &["fr", "absQc", "Qr", "phi0", "delay_ns", "a", "alpha"];
const NANOSECOND: f64 = 1e-9;

/// Calibrates, normalizes and circle fits a raw sweep.
///
/// The returned model curve is the fitted resonator put back into the raw frame, so
/// `raw_chi_square` measures the whole pipeline against the input.
///
/// # Errors
/// Will return `Err` if any stage rejects its input, e.g. an all-zero response.
pub fn autofit(sweep: &Sweep, config: &FitConfig) -> Result<Autofit> {
    let (f_data, z_data) = (sweep.frequencies(), sweep.response());
    let calibration = do_calibration(f_data, z_data, config)?;
    let normalized = do_normalization(f_data, z_data, &calibration, config.port);
    let result = circlefit_port(
        f_data,
        &normalized,
        Some(calibration.fr),
        Some(calibration.qr),
        config,
    )?;

    let model = model_curve(f_data, &calibration, &result);
    let raw_chi_square = model
        .iter()
        .zip(z_data)
        .map(|(m, z)| (m - z).norm_sqr())
        .sum::<f64>()
        / z_data.len() as f64;
    info!(
        fr = result.fr(),
        qr = result.qr(),
        qc = result.qc(),
        qi = result.qi(),
        raw_chi_square,
        "resonator fitted"
    );

    Ok(Autofit {
        calibration,
        result,
        normalized,
        model,
        raw_chi_square,
    })
}

/// The fitted resonator in the raw frame: environment, delay and background slope restored
pub fn model_curve(f_data: &[f64], calibration: &Calibration, result: &PortFit) -> Vec<Complex64> {
    let (a, alpha, delay) = (calibration.amp_norm, calibration.alpha, calibration.delay);
    let (model, port): (Vec<Complex64>, PortType) = match result {
        PortFit::Notch(r) => (
            f_data
                .iter()
                .map(|&f| s21_notch(f, r.fr, r.qr, r.abs_qc, r.phi0, a, alpha, delay))
                .collect(),
            PortType::Notch,
        ),
        PortFit::Reflection(r) => (
            f_data
                .iter()
                .map(|&f| s11_reflection(f, r.fr, r.qr, r.qc, a, alpha, delay))
                .collect(),
            PortType::Reflection,
        ),
    };
    add_slope(f_data, &model, calibration.slope, calibration.fr_cal, port)
}

/// Fits all seven notch parameters at once to the raw data, starting from an [`Autofit`].
///
/// Only useful once the circle fit is close; from a poor start the joint fit wanders.
///
/// # Errors
/// Will return `Err` for a reflection fit, or if the sweep has fewer than four points.
pub fn fit_entire_model(
    sweep: &Sweep,
    seed: &Autofit,
    config: SolverConfig,
) -> Result<EntireModelFit> {
    let PortFit::Notch(notch) = seed.result else {
        return Err(FittingError::InvalidInput(
            "the full model fit needs a notch port fit".to_string(),
        ));
    };
    let cal = &seed.calibration;
    let (f_data, z_data) = (sweep.frequencies(), sweep.response());
    // the background slope is not part of the model
    let z_data = remove_slope(f_data, z_data, cal.slope, cal.fr_cal, PortType::Notch);

    let p0 = [
        notch.fr,
        notch.abs_qc,
        notch.qr,
        notch.phi0,
        cal.delay / NANOSECOND,
        cal.amp_norm,
        cal.alpha,
    ];
    let session = FitSession::new("entire notch model", ENTIRE_MODEL).with_config(config);
    let fit = session.solve(2 * f_data.len(), &p0, |p, deviates| {
        let (re, im) = deviates.split_at_mut(f_data.len());
        for (i, (&f, z)) in f_data.iter().zip(&z_data).enumerate() {
            let u = z - s21_notch(f, p[0], p[2], p[1], p[3], p[5], p[6], p[4] * NANOSECOND);
            re[i] = u.re;
            im[i] = u.im;
        }
    })?;

    let num_points = f_data.len();
    let dof = (2 * num_points).saturating_sub(ENTIRE_MODEL.len()).max(1);
    let scatter = (fit.chi_squared / dof as f64).sqrt();
    let e = |i: usize| fit.xerror.get(i).copied().unwrap_or(f64::NAN) * scatter;
    let p = &fit.params;
    if !fit.converged {
        warn!("full model fit did not converge");
    }
    Ok(EntireModelFit {
        params: EntireModelParams {
            fr: p[0],
            abs_qc: p[1],
            qr: p[2],
            phi0: p[3],
            delay: p[4] * NANOSECOND,
            amp_norm: p[5],
            alpha: p[6],
        },
        errors: EntireModelParams {
            fr: e(0),
            abs_qc: e(1),
            qr: e(2),
            phi0: e(3),
            delay: e(4) * NANOSECOND,
            amp_norm: e(5),
            alpha: e(6),
        },
        chi_square: fit.chi_squared / num_points.saturating_sub(ENTIRE_MODEL.len()).max(1) as f64,
        converged: fit.converged,
    })
}

/// Photon loss rates `(fr, k_c, k_i)` in Hz
fn loss_rates(result: &PortFit) -> (f64, f64, f64) {
    let fr = result.fr();
    (fr, fr / result.qc(), fr / result.qi())
}

/// Input power that keeps one photon in the resonator on average
pub fn single_photon_limit(result: &PortFit, unit: PowerUnit) -> f64 {
    let (fr, k_c, k_i) = loss_rates(result);
    let watt = 2.0 * PI * HBAR * fr * (k_c + k_i).powi(2) / (4.0 * k_c);
    unit.watt_into(watt)
}

/// Mean photon number in the resonator for an input power given in `unit`
pub fn photons_in_resonator(result: &PortFit, power: f64, unit: PowerUnit) -> f64 {
    let (fr, k_c, k_i) = loss_rates(result);
    4.0 * k_c / (2.0 * PI * HBAR * fr * (k_c + k_i).powi(2)) * unit.to_watt(power)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::circle::fitstruct::{DelayMode, ReflectionFitResult};
    use crate::fitting::circle::port::fano_range;
    use approx::assert_relative_eq;

    const FR: f64 = 6.2e9;
    const QR: f64 = 9.0e3;
    const ABS_QC: f64 = 1.5e4;
    const PHI0: f64 = 0.12;

    fn raw_sweep(delay: f64) -> Sweep {
        let span = 6.0 * FR / QR;
        let f: Vec<f64> = (0..301)
            .map(|i| FR - span + 2.0 * span * i as f64 / 300.0)
            .collect();
        let z = f
            .iter()
            .map(|&f| s21_notch(f, FR, QR, ABS_QC, PHI0, 0.2, 0.7, delay))
            .collect();
        Sweep::new(f, z).unwrap()
    }

    #[test]
    fn autofit_recovers_notch_parameters() {
        let sweep = raw_sweep(0.0);
        let fit = autofit(&sweep, &FitConfig::default()).unwrap();
        let PortFit::Notch(result) = fit.result else {
            panic!("expected a notch result")
        };
        assert_relative_eq!(result.fr, FR, max_relative = 1e-8);
        assert_relative_eq!(result.qr, QR, max_relative = 1e-4);
        assert_relative_eq!(result.abs_qc, ABS_QC, max_relative = 1e-4);
        assert_relative_eq!(result.phi0, PHI0, epsilon = 1e-5);
        assert!(fit.raw_chi_square < 1e-12);
        assert_eq!(fit.model.len(), sweep.len());
    }

    #[test]
    fn entire_model_fit_keeps_a_good_start() {
        let sweep = raw_sweep(20e-9);
        let config = FitConfig {
            delay: DelayMode::Fit { guess: true },
            ..Default::default()
        };
        let seed = autofit(&sweep, &config).unwrap();
        let full = fit_entire_model(&sweep, &seed, SolverConfig::default()).unwrap();
        assert_relative_eq!(full.params.fr, FR, max_relative = 1e-8);
        assert_relative_eq!(full.params.qr, QR, max_relative = 1e-4);
        assert_relative_eq!(full.params.delay, 20e-9, max_relative = 1e-4);
        assert_relative_eq!(full.params.amp_norm, 0.2, max_relative = 1e-4);
        assert!(full.chi_square < 1e-12);
    }

    #[test]
    fn entire_model_needs_notch() {
        let sweep = raw_sweep(0.0);
        let mut seed = autofit(&sweep, &FitConfig::default()).unwrap();
        seed.result = PortFit::Reflection(ReflectionFitResult {
            fr: FR,
            qr: QR,
            qc: ABS_QC,
            qi: 2.0 * QR,
            theta0: 0.0,
            chi_square: 0.0,
            errors: None,
            fano: fano_range(0.5, 0.0, QR, PortType::Reflection, 15.0),
        });
        assert!(matches!(
            fit_entire_model(&sweep, &seed, SolverConfig::default()),
            Err(FittingError::InvalidInput(_))
        ));
    }

    #[test]
    fn single_photon_limit_holds_one_photon() {
        let fit = autofit(&raw_sweep(0.0), &FitConfig::default()).unwrap();
        for unit in [PowerUnit::Dbm, PowerUnit::Watt] {
            let power = single_photon_limit(&fit.result, unit);
            assert_relative_eq!(
                photons_in_resonator(&fit.result, power, unit),
                1.0,
                max_relative = 1e-9
            );
        }
        // a few GHz resonator with Q ~ 1e4 reaches one photon far below a femtowatt
        assert!(single_photon_limit(&fit.result, PowerUnit::Watt) < 1e-15);
    }
}
