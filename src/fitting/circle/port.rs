//! Resonator parameters from normalized data, for notch and reflection ports.
//!
//! References:
//! - J. Gao, "The Physics of Superconducting Microwave Resonators", PhD thesis, Caltech (2008)
//! - M. S. Khalil et al., J. Appl. Phys. 111, 054510 (2012), diameter correction
//! - S. Probst et al., Rev. Sci. Instrum. 86, 024706 (2015)
//! - M. Rieger, S. Guenzler et al., arXiv:2209.03036 (2022), Fano ranges
use crate::fitting::circle::fitstruct::{
    check_lengths, FanoRange, FitConfig, FitErrors, FitResult, PortFit, PortType,
    ReflectionFitErrors, ReflectionFitResult, MIN_SWEEP_POINTS,
};
use crate::fitting::circle::geometry::{center, fit_circle, periodic_boundary};
use crate::fitting::circle::phase::{phase_fit_with, theta0_at};
use crate::fitting::common::error::FittingError;
use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, FittingError>;

/// Loaded Q seed when none is given
pub const DEFAULT_QR_SEED: f64 = 1e6;

const I: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Full notch model including the environment:
/// `a e^(i alpha) e^(-2 pi i f delay) (1 - (Qr / |Qc|) e^(i phi0) / (1 + 2 i Qr (f - fr) / fr))`
#[allow(clippy::too_many_arguments)]
pub fn s21_notch(
    f: f64,
    fr: f64,
    qr: f64,
    abs_qc: f64,
    phi0: f64,
    amp_norm: f64,
    alpha: f64,
    delay: f64,
) -> Complex64 {
    environment(f, amp_norm, alpha, delay) * s21_notch_ideal(f, fr, qr, abs_qc, phi0)
}

/// Notch response in the canonical frame
pub fn s21_notch_ideal(f: f64, fr: f64, qr: f64, abs_qc: f64, phi0: f64) -> Complex64 {
    1.0 - Complex64::from_polar(qr / abs_qc, phi0) / Complex64::new(1.0, 2.0 * qr * (f - fr) / fr)
}

/// Full model of a directly coupled reflection port
pub fn s11_reflection(
    f: f64,
    fr: f64,
    qr: f64,
    qc: f64,
    amp_norm: f64,
    alpha: f64,
    delay: f64,
) -> Complex64 {
    environment(f, amp_norm, alpha, delay) * s11_reflection_ideal(f, fr, qr, qc)
}

/// Reflection response in the canonical frame, `-1` far from resonance
pub fn s11_reflection_ideal(f: f64, fr: f64, qr: f64, qc: f64) -> Complex64 {
    let detuning = 2.0 * qr * (fr - f) / fr;
    Complex64::new(2.0 * qr / qc - 1.0, detuning) / Complex64::new(1.0, -detuning)
}

fn environment(f: f64, amp_norm: f64, alpha: f64, delay: f64) -> Complex64 {
    Complex64::from_polar(amp_norm, alpha - 2.0 * PI * f * delay)
}

/// Fits normalized data of the port selected by `config.port`
///
/// # Errors
/// See [`circlefit`].
pub fn circlefit_port(
    f_data: &[f64],
    z_data: &[Complex64],
    fr: Option<f64>,
    qr: Option<f64>,
    config: &FitConfig,
) -> Result<PortFit> {
    match config.port {
        PortType::Notch => circlefit(f_data, z_data, fr, qr, config).map(PortFit::Notch),
        PortType::Reflection => {
            circlefit_reflection(f_data, z_data, fr, qr, config).map(PortFit::Reflection)
        }
    }
}

/// Circle fit of normalized notch data.
///
/// `fr` defaults to the frequency of the deepest point and `qr` to [`DEFAULT_QR_SEED`]. The
/// circle diameter gives `Qr / |Qc|`, the position of its centre the mismatch angle `phi0`, and
/// the phase fit around the centre the final `fr` and `Qr`.
///
/// # Errors
/// Will return `Err` if the arrays differ in length or hold fewer than four points. Poor fits
/// are not errors; they show up in `chi_square`.
pub fn circlefit(
    f_data: &[f64],
    z_data: &[Complex64],
    fr: Option<f64>,
    qr: Option<f64>,
    config: &FitConfig,
) -> Result<FitResult> {
    check_lengths(f_data, z_data, MIN_SWEEP_POINTS)?;
    let fr_seed = fr.unwrap_or_else(|| deepest_point(f_data, z_data));
    let qr_seed = qr.unwrap_or(DEFAULT_QR_SEED);

    let circle = fit_circle(z_data, config.refine_results)?;
    let phi0 = -(circle.yc / circle.r0).clamp(-1.0, 1.0).asin();
    let theta0 = periodic_boundary(phi0 + PI, PI);
    let centered = center(z_data, circle.center());
    let phase = phase_fit_with(f_data, &centered, theta0, qr_seed, fr_seed, config.solver)?;

    let qr = phase.qr;
    let abs_qc = qr / (2.0 * circle.r0);
    let complex_qc = Complex64::from_polar(abs_qc, -phi0);
    let qc_dia_corr = 1.0 / complex_qc.inv().re;
    let qi_dia_corr = 1.0 / (1.0 / qr - 1.0 / qc_dia_corr);
    let qi_no_corr = 1.0 / (1.0 / qr - 1.0 / abs_qc);

    let residuals: Vec<Complex64> = f_data
        .iter()
        .zip(z_data)
        .map(|(&f, &z)| z - s21_notch_ideal(f, phase.fr, qr, abs_qc, phi0))
        .collect();
    let chi_square = reduced_chi_square(&residuals, 4);

    let errors = if config.calc_errors {
        notch_errors(f_data, &residuals, phase.fr, abs_qc, qr, phi0, chi_square)
    } else {
        None
    };

    let result = FitResult {
        fr: phase.fr,
        qr,
        abs_qc,
        qc_dia_corr,
        qi_dia_corr,
        qi_no_corr,
        phi0,
        theta0: phase.theta0,
        chi_square,
        errors,
        fano: fano_range(circle.r0, phi0, qr, PortType::Notch, config.isolation_db),
    };
    debug!(?result, "notch circle fit");
    Ok(result)
}

/// Circle fit of normalized reflection data: `Qi = Qr / (1 - r0)` and `1 / Qc = 1 / Qr - 1 / Qi`.
///
/// # Errors
/// Will return `Err` if the arrays differ in length or hold fewer than four points.
pub fn circlefit_reflection(
    f_data: &[f64],
    z_data: &[Complex64],
    fr: Option<f64>,
    qr: Option<f64>,
    config: &FitConfig,
) -> Result<ReflectionFitResult> {
    check_lengths(f_data, z_data, MIN_SWEEP_POINTS)?;
    let fr_seed = fr.unwrap_or_else(|| deepest_point(f_data, z_data));
    let qr_seed = qr.unwrap_or(DEFAULT_QR_SEED);

    let circle = fit_circle(z_data, config.refine_results)?;
    let centered = center(z_data, circle.center());
    let theta0 = theta0_at(f_data, &centered, fr_seed);
    let phase = phase_fit_with(f_data, &centered, theta0, qr_seed, fr_seed, config.solver)?;

    let qr = phase.qr;
    let qi = qr / (1.0 - circle.r0);
    let qc = 1.0 / (1.0 / qr - 1.0 / qi);

    let residuals: Vec<Complex64> = f_data
        .iter()
        .zip(z_data)
        .map(|(&f, &z)| z - s11_reflection_ideal(f, phase.fr, qr, qc))
        .collect();
    let chi_square = reduced_chi_square(&residuals, 3);

    let errors = if config.calc_errors {
        reflection_errors(f_data, &residuals, phase.fr, qc, qr, chi_square)
    } else {
        None
    };

    let result = ReflectionFitResult {
        fr: phase.fr,
        qr,
        qc,
        qi,
        theta0: phase.theta0,
        chi_square,
        errors,
        fano: fano_range(circle.r0, 0.0, qr, PortType::Reflection, config.isolation_db),
    };
    debug!(?result, "reflection circle fit");
    Ok(result)
}

/// Ranges of `Qi` and `Qc` compatible with a background path `isolation_db` below the resonant
/// one, for a normalized circle of radius `r0` and mismatch angle `phi0`.
///
/// The leakage can shrink or grow the measured diameter by up to `r0 sqrt(b^2 - sin^2 phi0)`
/// around `r0 cos phi0`, with `b` the relative background amplitude. A mismatch angle with
/// `|sin phi0| > b` is not explained by the leakage: the ranges are NaN and a warning is logged.
pub fn fano_range(r0: f64, phi0: f64, qr: f64, port: PortType, isolation_db: f64) -> FanoRange {
    let n_ports = match port {
        PortType::Notch => 2.0,
        PortType::Reflection => 1.0,
    };
    let leak = 10f64.powf(-isolation_db / 20.0);
    let b = leak / (1.0 - leak);
    if phi0.sin().abs() > b {
        warn!(phi0, b, "mismatch angle is too large for the assumed Fano leakage");
        return FanoRange {
            b,
            qi_min: f64::NAN,
            qi_max: f64::NAN,
            qc_min: f64::NAN,
            qc_max: f64::NAN,
        };
    }

    let r_mid = r0 * phi0.cos();
    let r_err = r0 * (b * b - phi0.sin().powi(2)).sqrt();
    let (r_min, r_max) = (r_mid - r_err, r_mid + r_err);
    FanoRange {
        b,
        qi_min: qr / (1.0 - n_ports * r_min),
        qi_max: if n_ports * r_max >= 1.0 {
            f64::INFINITY
        } else {
            qr / (1.0 - n_ports * r_max)
        },
        qc_min: qr / (n_ports * r_max),
        qc_max: qr / (n_ports * r_min),
    }
}

fn deepest_point(f_data: &[f64], z_data: &[Complex64]) -> f64 {
    z_data
        .iter()
        .position_min_by(|a, b| a.norm().total_cmp(&b.norm()))
        .map_or(f_data[0], |i| f_data[i])
}

/// `sum |u|^2 / (N - num_params)`, with at least one degree of freedom
fn reduced_chi_square(residuals: &[Complex64], num_params: usize) -> f64 {
    let dof = residuals.len().saturating_sub(num_params).max(1);
    residuals.iter().map(|u| u.norm_sqr()).sum::<f64>() / dof as f64
}

/// Covariance `chi^2 (J^T J)^-1` where each row of `J` is the model derivative projected on the
/// direction of the complex residual at that point.
///
/// Returns `None` if `J^T J` is singular, e.g. for noise-free data.
fn projected_covariance<F>(
    f_data: &[f64],
    residuals: &[Complex64],
    num_params: usize,
    chi_square: f64,
    derivatives: F,
) -> Option<DMatrix<f64>>
where
    F: Fn(f64) -> Vec<Complex64>,
{
    let mut normal = DMatrix::<f64>::zeros(num_params, num_params);
    for (&f, u) in f_data.iter().zip(residuals) {
        let norm = u.norm();
        if norm == 0.0 || !norm.is_finite() {
            continue;
        }
        let direction = u / norm;
        let row = DVector::from_iterator(
            num_params,
            derivatives(f)
                .iter()
                .map(|d| d.re * direction.re + d.im * direction.im),
        );
        normal += &row * row.transpose();
    }
    normal.try_inverse().map(|inv| inv * chi_square)
}

fn notch_errors(
    f_data: &[f64],
    residuals: &[Complex64],
    fr: f64,
    abs_qc: f64,
    qr: f64,
    phi0: f64,
    chi_square: f64,
) -> Option<FitErrors> {
    let e_phi = Complex64::from_polar(1.0, phi0);
    let derivatives = |f: f64| {
        let denom = Complex64::new(fr, 2.0 * qr * (f - fr));
        vec![
            // fr
            -2.0 * I * qr * qr * f * e_phi / (abs_qc * denom * denom),
            // |Qc|
            e_phi * qr * fr / (abs_qc * abs_qc * denom),
            // Qr
            -e_phi * fr * fr / (abs_qc * denom * denom),
            // phi0
            -I * qr * fr * e_phi / (abs_qc * denom),
        ]
    };
    let Some(cov) = projected_covariance(f_data, residuals, 4, chi_square, derivatives) else {
        warn!("notch fit covariance is singular, no error estimates");
        return None;
    };

    // Qi without correction: d/dQr and d/d|Qc| of 1 / (1 / Qr - 1 / |Qc|)
    let inv_qi = 1.0 / qr - 1.0 / abs_qc;
    let d_qr = 1.0 / (inv_qi * inv_qi * qr * qr);
    let d_qc = -1.0 / (inv_qi * inv_qi * abs_qc * abs_qc);
    let qi_no_corr_err = (d_qr * d_qr * cov[(2, 2)]
        + d_qc * d_qc * cov[(1, 1)]
        + 2.0 * d_qr * d_qc * cov[(2, 1)])
        .sqrt();

    // Qi with diameter correction, 1 / (1 / Qr - cos(phi0) / |Qc|)
    let inv_qi = 1.0 / qr - phi0.cos() / abs_qc;
    let d_qr = 1.0 / (inv_qi * inv_qi * qr * qr);
    let d_qc = -phi0.cos() / (inv_qi * inv_qi * abs_qc * abs_qc);
    let d_phi = -phi0.sin() / (inv_qi * inv_qi * abs_qc);
    let diagonal = d_qr * d_qr * cov[(2, 2)] + d_qc * d_qc * cov[(1, 1)] + d_phi * d_phi * cov[(3, 3)];
    let correlated =
        d_qr * d_qc * cov[(2, 1)] + d_qr * d_phi * cov[(2, 3)] + d_qc * d_phi * cov[(1, 3)];

    Some(FitErrors {
        fr_err: cov[(0, 0)].sqrt(),
        abs_qc_err: cov[(1, 1)].sqrt(),
        qr_err: cov[(2, 2)].sqrt(),
        phi0_err: cov[(3, 3)].sqrt(),
        qi_no_corr_err,
        qi_dia_corr_err: (diagonal + 2.0 * correlated).sqrt(),
    })
}

fn reflection_errors(
    f_data: &[f64],
    residuals: &[Complex64],
    fr: f64,
    qc: f64,
    qr: f64,
    chi_square: f64,
) -> Option<ReflectionFitErrors> {
    let derivatives = |f: f64| {
        let denom = Complex64::new(fr, 2.0 * qr * (fr - f));
        vec![
            // fr
            -4.0 * I * qr * qr * f / (qc * denom * denom),
            // Qc
            2.0 * qr * fr / (qc * qc * Complex64::new(-fr, 2.0 * qr * (f - fr))),
            // Qr
            2.0 * fr * fr / (qc * denom * denom),
        ]
    };
    let Some(cov) = projected_covariance(f_data, residuals, 3, chi_square, derivatives) else {
        warn!("reflection fit covariance is singular, no error estimates");
        return None;
    };

    let inv_qi = 1.0 / qr - 1.0 / qc;
    let d_qr = 1.0 / (inv_qi * inv_qi * qr * qr);
    let d_qc = -1.0 / (inv_qi * inv_qi * qc * qc);
    Some(ReflectionFitErrors {
        fr_err: cov[(0, 0)].sqrt(),
        qc_err: cov[(1, 1)].sqrt(),
        qr_err: cov[(2, 2)].sqrt(),
        qi_err: (d_qr * d_qr * cov[(2, 2)] + d_qc * d_qc * cov[(1, 1)] + 2.0 * d_qr * d_qc * cov[(2, 1)])
            .sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    const FR: f64 = 7.0e9;
    const QR: f64 = 8.0e3;

    fn frequencies() -> Vec<f64> {
        let span = 6.0 * FR / QR;
        (0..301)
            .map(|i| FR - span + 2.0 * span * i as f64 / 300.0)
            .collect()
    }

    fn with_noise(z: Vec<Complex64>, sigma: f64, seed: u64) -> Vec<Complex64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, sigma).unwrap();
        z.into_iter()
            .map(|z| z + Complex64::new(normal.sample(&mut rng), normal.sample(&mut rng)))
            .collect()
    }

    #[test]
    fn notch_round_trip() {
        let f = frequencies();
        let abs_qc = 1.2e4;
        let phi0 = 0.15;
        let z: Vec<Complex64> = f
            .iter()
            .map(|&f| s21_notch_ideal(f, FR, QR, abs_qc, phi0))
            .collect();
        let config = FitConfig::default();
        let result = circlefit(&f, &z, None, Some(0.5 * QR), &config).unwrap();
        assert_relative_eq!(result.fr, FR, max_relative = 1e-8);
        assert_relative_eq!(result.qr, QR, max_relative = 1e-4);
        assert_relative_eq!(result.abs_qc, abs_qc, max_relative = 1e-4);
        assert_relative_eq!(result.phi0, phi0, epsilon = 1e-6);
        assert!(result.chi_square < 1e-10);

        let expected_qi = 1.0 / (1.0 / QR - phi0.cos() / abs_qc);
        assert_relative_eq!(result.qi_dia_corr, expected_qi, max_relative = 1e-3);
        assert!(result.qi_dia_corr > result.qi_no_corr);
    }

    #[test]
    fn model_reproduces_clean_data_within_one_percent() {
        let f = frequencies();
        let clean: Vec<Complex64> = f
            .iter()
            .map(|&f| s21_notch_ideal(f, FR, QR, 1.6e4, -0.1))
            .collect();
        let z = with_noise(clean.clone(), 0.002, 7);
        let result = circlefit(&f, &z, None, None, &FitConfig::default()).unwrap();
        let worst = f
            .iter()
            .zip(&clean)
            .map(|(&f, z)| {
                let model = s21_notch_ideal(f, result.fr, result.qr, result.abs_qc, result.phi0);
                (model - z).norm() / z.norm()
            })
            .fold(0.0, f64::max);
        assert!(worst < 0.01, "worst relative deviation {worst}");
    }

    #[test]
    fn noisy_fit_has_error_estimates() {
        let f = frequencies();
        let z = with_noise(
            f.iter()
                .map(|&f| s21_notch_ideal(f, FR, QR, 1.6e4, 0.05))
                .collect(),
            0.005,
            11,
        );
        let result = circlefit(&f, &z, None, Some(QR), &FitConfig::default()).unwrap();
        let errors = result.errors.unwrap();
        assert!(errors.fr_err > 0.0 && errors.fr_err < 1e5);
        assert!(errors.qr_err > 0.0 && errors.qr_err < 0.1 * QR);
        assert!(errors.phi0_err > 0.0 && errors.phi0_err < 0.1);
        assert!(errors.qi_dia_corr_err.is_finite());
    }

    #[test]
    fn errors_can_be_skipped() {
        let f = frequencies();
        let z: Vec<Complex64> = f
            .iter()
            .map(|&f| s21_notch_ideal(f, FR, QR, 1.6e4, 0.0))
            .collect();
        let config = FitConfig {
            calc_errors: false,
            ..Default::default()
        };
        assert!(circlefit(&f, &z, None, None, &config).unwrap().errors.is_none());
    }

    #[test]
    fn reflection_round_trip() {
        let f = frequencies();
        let qc = 1.0e4;
        let z: Vec<Complex64> = f
            .iter()
            .map(|&f| s11_reflection_ideal(f, FR, QR, qc))
            .collect();
        let config = FitConfig {
            port: PortType::Reflection,
            ..Default::default()
        };
        let fit = circlefit_port(&f, &z, Some(FR), Some(QR), &config).unwrap();
        let PortFit::Reflection(result) = fit else {
            panic!("expected a reflection result")
        };
        let qi = 1.0 / (1.0 / QR - 1.0 / qc);
        assert_relative_eq!(result.fr, FR, max_relative = 1e-8);
        assert_relative_eq!(result.qr, QR, max_relative = 1e-4);
        assert_relative_eq!(result.qc, qc, max_relative = 1e-3);
        assert_relative_eq!(result.qi, qi, max_relative = 1e-3);
        assert_relative_eq!(fit.qi(), qi, max_relative = 1e-3);
    }

    #[test]
    fn reflection_is_minus_one_off_resonance() {
        let z = s11_reflection_ideal(FR * 1.5, FR, QR, 1e4);
        assert!((z + 1.0).norm() < 1e-3);
        let z = s11_reflection(FR, FR, QR, 2.0 * QR, 2.0, 0.0, 0.0);
        assert!(z.norm() < 1e-12);
    }

    #[test]
    fn full_model_applies_environment() {
        let ideal = s21_notch_ideal(FR, FR, QR, 2.0 * QR, 0.0);
        assert_relative_eq!(ideal.re, 0.5, epsilon = 1e-12);
        let full = s21_notch(FR, FR, QR, 2.0 * QR, 0.0, 2.0, 0.3, 1e-9);
        assert_relative_eq!(full.norm(), 1.0, epsilon = 1e-12);
        let expected = Complex64::from_polar(1.0, 0.3 - 2.0 * PI * FR * 1e-9);
        assert!((full - expected).norm() < 1e-9);
    }

    #[test]
    fn fano_range_brackets_the_fit() {
        // 20 dB isolation: b = 0.1 / 0.9
        let range = fano_range(0.25, 0.0, 1e4, PortType::Notch, 20.0);
        assert_relative_eq!(range.b, 1.0 / 9.0, max_relative = 1e-12);
        assert_relative_eq!(range.qc_min, 1.8e4, max_relative = 1e-9);
        assert_relative_eq!(range.qc_max, 2.25e4, max_relative = 1e-9);
        assert_relative_eq!(range.qi_min, 1.8e4, max_relative = 1e-9);
        assert_relative_eq!(range.qi_max, 2.25e4, max_relative = 1e-9);

        let f = frequencies();
        let z: Vec<Complex64> = f
            .iter()
            .map(|&f| s21_notch_ideal(f, FR, QR, 1.6e4, 0.03))
            .collect();
        let result = circlefit(&f, &z, None, Some(QR), &FitConfig::default()).unwrap();
        let fano = result.fano;
        assert!(fano.qi_min < result.qi_dia_corr && result.qi_dia_corr < fano.qi_max);
        assert!(fano.qc_min < result.qc_dia_corr && result.qc_dia_corr < fano.qc_max);
    }

    #[test]
    fn fano_range_limits() {
        // a mismatch the leakage cannot explain
        let range = fano_range(0.25, 0.2, 1e4, PortType::Notch, 20.0);
        assert!(range.qi_min.is_nan() && range.qc_max.is_nan());

        // a leaky, nearly critically coupled reflection port may be lossless
        let range = fano_range(0.8, 0.0, 1e4, PortType::Reflection, 10.0);
        assert_eq!(range.qi_max, f64::INFINITY);
        assert!(range.qi_min.is_finite());
    }

    #[test]
    fn short_sweep_is_rejected() {
        let f = [1.0, 2.0, 3.0];
        let z = [Complex64::new(1.0, 0.0); 3];
        assert_eq!(
            circlefit(&f, &z, None, None, &FitConfig::default()).unwrap_err(),
            FittingError::InsufficientData { needed: 4, got: 3 }
        );
    }
}
