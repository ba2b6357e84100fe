//! Synthetic resonator traces for tests, benchmarks and checking a fit setup.
use crate::fitting::circle::fitstruct::{EntireModelParams, Sweep};
use crate::fitting::circle::port::s21_notch;
use crate::fitting::common::error::FittingError;
use num_complex::Complex64;

/// `n` evenly spaced values from `start` to `stop`, both included
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// A notch resonator sampled at `n` points within `span_linewidths` linewidths `fr / Qr`
/// on either side of `fr`.
///
/// # Errors
/// Will return `Err` for fewer than four points.
pub fn notch_sweep(
    params: &EntireModelParams,
    span_linewidths: f64,
    n: usize,
) -> Result<Sweep, FittingError> {
    let half_span = span_linewidths * params.fr / params.qr;
    let f_data = linspace(params.fr - half_span, params.fr + half_span, n);
    let z_data = f_data
        .iter()
        .map(|&f| {
            s21_notch(
                f,
                params.fr,
                params.qr,
                params.abs_qc,
                params.phi0,
                params.amp_norm,
                params.alpha,
                params.delay,
            )
        })
        .collect();
    Sweep::new(f_data, z_data)
}

/// Adds noise to the real and imaginary part of every sample, drawing two values from `noise`
/// per sample. Samples left over once `noise` runs dry are kept unchanged.
pub fn add_noise<I>(z_data: &[Complex64], mut noise: I) -> Vec<Complex64>
where
    I: Iterator<Item = f64>,
{
    z_data
        .iter()
        .map(|z| match (noise.next(), noise.next()) {
            (Some(re), Some(im)) => z + Complex64::new(re, im),
            _ => *z,
        })
        .collect()
}

/// Signal to noise ratio in dB, `10 log10(sum |clean|^2 / sum |noisy - clean|^2)`
pub fn snr_db(clean: &[Complex64], noisy: &[Complex64]) -> f64 {
    let signal: f64 = clean.iter().map(|z| z.norm_sqr()).sum();
    let noise: f64 = clean
        .iter()
        .zip(noisy)
        .map(|(c, n)| (n - c).norm_sqr())
        .sum();
    10.0 * (signal / noise).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn linspace_includes_both_ends() {
        let x = linspace(4.995e9, 5.005e9, 401);
        assert_eq!(x.len(), 401);
        assert_eq!(x[0], 4.995e9);
        assert_relative_eq!(x[400], 5.005e9, max_relative = 1e-15);
        assert!(linspace(1.0, 2.0, 0).is_empty());
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
    }

    #[test]
    fn notch_sweep_dips_at_resonance() {
        let params = EntireModelParams {
            fr: 5e9,
            abs_qc: 2e4,
            qr: 1e4,
            phi0: 0.0,
            delay: 0.0,
            amp_norm: 1.0,
            alpha: 0.0,
        };
        let sweep = notch_sweep(&params, 10.0, 201).unwrap();
        assert_relative_eq!(sweep.response()[100].re, 0.5, epsilon = 1e-12);
        assert!(sweep.response()[0].norm() > 0.99);
        assert!(notch_sweep(&params, 10.0, 3).is_err());
    }

    #[test]
    fn snr_of_known_noise() {
        let clean = vec![Complex64::new(1.0, 0.0); 4];
        let noisy = add_noise(&clean, [0.1, 0.0].into_iter().cycle());
        assert_relative_eq!(snr_db(&clean, &noisy), 20.0, epsilon = 1e-9);

        // noise runs out after the first sample
        let partial = add_noise(&clean, [0.5, 0.5].into_iter());
        assert_eq!(partial[1], clean[1]);
    }
}
