//! Fitting many independent sweeps, e.g. a power or flux scan of one resonator
use crate::fitting::circle::fitstruct::{Autofit, FitConfig, Sweep};
use crate::fitting::circle::resonator::autofit;
use crate::fitting::common::error::FittingError;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

type Result<T> = std::result::Result<T, FittingError>;

/// Fits a collection of `Sweep`s one after the other.
///
/// # Errors
/// Will return the first `Err` encountered, see [`autofit`].
pub fn autofit_all(sweeps: &[Sweep], config: &FitConfig) -> Result<Vec<Autofit>> {
    let mut fits = vec![];
    for sweep in sweeps {
        fits.push(autofit(sweep, config)?);
    }
    Ok(fits)
}

/// Fits a collection of `Sweep`s in parallel. The results keep the order of `sweeps`.
///
/// # Errors
/// Will return the `Err` of the first failing sweep in input order, see [`autofit`].
pub fn par_autofit(sweeps: &[Sweep], config: &FitConfig) -> Result<Vec<Autofit>> {
    // Fit the sweeps!
    let results: Vec<Result<Autofit>> = sweeps
        .par_iter()
        .map(|sweep| autofit(sweep, config))
        .collect();

    let mut fits = vec![];
    for res in results {
        match res {
            Ok(x) => fits.push(x),
            Err(e) => Err(e)?,
        }
    }
    Ok(fits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::circle::port::s21_notch;
    use num_complex::Complex64;

    fn sweep(fr: f64) -> Sweep {
        let f: Vec<f64> = (0..201).map(|i| fr - 2e6 + 2e4 * i as f64).collect();
        let z = f
            .iter()
            .map(|&f| s21_notch(f, fr, 5e3, 8e3, 0.0, 1.0, 0.0, 0.0))
            .collect();
        Sweep::new(f, z).unwrap()
    }

    #[test]
    fn parallel_matches_sequential() {
        let sweeps: Vec<Sweep> = [4.0e9, 4.2e9, 4.4e9, 4.6e9].map(sweep).to_vec();
        let config = FitConfig::default();
        let sequential = autofit_all(&sweeps, &config).unwrap();
        let parallel = par_autofit(&sweeps, &config).unwrap();
        assert_eq!(sequential, parallel);
        for (fit, sweep) in parallel.iter().zip(&sweeps) {
            let expected = sweep.frequencies()[100];
            assert!((fit.result.fr() - expected).abs() < 1e-8 * expected);
        }
    }

    #[test]
    fn first_error_is_returned() {
        let mut sweeps = vec![sweep(5e9)];
        let f = sweeps[0].frequencies().to_vec();
        let zeros = vec![Complex64::new(0.0, 0.0); f.len()];
        sweeps.push(Sweep::new(f, zeros).unwrap());
        assert!(matches!(
            par_autofit(&sweeps, &FitConfig::default()),
            Err(FittingError::InvalidInput(_))
        ));
    }
}
