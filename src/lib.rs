pub mod error;
pub mod fitting;
pub mod utils;

#[cfg(feature = "python")]
mod python {
    use crate::fitting::circle::fitstruct::{Autofit, DelayMode, FitConfig, PortFit, PortType, Sweep};
    use crate::fitting::circle::{
        calibration, geometry, lorentzian, phase, port, resonator, transmission,
    };
    use crate::fitting::common::least_squares::SolverConfig;
    use num_complex::Complex64;
    use pyo3::prelude::*;
    use std::collections::HashMap;

    type FitDict = HashMap<&'static str, f64>;

    fn py_config(reflection: bool, is_peak: bool, delay: Option<f64>) -> FitConfig {
        FitConfig {
            port: if reflection {
                PortType::Reflection
            } else {
                PortType::Notch
            },
            is_peak,
            delay: delay.map_or(DelayMode::Fit { guess: true }, DelayMode::Fixed),
            ..Default::default()
        }
    }

    fn port_fit_dict(result: &PortFit) -> FitDict {
        let fano = match result {
            PortFit::Notch(r) => r.fano,
            PortFit::Reflection(r) => r.fano,
        };
        let mut out = FitDict::from([
            ("fr", result.fr()),
            ("Ql", result.qr()),
            ("Qc", result.qc()),
            ("Qi", result.qi()),
            ("chi_square", result.chi_square()),
            ("Qi_min", fano.qi_min),
            ("Qi_max", fano.qi_max),
            ("Qc_min", fano.qc_min),
            ("Qc_max", fano.qc_max),
            ("fano_b", fano.b),
        ]);
        match result {
            PortFit::Notch(r) => {
                out.insert("absQc", r.abs_qc);
                out.insert("Qc_dia_corr", r.qc_dia_corr);
                out.insert("Qi_dia_corr", r.qi_dia_corr);
                out.insert("Qi_no_corr", r.qi_no_corr);
                out.insert("phi0", r.phi0);
                out.insert("theta0", r.theta0);
                if let Some(e) = r.errors {
                    out.insert("fr_err", e.fr_err);
                    out.insert("absQc_err", e.abs_qc_err);
                    out.insert("Ql_err", e.qr_err);
                    out.insert("phi0_err", e.phi0_err);
                    out.insert("Qi_no_corr_err", e.qi_no_corr_err);
                    out.insert("Qi_dia_corr_err", e.qi_dia_corr_err);
                }
            }
            PortFit::Reflection(r) => {
                out.insert("theta0", r.theta0);
                if let Some(e) = r.errors {
                    out.insert("fr_err", e.fr_err);
                    out.insert("Qc_err", e.qc_err);
                    out.insert("Ql_err", e.qr_err);
                    out.insert("Qi_err", e.qi_err);
                }
            }
        }
        out
    }

    /// Fits a circle to complex points, returning `(xc, yc, r0)`.
    #[pyfunction]
    #[pyo3(name = "fit_circle")]
    #[pyo3(signature = (z, refine = false))]
    pub(crate) fn fit_circle_py(z: Vec<Complex64>, refine: bool) -> PyResult<(f64, f64, f64)> {
        let c = geometry::fit_circle(&z, refine)?;
        Ok((c.xc, c.yc, c.r0))
    }

    /// Fits the skewed Lorentzian to |z|^2, returning its six parameters.
    #[pyfunction]
    #[pyo3(name = "fit_skewed_lorentzian")]
    #[pyo3(signature = (f, z, is_peak = false))]
    pub(crate) fn fit_skewed_lorentzian_py(
        f: Vec<f64>,
        z: Vec<Complex64>,
        is_peak: bool,
    ) -> PyResult<FitDict> {
        let p = lorentzian::fit_skewed_lorentzian(&f, &z, is_peak)?;
        Ok(FitDict::from([
            ("A1", p.a1),
            ("A2", p.a2),
            ("A3", p.a3),
            ("A4", p.a4),
            ("fr", p.fr),
            ("Ql", p.qr),
        ]))
    }

    /// Staged phase fit of centred data, returning `(theta0, Ql, fr)`.
    #[pyfunction]
    #[pyo3(name = "phase_fit")]
    #[pyo3(text_signature = "(f, z, theta0, Ql, fr, /)")]
    pub(crate) fn phase_fit_py(
        f: Vec<f64>,
        z: Vec<Complex64>,
        theta0: f64,
        qr: f64,
        fr: f64,
    ) -> PyResult<(f64, f64, f64)> {
        let p = phase::phase_fit(&f, &z, theta0, qr, fr)?;
        Ok((p.theta0, p.qr, p.fr))
    }

    /// Finds delay, off-resonant point and seeds. `delay=None` fits the delay.
    #[pyfunction]
    #[pyo3(name = "do_calibration")]
    #[pyo3(signature = (f, z, reflection = false, is_peak = false, delay = None))]
    pub(crate) fn do_calibration_py(
        f: Vec<f64>,
        z: Vec<Complex64>,
        reflection: bool,
        is_peak: bool,
        delay: Option<f64>,
    ) -> PyResult<FitDict> {
        let config = py_config(reflection, is_peak, delay);
        let cal = calibration::do_calibration(&f, &z, &config)?;
        Ok(FitDict::from([
            ("delay", cal.delay),
            ("a", cal.amp_norm),
            ("alpha", cal.alpha),
            ("fr", cal.fr),
            ("Ql", cal.qr),
            ("A2", cal.slope),
            ("frcal", cal.fr_cal),
        ]))
    }

    /// Circle fit of normalized data.
    #[pyfunction]
    #[pyo3(name = "circlefit")]
    #[pyo3(signature = (f, z, fr = None, Ql = None, reflection = false, refine_results = false, calc_errors = true))]
    #[allow(non_snake_case)]
    pub(crate) fn circlefit_py(
        f: Vec<f64>,
        z: Vec<Complex64>,
        fr: Option<f64>,
        Ql: Option<f64>,
        reflection: bool,
        refine_results: bool,
        calc_errors: bool,
    ) -> PyResult<FitDict> {
        let config = FitConfig {
            refine_results,
            calc_errors,
            ..py_config(reflection, false, Some(0.0))
        };
        let result = port::circlefit_port(&f, &z, fr, Ql, &config)?;
        Ok(port_fit_dict(&result))
    }

    /// Calibrates, normalizes and fits raw data. Returns the fit results and the model curve.
    #[pyfunction]
    #[pyo3(name = "autofit")]
    #[pyo3(signature = (f, z, reflection = false, is_peak = false, delay = None, isolation = 15.0))]
    pub(crate) fn autofit_py(
        f: Vec<f64>,
        z: Vec<Complex64>,
        reflection: bool,
        is_peak: bool,
        delay: Option<f64>,
        isolation: f64,
    ) -> PyResult<(FitDict, Vec<Complex64>)> {
        let sweep = Sweep::new(f, z)?;
        let config = FitConfig {
            isolation_db: isolation,
            ..py_config(reflection, is_peak, delay)
        };
        let Autofit {
            calibration,
            result,
            model,
            raw_chi_square,
            ..
        } = resonator::autofit(&sweep, &config)?;
        let mut out = port_fit_dict(&result);
        out.insert("delay", calibration.delay);
        out.insert("a", calibration.amp_norm);
        out.insert("alpha", calibration.alpha);
        out.insert("raw_chi_square", raw_chi_square);
        Ok((out, model))
    }

    /// Lorentzian fit of |z|^2 for a resonator measured in transmission.
    #[pyfunction]
    #[pyo3(name = "fit_transmission")]
    pub(crate) fn fit_transmission_py(f: Vec<f64>, z: Vec<Complex64>) -> PyResult<FitDict> {
        let fit = transmission::fit_transmission(&f, &z, SolverConfig::default())?;
        Ok(FitDict::from([
            ("fr", fit.fr),
            ("fr_err", fit.fr_err),
            ("Ql", fit.qr),
            ("Ql_err", fit.qr_err),
            ("Ampsqr", fit.amp_sqr),
            ("Ampsqr_err", fit.amp_sqr_err),
            ("chi_square", fit.chi_square),
        ]))
    }

    /// Evaluates the full notch model at every frequency.
    #[pyfunction]
    #[pyo3(name = "s21")]
    #[pyo3(signature = (f, fr, Ql, absQc, phi0 = 0.0, a = 1.0, alpha = 0.0, delay = 0.0))]
    #[allow(non_snake_case, clippy::too_many_arguments)]
    pub(crate) fn s21_py(
        f: Vec<f64>,
        fr: f64,
        Ql: f64,
        absQc: f64,
        phi0: f64,
        a: f64,
        alpha: f64,
        delay: f64,
    ) -> Vec<Complex64> {
        f.iter()
            .map(|&f| port::s21_notch(f, fr, Ql, absQc, phi0, a, alpha, delay))
            .collect()
    }
}

/// Resonator circle fitting.
#[cfg(feature = "python")]
#[pyo3::pymodule]
fn circlefit(m: &pyo3::Bound<'_, pyo3::types::PyModule>) -> pyo3::PyResult<()> {
    use pyo3::prelude::*;
    use python::*;

    m.add_function(wrap_pyfunction!(fit_circle_py, m)?)?;
    m.add_function(wrap_pyfunction!(fit_skewed_lorentzian_py, m)?)?;
    m.add_function(wrap_pyfunction!(phase_fit_py, m)?)?;
    m.add_function(wrap_pyfunction!(do_calibration_py, m)?)?;
    m.add_function(wrap_pyfunction!(circlefit_py, m)?)?;
    m.add_function(wrap_pyfunction!(autofit_py, m)?)?;
    m.add_function(wrap_pyfunction!(fit_transmission_py, m)?)?;
    m.add_function(wrap_pyfunction!(s21_py, m)?)?;

    Ok(())
}
