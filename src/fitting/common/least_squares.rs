//! Levenberg-Marquardt solves built on the rmpfit crate.
//!
//! Every non-linear stage of the resonator fit goes through a [`FitSession`]: it names the
//! parameters, records which of them are held fixed, and carries the solver tolerances. A stage
//! that only refines part of a parameter vector fixes the rest instead of rebuilding a smaller
//! problem, so the same residual closure serves every stage.
use crate::fitting::common::error::FittingError;
use rmpfit::{MPConfig, MPFitter, MPPar, MPResult, MPSuccess};
use tracing::{debug, warn};

type Result<T> = std::result::Result<T, FittingError>;

/// Tolerances handed to MPFit for every solve of a session
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SolverConfig {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub max_iter: usize,
    /// Maximum number of residual evaluations, 0 for no limit
    pub max_fev: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            max_iter: 200,
            max_fev: 0,
        }
    }
}

/// Outcome of a single least squares solve
#[derive(Clone, Debug)]
pub struct LeastSquaresFit {
    /// All parameters, fixed ones included, in session order
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`
    pub chi_squared: f64,
    /// 1-sigma uncertainties reported by the solver, zero for fixed parameters
    pub xerror: Vec<f64>,
    /// False if the solver ran out of iterations or rejected the problem mid-way
    pub converged: bool,
}

/// A named parameter vector together with the set of parameters held fixed.
#[derive(Clone, Debug)]
pub struct FitSession {
    label: &'static str,
    names: &'static [&'static str],
    fixed: Vec<bool>,
    config: SolverConfig,
}

impl FitSession {
    pub fn new(label: &'static str, names: &'static [&'static str]) -> FitSession {
        FitSession {
            label,
            names,
            fixed: vec![false; names.len()],
            config: SolverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SolverConfig) -> FitSession {
        self.config = config;
        self
    }

    /// Holds exactly the parameters at `indices` fixed, freeing all others
    pub fn fix_only(&mut self, indices: &[usize]) -> &mut FitSession {
        for (i, f) in self.fixed.iter_mut().enumerate() {
            *f = indices.contains(&i);
        }
        self
    }

    /// Frees every parameter
    pub fn free_all(&mut self) -> &mut FitSession {
        self.fixed.iter_mut().for_each(|f| *f = false);
        self
    }

    pub fn num_params(&self) -> usize {
        self.names.len()
    }

    pub fn num_free(&self) -> usize {
        self.fixed.iter().filter(|&&f| !f).count()
    }

    /// Minimizes the sum of squares of `residuals` starting from `p0`.
    ///
    /// `residuals(params, deviates)` receives the full parameter vector, fixed entries included,
    /// and must fill one deviate per data point.
    ///
    /// # Errors
    /// Returns `InsufficientData` if there are fewer points than free parameters. Solver failures
    /// are not errors: the seed (or the last iterate) is returned with `converged == false`.
    pub fn solve<F>(&self, num_points: usize, p0: &[f64], residuals: F) -> Result<LeastSquaresFit>
    where
        F: FnMut(&[f64], &mut [f64]),
    {
        if p0.len() != self.names.len() {
            Err(FittingError::BadFit(format!(
                "{}: expected {} starting values, got {}",
                self.label,
                self.names.len(),
                p0.len()
            )))?
        }
        let num_free = self.num_free();
        if num_free == 0 {
            Err(FittingError::BadFit(format!(
                "{}: every parameter is fixed",
                self.label
            )))?
        }
        if num_points < num_free {
            Err(FittingError::InsufficientData {
                needed: num_free,
                got: num_points,
            })?
        }

        let mut problem = LevMarProblem {
            num_points,
            residuals,
            params: self
                .fixed
                .iter()
                .map(|&fixed| MPPar {
                    fixed,
                    ..Default::default()
                })
                .collect(),
            config: self.config,
        };
        let mut params = p0.to_vec();
        match problem.mpfit(&mut params) {
            Ok(status) => {
                let converged = !matches!(status.success, MPSuccess::MaxIter);
                if !converged {
                    warn!(
                        stage = self.label,
                        chi_squared = status.best_norm,
                        "least squares stopped at the iteration limit, keeping last iterate"
                    );
                }
                debug!(
                    stage = self.label,
                    params = ?self.describe(&params),
                    chi_squared = status.best_norm,
                    "least squares stage finished"
                );
                Ok(LeastSquaresFit {
                    params,
                    chi_squared: status.best_norm,
                    xerror: status.xerror,
                    converged,
                })
            }
            Err(e) => {
                warn!(stage = self.label, "MPFit gave up ({e}), keeping starting values");
                let mut deviates = vec![0.0; num_points];
                (problem.residuals)(p0, &mut deviates);
                Ok(LeastSquaresFit {
                    params: p0.to_vec(),
                    chi_squared: deviates.iter().map(|d| d * d).sum(),
                    xerror: vec![0.0; p0.len()],
                    converged: false,
                })
            }
        }
    }

    fn describe(&self, params: &[f64]) -> Vec<(&'static str, f64)> {
        self.names.iter().copied().zip(params.iter().copied()).collect()
    }
}

/// Levenberg-Marquardt problem handed to the rmpfit crate
struct LevMarProblem<F> {
    num_points: usize,

    /// Fills the deviates for a given parameter vector
    residuals: F,

    /// Per-parameter constraints, only `fixed` is used
    params: Vec<MPPar>,

    config: SolverConfig,
}

impl<F> MPFitter for LevMarProblem<F>
where
    F: FnMut(&[f64], &mut [f64]),
{
    fn eval(&mut self, params: &[f64], deviates: &mut [f64]) -> MPResult<()> {
        (self.residuals)(params, deviates);
        Ok(())
    }

    fn number_of_points(&self) -> usize {
        self.num_points
    }

    fn config(&self) -> MPConfig {
        MPConfig {
            ftol: self.config.ftol,
            xtol: self.config.xtol,
            gtol: self.config.gtol,
            max_iter: self.config.max_iter,
            max_fev: self.config.max_fev,
            ..Default::default()
        }
    }

    fn parameters(&self) -> Option<&[MPPar]> {
        Some(&*self.params)
    }
}
