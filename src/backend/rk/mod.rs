//! Explicit Runge-Kutta backend.
//!
//! All three methods are embedded pairs with the FSAL property, driven by a
//! single tableau-based stepper:
//!
//! - `rk23`: Bogacki-Shampine 2(3)
//! - `rk45`: Dormand-Prince 4(5), the default
//! - `dop853`: Dormand-Prince 8(5,3)
//!
//! No method uses a Jacobian and banded Jacobians are not supported.

#![allow(clippy::needless_range_loop)]

mod dop853;
mod rk23;
mod rk45;

use crate::backend::driver::{Attempt, Stepper, run_adaptive, run_predefined};
use crate::backend::step_control::compute_error;
use crate::backend::{AdaptiveOutput, Backend, BackendOptions, PredefinedOutput, Problem};
use crate::error::{IntegrateError, IntegrateResult};

const METHODS: &[&str] = &["rk23", "rk45", "dop853"];

/// How a tableau estimates the local error.
pub(crate) enum ErrorEstimate {
    /// `h * sum(e_j * k_j)` over all stages including the FSAL stage.
    Embedded(&'static [f64]),
    /// Hairer's combined 5th/3rd order estimator.
    Dual {
        e5: &'static [f64],
        e3: &'static [f64],
    },
}

/// Butcher tableau of an explicit embedded pair.
pub(crate) struct Tableau {
    pub name: &'static str,
    pub error_order: usize,
    /// Nodes, one per stage.
    pub c: &'static [f64],
    /// Row `i` holds the `i` coefficients of stage `i`.
    pub a: &'static [&'static [f64]],
    /// Weights of the propagated solution.
    pub b: &'static [f64],
    pub error: ErrorEstimate,
}

impl Tableau {
    fn stages(&self) -> usize {
        self.c.len()
    }

    fn error_norm(
        &self,
        k: &[Vec<f64>],
        h: f64,
        y: &[f64],
        y_new: &[f64],
        opts: &BackendOptions,
    ) -> f64 {
        let n = y.len();
        match self.error {
            ErrorEstimate::Embedded(e) => {
                let mut y_err = vec![0.0; n];
                for i in 0..n {
                    let mut acc = 0.0;
                    for (j, ej) in e.iter().enumerate() {
                        acc += ej * k[j][i];
                    }
                    y_err[i] = h * acc;
                }
                compute_error(y_new, &y_err, y, opts.rtol, opts.atol)
            }
            ErrorEstimate::Dual { e5, e3 } => {
                let mut err5_sq = 0.0;
                let mut err3_sq = 0.0;
                for i in 0..n {
                    let scale = opts.atol + opts.rtol * y[i].abs().max(y_new[i].abs());
                    let mut err5 = 0.0;
                    let mut err3 = 0.0;
                    for j in 0..k.len() {
                        err5 += e5[j] * k[j][i];
                        err3 += e3[j] * k[j][i];
                    }
                    err5_sq += (err5 / scale).powi(2);
                    err3_sq += (err3 / scale).powi(2);
                }
                if err5_sq == 0.0 && err3_sq == 0.0 {
                    return 0.0;
                }
                let denom = err5_sq + 0.01 * err3_sq;
                h.abs() * err5_sq / (denom * n as f64).sqrt()
            }
        }
    }
}

fn tableau(method: &str) -> &'static Tableau {
    match method {
        "rk23" => &rk23::TABLEAU,
        "dop853" => &dop853::TABLEAU,
        _ => &rk45::TABLEAU,
    }
}

/// Tableau-driven stepper; `k[0]` holds `f` at the base point, the last slot
/// the FSAL evaluation at the end of the step.
struct ExplicitRk<'a> {
    tableau: &'static Tableau,
    f: &'a dyn Fn(f64, &[f64]) -> Vec<f64>,
    options: &'a BackendOptions,
    k: Vec<Vec<f64>>,
}

impl<'a> ExplicitRk<'a> {
    fn new(tableau: &'static Tableau, problem: &Problem<'a>, options: &'a BackendOptions) -> Self {
        Self {
            tableau,
            f: problem.rhs,
            options,
            k: vec![Vec::new(); tableau.stages() + 1],
        }
    }
}

impl Stepper for ExplicitRk<'_> {
    fn label(&self) -> &'static str {
        self.tableau.name
    }

    fn error_order(&self) -> usize {
        self.tableau.error_order
    }

    fn reset(&mut self, x: f64, y: &[f64]) -> IntegrateResult<()> {
        let k0 = (self.f)(x, y);
        if k0.len() != y.len() {
            return Err(IntegrateError::InvalidInput {
                context: format!(
                    "right-hand side returned {} values for {} dependent variables",
                    k0.len(),
                    y.len()
                ),
            });
        }
        self.k[0] = k0;
        Ok(())
    }

    fn attempt(&mut self, x: f64, y: &[f64], h: f64) -> IntegrateResult<Attempt> {
        let tab = self.tableau;
        let n = y.len();
        let stages = tab.stages();
        let mut y_stage = vec![0.0; n];

        for s in 1..stages {
            let row = tab.a[s];
            for i in 0..n {
                let mut acc = 0.0;
                for (j, aj) in row.iter().enumerate() {
                    acc += aj * self.k[j][i];
                }
                y_stage[i] = y[i] + h * acc;
            }
            self.k[s] = (self.f)(x + tab.c[s] * h, &y_stage);
        }

        let mut y_new = vec![0.0; n];
        for i in 0..n {
            let mut acc = 0.0;
            for (j, bj) in tab.b.iter().enumerate() {
                acc += bj * self.k[j][i];
            }
            y_new[i] = y[i] + h * acc;
        }

        // FSAL
        let f_new = (self.f)(x + h, &y_new);
        self.k[stages] = f_new.clone();

        let err = tab.error_norm(&self.k, h, y, &y_new, self.options);
        Ok(Attempt { y_new, f_new, err })
    }

    fn advance(&mut self, _x_new: f64, _y_new: &[f64], f_new: Vec<f64>) -> IntegrateResult<()> {
        self.k[0] = f_new;
        Ok(())
    }
}

/// The `"rk"` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RungeKutta;

impl RungeKutta {
    fn check_capabilities(&self, options: &BackendOptions) -> IntegrateResult<&'static Tableau> {
        let method = self.resolve_method(options)?;
        if options.band.is_some() {
            return Err(IntegrateError::unsupported(self.name(), "banded Jacobians"));
        }
        Ok(tableau(method))
    }
}

impl Backend for RungeKutta {
    fn name(&self) -> &str {
        "rk"
    }

    fn methods(&self) -> &[&'static str] {
        METHODS
    }

    fn default_method(&self) -> &'static str {
        "rk45"
    }

    fn requires_jac(&self) -> &[&'static str] {
        &[]
    }

    fn integrate_adaptive(
        &self,
        problem: &Problem<'_>,
        x0: f64,
        xend: f64,
        options: &BackendOptions,
    ) -> IntegrateResult<AdaptiveOutput> {
        let tab = self.check_capabilities(options)?;
        run_adaptive(ExplicitRk::new(tab, problem, options), problem, x0, xend, options)
    }

    fn integrate_predefined(
        &self,
        problem: &Problem<'_>,
        xout: &[f64],
        options: &BackendOptions,
    ) -> IntegrateResult<PredefinedOutput> {
        let tab = self.check_capabilities(options)?;
        run_predefined(ExplicitRk::new(tab, problem, options), problem, xout, options)
    }
}
