//! Linearly implicit Rosenbrock backend for stiff systems.
//!
//! `ode23s` is the 2(3) Rosenbrock-W pair of Shampine and Reichelt. Each
//! step solves three linear systems with the iteration matrix
//! `W = I - h*d*J`, where `J` is the Jacobian at the start of the step.
//! Without a wired Jacobian, `J` is approximated by forward differences of
//! the right-hand side; `df/dx` likewise when it is not wired.
//!
//! A wired Jacobian is dense `n x n`, or packed band storage (see
//! [`banded`]) when [`BackendOptions::band`] is set.

mod banded;
mod jacobian;

use std::fmt;

use numr::algorithm::linalg::LinearAlgebraAlgorithms;
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use numr::tensor::Tensor;

use crate::backend::driver::{Attempt, Stepper, run_adaptive, run_predefined};
use crate::backend::step_control::compute_error;
use crate::backend::{AdaptiveOutput, Backend, BackendOptions, Band, PredefinedOutput, Problem};
use crate::callback::Matrix;
use crate::error::{IntegrateError, IntegrateResult};

use jacobian::{finite_difference_dfdx, finite_difference_jacobian};

const METHODS: &[&str] = &["ode23s"];

/// `d = 1 / (2 + sqrt(2))`
const D: f64 = 0.292_893_218_813_452_5;
/// `e32 = 6 + sqrt(2)`
const E32: f64 = 7.414_213_562_373_095;

/// The `"rosenbrock"` backend.
pub struct Rosenbrock {
    client: CpuClient,
    device: CpuDevice,
}

impl Rosenbrock {
    pub fn new() -> Self {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        Self { client, device }
    }

    fn check_capabilities(
        &self,
        problem: &Problem<'_>,
        options: &BackendOptions,
    ) -> IntegrateResult<()> {
        self.resolve_method(options)?;
        if options.band.is_some() && problem.jac.is_none() {
            log::debug!(
                "rosenbrock: band given without a Jacobian, using masked finite differences"
            );
        }
        Ok(())
    }
}

impl Default for Rosenbrock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Rosenbrock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rosenbrock").finish_non_exhaustive()
    }
}

impl Backend for Rosenbrock {
    fn name(&self) -> &str {
        "rosenbrock"
    }

    fn methods(&self) -> &[&'static str] {
        METHODS
    }

    fn default_method(&self) -> &'static str {
        "ode23s"
    }

    fn requires_jac(&self) -> &[&'static str] {
        METHODS
    }

    fn integrate_adaptive(
        &self,
        problem: &Problem<'_>,
        x0: f64,
        xend: f64,
        options: &BackendOptions,
    ) -> IntegrateResult<AdaptiveOutput> {
        self.check_capabilities(problem, options)?;
        run_adaptive(Ode23s::new(self, problem, options), problem, x0, xend, options)
    }

    fn integrate_predefined(
        &self,
        problem: &Problem<'_>,
        xout: &[f64],
        options: &BackendOptions,
    ) -> IntegrateResult<PredefinedOutput> {
        self.check_capabilities(problem, options)?;
        run_predefined(Ode23s::new(self, problem, options), problem, xout, options)
    }
}

/// Per-step state: `f`, the dense Jacobian and `df/dx` at the base point.
struct Ode23s<'a> {
    backend: &'a Rosenbrock,
    f: &'a dyn Fn(f64, &[f64]) -> Vec<f64>,
    jac: Option<&'a dyn Fn(f64, &[f64]) -> Matrix>,
    dfdx: Option<&'a dyn Fn(f64, &[f64]) -> Vec<f64>>,
    band: Option<Band>,
    rtol: f64,
    atol: f64,
    f0: Vec<f64>,
    j0: Vec<f64>,
    t0: Vec<f64>,
}

impl<'a> Ode23s<'a> {
    fn new(backend: &'a Rosenbrock, problem: &Problem<'a>, options: &BackendOptions) -> Self {
        Self {
            backend,
            f: problem.rhs,
            jac: problem.jac,
            dfdx: problem.dfdx,
            band: options.band,
            rtol: options.rtol,
            atol: options.atol,
            f0: Vec::new(),
            j0: Vec::new(),
            t0: Vec::new(),
        }
    }

    /// Evaluate the Jacobian and `df/dx` at a new base point.
    fn linearize(&mut self, x: f64, y: &[f64]) -> IntegrateResult<()> {
        let n = y.len();
        self.j0 = match (self.jac, self.band) {
            (Some(jac), Some(band)) => banded::expand(&jac(x, y), band, n)?,
            (Some(jac), None) => banded::flatten(&jac(x, y), n)?,
            (None, band) => {
                let fd = finite_difference_jacobian(self.f, x, y, &self.f0);
                let mut dense: Vec<f64> = fd.into_iter().flatten().collect();
                if let Some(band) = band {
                    banded::mask(&mut dense, band, n);
                }
                dense
            }
        };
        self.t0 = match self.dfdx {
            Some(dfdx) => {
                let t = dfdx(x, y);
                if t.len() != n {
                    return Err(IntegrateError::InvalidInput {
                        context: format!("df/dx returned {} values, expected {}", t.len(), n),
                    });
                }
                t
            }
            None => finite_difference_dfdx(self.f, x, y, &self.f0),
        };
        Ok(())
    }

    fn iteration_matrix(&self, h: f64, n: usize) -> Tensor<CpuRuntime> {
        let hd = h * D;
        let w: Vec<f64> = self
            .j0
            .iter()
            .enumerate()
            .map(|(idx, j)| {
                let diag = if idx / n == idx % n { 1.0 } else { 0.0 };
                diag - hd * j
            })
            .collect();
        Tensor::<CpuRuntime>::from_slice(&w, &[n, n], &self.backend.device)
    }

    fn solve(&self, w: &Tensor<CpuRuntime>, rhs: &[f64]) -> IntegrateResult<Vec<f64>> {
        let n = rhs.len();
        let b = Tensor::<CpuRuntime>::from_slice(rhs, &[n, 1], &self.backend.device);
        let sol = LinearAlgebraAlgorithms::solve(&self.backend.client, w, &b)?;
        Ok(sol.to_vec())
    }
}

impl Stepper for Ode23s<'_> {
    fn label(&self) -> &'static str {
        "ode23s"
    }

    fn error_order(&self) -> usize {
        2
    }

    fn reset(&mut self, x: f64, y: &[f64]) -> IntegrateResult<()> {
        let f0 = (self.f)(x, y);
        if f0.len() != y.len() {
            return Err(IntegrateError::InvalidInput {
                context: format!(
                    "right-hand side returned {} values for {} dependent variables",
                    f0.len(),
                    y.len()
                ),
            });
        }
        self.f0 = f0;
        self.linearize(x, y)
    }

    fn attempt(&mut self, x: f64, y: &[f64], h: f64) -> IntegrateResult<Attempt> {
        let n = y.len();
        let w = self.iteration_matrix(h, n);
        let hd = h * D;

        let rhs1: Vec<f64> = (0..n).map(|i| self.f0[i] + hd * self.t0[i]).collect();
        let k1 = self.solve(&w, &rhs1)?;

        let y_mid: Vec<f64> = (0..n).map(|i| y[i] + 0.5 * h * k1[i]).collect();
        let f1 = (self.f)(x + 0.5 * h, &y_mid);

        let rhs2: Vec<f64> = (0..n).map(|i| f1[i] - k1[i]).collect();
        let k2: Vec<f64> = self
            .solve(&w, &rhs2)?
            .iter()
            .zip(&k1)
            .map(|(s, k)| s + k)
            .collect();

        let y_new: Vec<f64> = (0..n).map(|i| y[i] + h * k2[i]).collect();
        // FSAL
        let f2 = (self.f)(x + h, &y_new);

        let rhs3: Vec<f64> = (0..n)
            .map(|i| {
                f2[i] - E32 * (k2[i] - f1[i]) - 2.0 * (k1[i] - self.f0[i]) + hd * self.t0[i]
            })
            .collect();
        let k3 = self.solve(&w, &rhs3)?;

        let y_err: Vec<f64> = (0..n)
            .map(|i| h / 6.0 * (k1[i] - 2.0 * k2[i] + k3[i]))
            .collect();
        let err = compute_error(&y_new, &y_err, y, self.rtol, self.atol);

        Ok(Attempt {
            y_new,
            f_new: f2,
            err,
        })
    }

    fn advance(&mut self, x_new: f64, y_new: &[f64], f_new: Vec<f64>) -> IntegrateResult<()> {
        self.f0 = f_new;
        self.linearize(x_new, y_new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> BackendOptions {
        BackendOptions {
            rtol: 1e-6,
            atol: 1e-9,
            first_step: 1e-6,
            ..Default::default()
        }
    }

    #[test]
    fn test_constants() {
        assert!((D - 1.0 / (2.0 + 2.0_f64.sqrt())).abs() < 1e-15);
        assert!((E32 - (6.0 + 2.0_f64.sqrt())).abs() < 1e-15);
    }

    #[test]
    fn test_linear_decay_with_jacobian() {
        let f = |_x: f64, y: &[f64]| vec![-2.0 * y[0]];
        let jac = |_x: f64, _y: &[f64]| vec![vec![-2.0]];
        let problem = Problem {
            rhs: &f,
            jac: Some(&jac),
            dfdx: None,
            roots: None,
            y0: &[1.0],
        };

        let out = Rosenbrock::new()
            .integrate_adaptive(&problem, 0.0, 1.0, &options())
            .unwrap();
        assert!(out.info.success);
        assert_eq!(out.info.method, "ode23s");
        let y_final = out.yout.last().unwrap()[0];
        assert!((y_final - (-2.0_f64).exp()).abs() < 1e-4, "y = {}", y_final);
    }

    #[test]
    fn test_stiff_system_finite_difference() {
        // y0' = -1000 (y0 - cos x), tracks cos x after a fast transient
        let f = |x: f64, y: &[f64]| vec![-1000.0 * (y[0] - x.cos())];
        let problem = Problem {
            rhs: &f,
            jac: None,
            dfdx: None,
            roots: None,
            y0: &[0.0],
        };

        let out = Rosenbrock::new()
            .integrate_predefined(&problem, &[0.0, 0.5, 1.0], &options())
            .unwrap();
        assert!(out.info.success);
        assert!((out.yout[2][0] - 1.0_f64.cos()).abs() < 1e-2);
        // An explicit method would need thousands of steps here.
        assert!(out.info.naccept < 1000, "naccept = {}", out.info.naccept);
    }

    #[test]
    fn test_banded_jacobian() {
        // y0' = -y0, y1' = y0 - y1; lower bandwidth 1
        let f = |_x: f64, y: &[f64]| vec![-y[0], y[0] - y[1]];
        let jac = |_x: f64, _y: &[f64]| vec![vec![-1.0, -1.0], vec![1.0, 0.0]];
        let problem = Problem {
            rhs: &f,
            jac: Some(&jac),
            dfdx: None,
            roots: None,
            y0: &[1.0, 0.0],
        };
        let opts = BackendOptions {
            band: Some(Band::new(1, 0)),
            ..options()
        };

        let out = Rosenbrock::new()
            .integrate_predefined(&problem, &[0.0, 1.0], &opts)
            .unwrap();
        assert!(out.info.success);
        let x: f64 = 1.0;
        assert!((out.yout[1][0] - (-x).exp()).abs() < 1e-4);
        assert!((out.yout[1][1] - x * (-x).exp()).abs() < 1e-4);
    }

    #[test]
    fn test_wrong_jacobian_shape() {
        let f = |_x: f64, y: &[f64]| vec![-y[0], -y[1]];
        let jac = |_x: f64, _y: &[f64]| vec![vec![-1.0]];
        let problem = Problem {
            rhs: &f,
            jac: Some(&jac),
            dfdx: None,
            roots: None,
            y0: &[1.0, 1.0],
        };
        assert!(matches!(
            Rosenbrock::new().integrate_adaptive(&problem, 0.0, 1.0, &options()),
            Err(IntegrateError::InvalidInput { .. })
        ));
    }
}
