//! Backend adapter contract.
//!
//! Every integration backend implements [`Backend`]: two operations,
//! [`Backend::integrate_adaptive`] (the backend picks the output abscissas)
//! and [`Backend::integrate_predefined`] (output exactly on a caller grid),
//! plus the static set of method names that need a Jacobian.
//!
//! Callbacks reach a backend already bound to their parameters and wrapped
//! in call counters, as plain `Fn(f64, &[f64])` closures inside a
//! [`Problem`]. Optional capabilities are optional fields: a backend that
//! cannot honor one that is set returns [`IntegrateError::Unsupported`].
//!
//! # Built-in backends
//!
//! | Name | Methods | Requires Jacobian | Banded | Roots |
//! |------|---------|-------------------|--------|-------|
//! | `rk` | `rk23`, `rk45` (default), `dop853` | none | no | yes |
//! | `rosenbrock` | `ode23s` (default) | `ode23s` | yes | yes |

mod driver;
pub mod registry;
pub mod rk;
mod roots;
pub mod rosenbrock;
pub mod step_control;

pub use registry::Integrator;
pub use rk::RungeKutta;
pub use rosenbrock::Rosenbrock;
pub use step_control::StepSizeController;

use crate::callback::Matrix;
use crate::error::{IntegrateError, IntegrateResult};

/// Shape of a banded Jacobian: number of sub- and super-diagonals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub lower: usize,
    pub upper: usize,
}

impl Band {
    pub fn new(lower: usize, upper: usize) -> Self {
        Self { lower, upper }
    }

    /// Rows of the packed band storage (`lower + upper + 1`).
    pub fn rows(&self) -> usize {
        self.lower + self.upper + 1
    }
}

/// A root function together with its declared number of outputs.
#[derive(Clone, Copy)]
pub struct RootFunction<'a> {
    pub f: &'a dyn Fn(f64, &[f64]) -> Vec<f64>,
    pub nroots: usize,
}

/// The wired callbacks and initial state handed to a backend.
#[derive(Clone, Copy)]
pub struct Problem<'a> {
    /// Right-hand side `dy/dx = f(x, y)`.
    pub rhs: &'a dyn Fn(f64, &[f64]) -> Vec<f64>,
    /// Jacobian `df/dy`; dense `n x n`, or packed band storage when
    /// [`BackendOptions::band`] is set.
    pub jac: Option<&'a dyn Fn(f64, &[f64]) -> Matrix>,
    /// Partial derivative `df/dx`.
    pub dfdx: Option<&'a dyn Fn(f64, &[f64]) -> Vec<f64>>,
    pub roots: Option<RootFunction<'a>>,
    pub y0: &'a [f64],
}

impl Problem<'_> {
    pub fn ny(&self) -> usize {
        self.y0.len()
    }
}

/// Options recognized by the built-in backends.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Native method name (backend default when `None`).
    pub method: Option<String>,
    pub atol: f64,
    pub rtol: f64,
    /// Initial step size.
    pub first_step: f64,
    /// Maximum step size (default: unbounded).
    pub max_step: Option<f64>,
    /// Minimum step size (default: a few ulps of `x`).
    pub min_step: Option<f64>,
    /// Maximum number of step attempts over the whole integration.
    pub max_steps: usize,
    /// Banded Jacobian shape.
    pub band: Option<Band>,
    /// Stop at the first root of the root function.
    pub return_on_root: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            method: None,
            atol: 1e-8,
            rtol: 1e-8,
            first_step: 1e-14,
            max_step: None,
            min_step: None,
            max_steps: 100_000,
            band: None,
            return_on_root: false,
        }
    }
}

/// A root of the root function located during integration.
#[derive(Debug, Clone, PartialEq)]
pub struct RootEvent {
    /// Location of the root.
    pub x: f64,
    /// State at the root.
    pub y: Vec<f64>,
    /// Which component of the root function changed sign.
    pub index: usize,
    /// Output row holding the root (adaptive mode only).
    pub sample: Option<usize>,
}

/// Backend-side integration statistics.
#[derive(Debug, Clone, Default)]
pub struct BackendInfo {
    pub success: bool,
    pub message: Option<String>,
    /// Native method that was used.
    pub method: String,
    /// Accepted steps.
    pub naccept: usize,
    /// Rejected steps.
    pub nreject: usize,
    pub roots: Vec<RootEvent>,
}

/// Output of [`Backend::integrate_adaptive`].
#[derive(Debug, Clone)]
pub struct AdaptiveOutput {
    pub xout: Vec<f64>,
    pub yout: Matrix,
    pub info: BackendInfo,
}

/// Output of [`Backend::integrate_predefined`].
#[derive(Debug, Clone)]
pub struct PredefinedOutput {
    pub yout: Matrix,
    pub info: BackendInfo,
}

/// The two-operation contract every integration backend implements.
pub trait Backend {
    /// Backend identifier, e.g. `"rk"`.
    fn name(&self) -> &str;

    /// Native method names this backend accepts.
    fn methods(&self) -> &[&'static str];

    /// Method used when none is requested.
    fn default_method(&self) -> &'static str;

    /// Methods that use a Jacobian by default.
    fn requires_jac(&self) -> &[&'static str];

    /// Integrate from `x0` to `xend`, reporting every accepted step.
    ///
    /// The first row is `y0` at `x0`; the last abscissa is `>= xend`.
    fn integrate_adaptive(
        &self,
        problem: &Problem<'_>,
        x0: f64,
        xend: f64,
        options: &BackendOptions,
    ) -> IntegrateResult<AdaptiveOutput>;

    /// Integrate reporting the state exactly at each point of `xout`.
    ///
    /// Row `i` corresponds to `xout[i]`; row 0 is `y0`.
    fn integrate_predefined(
        &self,
        problem: &Problem<'_>,
        xout: &[f64],
        options: &BackendOptions,
    ) -> IntegrateResult<PredefinedOutput>;

    /// Resolve the method requested in `options`.
    fn resolve_method(&self, options: &BackendOptions) -> IntegrateResult<&'static str> {
        match options.method.as_deref() {
            None => Ok(self.default_method()),
            Some(name) => self
                .methods()
                .iter()
                .copied()
                .find(|m| *m == name)
                .ok_or_else(|| {
                    IntegrateError::unsupported(self.name(), format!("method '{}'", name))
                }),
        }
    }

    /// Whether `method` uses a Jacobian unless told otherwise.
    fn method_requires_jac(&self, method: &str) -> bool {
        self.requires_jac().contains(&method)
    }
}

/// Check `y0` and the root function declaration shared by all backends.
pub(crate) fn validate_problem(problem: &Problem<'_>, context: &str) -> IntegrateResult<()> {
    if problem.y0.is_empty() {
        return Err(IntegrateError::InvalidInput {
            context: format!("{}: initial condition cannot be empty", context),
        });
    }
    if let Some(roots) = problem.roots {
        if roots.nroots == 0 {
            return Err(IntegrateError::InvalidInput {
                context: format!("{}: root function declared with zero outputs", context),
            });
        }
    }
    Ok(())
}

/// Check that `xout` is a usable grid: at least two points, non-decreasing,
/// with a non-empty span.
pub(crate) fn validate_grid(xout: &[f64], context: &str) -> IntegrateResult<()> {
    if xout.len() < 2 {
        return Err(IntegrateError::InvalidInput {
            context: format!("{}: need at least two output points", context),
        });
    }
    let (first, last) = (xout[0], xout[xout.len() - 1]);
    if xout.windows(2).any(|w| w[1] < w[0]) || first >= last {
        return Err(IntegrateError::InvalidInterval {
            a: first,
            b: last,
            context: context.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_rows() {
        assert_eq!(Band::new(1, 2).rows(), 4);
        assert_eq!(Band::new(0, 0).rows(), 1);
    }

    #[test]
    fn test_validate_grid() {
        assert!(validate_grid(&[0.0, 1.0], "t").is_ok());
        assert!(validate_grid(&[0.0, 0.5, 0.5, 1.0], "t").is_ok());
        assert!(validate_grid(&[0.0], "t").is_err());
        assert!(validate_grid(&[1.0, 0.0], "t").is_err());
        assert!(validate_grid(&[0.0, 0.7, 0.3], "t").is_err());
        assert!(validate_grid(&[0.5, 0.5], "t").is_err());
    }

    #[test]
    fn test_resolve_method() {
        let rk = RungeKutta;
        let mut opts = BackendOptions::default();
        assert_eq!(rk.resolve_method(&opts).unwrap(), "rk45");

        opts.method = Some("dop853".to_string());
        assert_eq!(rk.resolve_method(&opts).unwrap(), "dop853");

        opts.method = Some("euler".to_string());
        assert!(matches!(
            rk.resolve_method(&opts),
            Err(IntegrateError::Unsupported { .. })
        ));
    }
}
