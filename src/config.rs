//! Per-call options and the process-wide default backend.
//!
//! The environment is read only at the boundary: call
//! [`integrator_from_env`] once and pass the result to
//! [`OdeSysBuilder::default_integrator`](crate::OdeSysBuilder::default_integrator).

use std::env;
use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, BackendOptions, Integrator};
use crate::error::IntegrateResult;

/// Backend used when neither the call nor the system names one.
pub const DEFAULT_INTEGRATOR: &str = "rk";

/// Environment variable holding the process-wide default backend name.
pub const INTEGRATOR_ENV_VAR: &str = "ODESYS_INTEGRATOR";

/// Read the default backend name from [`INTEGRATOR_ENV_VAR`], falling back
/// to [`DEFAULT_INTEGRATOR`].
pub fn integrator_from_env() -> String {
    integrator_or_default(env::var(INTEGRATOR_ENV_VAR).ok())
}

fn integrator_or_default(value: Option<String>) -> String {
    match value {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => DEFAULT_INTEGRATOR.to_string(),
    }
}

/// Initial step used when `first_step` is not given.
pub fn default_first_step(x0: f64) -> f64 {
    1e-14 + x0.abs() * 1e-14
}

/// A backend identifier or a pre-bound adapter.
#[derive(Clone)]
pub enum IntegratorChoice {
    Named(String),
    Adapter(Arc<dyn Backend>),
}

impl IntegratorChoice {
    /// Resolve to a backend adapter; unknown names are configuration errors.
    pub fn resolve(&self) -> IntegrateResult<Arc<dyn Backend>> {
        match self {
            Self::Named(name) => Ok(Integrator::from_name(name)?.backend()),
            Self::Adapter(backend) => Ok(Arc::clone(backend)),
        }
    }
}

impl fmt::Debug for IntegratorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "Named({:?})", name),
            Self::Adapter(backend) => write!(f, "Adapter({:?})", backend.name()),
        }
    }
}

impl From<&str> for IntegratorChoice {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for IntegratorChoice {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<Integrator> for IntegratorChoice {
    fn from(integrator: Integrator) -> Self {
        Self::Named(integrator.name().to_string())
    }
}

impl From<Arc<dyn Backend>> for IntegratorChoice {
    fn from(backend: Arc<dyn Backend>) -> Self {
        Self::Adapter(backend)
    }
}

/// Options for a single `integrate` call.
#[derive(Debug, Clone)]
pub struct IntegrateOptions {
    /// Backend (default: the system's default integrator)
    pub integrator: Option<IntegratorChoice>,

    /// Native method name (default: the backend's default method)
    pub method: Option<String>,

    /// Absolute tolerance (default: 1e-8)
    pub atol: f64,

    /// Relative tolerance (default: 1e-8)
    pub rtol: f64,

    /// Initial step size (default: [`default_first_step`] of the start value)
    pub first_step: Option<f64>,

    /// Supply the Jacobian (default: whether the method requires one)
    pub with_jacobian: Option<bool>,

    /// Use predefined mode even for a two-point grid (default: false)
    pub force_predefined: bool,

    /// Maximum number of step attempts (default: 100000)
    pub max_steps: usize,

    /// Maximum step size (default: unbounded)
    pub max_step: Option<f64>,

    /// Minimum step size (default: a few ulps of x)
    pub min_step: Option<f64>,

    /// Stop at the first root (adaptive mode only, default: false)
    pub return_on_root: bool,

    /// Per-call banded shape `(lband, uband)`.
    ///
    /// Always rejected: the band is fixed when the system is built.
    pub band: Option<(i64, i64)>,
}

impl Default for IntegrateOptions {
    fn default() -> Self {
        Self {
            integrator: None,
            method: None,
            atol: 1e-8,
            rtol: 1e-8,
            first_step: None,
            with_jacobian: None,
            force_predefined: false,
            max_steps: 100_000,
            max_step: None,
            min_step: None,
            return_on_root: false,
            band: None,
        }
    }
}

impl IntegrateOptions {
    /// Create options with specified tolerances.
    pub fn with_tolerances(atol: f64, rtol: f64) -> Self {
        Self {
            atol,
            rtol,
            ..Default::default()
        }
    }

    /// Set the backend.
    pub fn integrator(mut self, integrator: impl Into<IntegratorChoice>) -> Self {
        self.integrator = Some(integrator.into());
        self
    }

    /// Set the native method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set the tolerances.
    pub fn tolerances(mut self, atol: f64, rtol: f64) -> Self {
        self.atol = atol;
        self.rtol = rtol;
        self
    }

    /// Set the initial step size.
    pub fn first_step(mut self, h0: f64) -> Self {
        self.first_step = Some(h0);
        self
    }

    /// Force or suppress Jacobian usage.
    pub fn with_jacobian(mut self, use_jac: bool) -> Self {
        self.with_jacobian = Some(use_jac);
        self
    }

    pub fn force_predefined(mut self, force: bool) -> Self {
        self.force_predefined = force;
        self
    }

    /// Set step size bounds.
    pub fn step_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_step = Some(min);
        self.max_step = Some(max);
        self
    }

    /// Set maximum number of steps.
    pub fn max_steps(mut self, n: usize) -> Self {
        self.max_steps = n;
        self
    }

    pub fn return_on_root(mut self, stop: bool) -> Self {
        self.return_on_root = stop;
        self
    }

    /// Lower to the options a backend sees, starting at `x0`.
    pub(crate) fn backend_options(&self, x0: f64) -> BackendOptions {
        BackendOptions {
            method: self.method.clone(),
            atol: self.atol,
            rtol: self.rtol,
            first_step: self.first_step.unwrap_or_else(|| default_first_step(x0)),
            max_step: self.max_step,
            min_step: self.min_step,
            max_steps: self.max_steps,
            band: None,
            return_on_root: self.return_on_root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrator_fallback() {
        assert_eq!(integrator_or_default(None), "rk");
        assert_eq!(integrator_or_default(Some("  ".to_string())), "rk");
        assert_eq!(
            integrator_or_default(Some("rosenbrock".to_string())),
            "rosenbrock"
        );
    }

    #[test]
    fn test_default_first_step() {
        assert_eq!(default_first_step(0.0), 1e-14);
        assert!((default_first_step(-2.0) - 3e-14).abs() < 1e-28);
    }

    #[test]
    fn test_integrate_options() {
        let opts = IntegrateOptions::default();
        assert_eq!(opts.atol, 1e-8);
        assert_eq!(opts.rtol, 1e-8);
        assert!(opts.with_jacobian.is_none());
        assert!(!opts.force_predefined);

        let opts = IntegrateOptions::with_tolerances(1e-10, 1e-6)
            .method("dop853")
            .first_step(1e-3);
        let lowered = opts.backend_options(5.0);
        assert_eq!(lowered.atol, 1e-10);
        assert_eq!(lowered.rtol, 1e-6);
        assert_eq!(lowered.first_step, 1e-3);
        assert_eq!(lowered.method.as_deref(), Some("dop853"));

        let lowered = IntegrateOptions::default().backend_options(5.0);
        assert!((lowered.first_step - 6e-14).abs() < 1e-28);
    }

    #[test]
    fn test_choice_resolution() {
        let choice = IntegratorChoice::from("rosenbrock");
        assert_eq!(choice.resolve().unwrap().name(), "rosenbrock");
        assert!(IntegratorChoice::from("nope").resolve().is_err());

        let adapter: Arc<dyn Backend> = Integrator::RungeKutta.backend();
        let choice = IntegratorChoice::from(adapter);
        assert_eq!(choice.resolve().unwrap().name(), "rk");
    }
}
