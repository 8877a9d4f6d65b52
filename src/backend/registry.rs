//! The closed set of built-in backends.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backend::{Backend, Rosenbrock, RungeKutta};
use crate::error::IntegrateError;

/// Built-in integration backends, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrator {
    /// Explicit embedded Runge-Kutta (`"rk"`).
    RungeKutta,
    /// Linearly implicit Rosenbrock (`"rosenbrock"`).
    Rosenbrock,
}

impl Integrator {
    pub const ALL: [Integrator; 2] = [Integrator::RungeKutta, Integrator::Rosenbrock];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RungeKutta => "rk",
            Self::Rosenbrock => "rosenbrock",
        }
    }

    /// Look up a backend by its identifier.
    pub fn from_name(name: &str) -> Result<Self, IntegrateError> {
        Self::ALL
            .into_iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| {
                IntegrateError::configuration(format!(
                    "unknown integrator '{}' (available: {})",
                    name,
                    Self::ALL.map(|b| b.name()).join(", ")
                ))
            })
    }

    /// Instantiate the backend adapter.
    pub fn backend(&self) -> Arc<dyn Backend> {
        match self {
            Self::RungeKutta => Arc::new(RungeKutta),
            Self::Rosenbrock => Arc::new(Rosenbrock::new()),
        }
    }
}

impl FromStr for Integrator {
    type Err = IntegrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for Integrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(Integrator::from_name("rk").unwrap(), Integrator::RungeKutta);
        assert_eq!(
            "rosenbrock".parse::<Integrator>().unwrap(),
            Integrator::Rosenbrock
        );
        for b in Integrator::ALL {
            assert_eq!(b.backend().name(), b.name());
        }
    }

    #[test]
    fn test_unknown_name() {
        let err = Integrator::from_name("cvode").unwrap_err();
        assert!(matches!(err, IntegrateError::Configuration { .. }));
        assert!(err.to_string().contains("rosenbrock"));
    }

    #[test]
    fn test_requires_jac_defaults() {
        let rk = Integrator::RungeKutta.backend();
        assert!(!rk.method_requires_jac(rk.default_method()));
        let ros = Integrator::Rosenbrock.backend();
        assert!(ros.method_requires_jac(ros.default_method()));
    }
}
