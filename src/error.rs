//! Error types for ODE system integration.

use std::fmt;

use crate::callback::Matrix;

/// Result type for integration operations.
pub type IntegrateResult<T> = Result<T, IntegrateError>;

/// Errors that can occur while configuring or integrating an ODE system.
#[derive(Debug, Clone)]
pub enum IntegrateError {
    /// Invalid or conflicting setup (bad band, missing Jacobian, missing
    /// root count, per-call band override, unknown integrator name).
    Configuration { message: String },

    /// A user callback does not accept enough arguments.
    Arity {
        expected: usize,
        found: usize,
        context: String,
    },

    /// The backend reported non-success.
    ///
    /// Carries the partial internal trajectory computed before the failure.
    IntegrationFailure {
        message: String,
        xout: Vec<f64>,
        yout: Matrix,
        nfev: usize,
    },

    /// The backend does not support a requested feature.
    Unsupported { backend: String, feature: String },

    /// The requested operation is not available for this configuration.
    NotImplemented { context: String },

    /// Invalid interval provided (e.g., a >= b).
    InvalidInterval { a: f64, b: f64, context: String },

    /// Invalid input array size or dimensions.
    InvalidInput { context: String },

    /// Step size became too small during adaptive integration.
    StepSizeTooSmall { step: f64, t: f64, context: String },

    /// Maximum number of steps exceeded.
    MaxStepsExceeded {
        steps: usize,
        t: f64,
        context: String,
    },

    /// Error from underlying numr operation.
    NumrError(String),
}

impl IntegrateError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(backend: &str, feature: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.to_string(),
            feature: feature.into(),
        }
    }

    /// Partial trajectory attached to an [`IntegrateError::IntegrationFailure`].
    pub fn partial_trajectory(&self) -> Option<(&[f64], &Matrix)> {
        match self {
            Self::IntegrationFailure { xout, yout, .. } => Some((xout, yout)),
            _ => None,
        }
    }
}

impl fmt::Display for IntegrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::Arity {
                expected,
                found,
                context,
            } => {
                write!(
                    f,
                    "{}: callback takes {} argument(s), at least {} required",
                    context, found, expected
                )
            }
            Self::IntegrationFailure {
                message,
                xout,
                nfev,
                ..
            } => {
                write!(
                    f,
                    "Integration failed: {} ({} points computed, nfev = {})",
                    message,
                    xout.len(),
                    nfev
                )
            }
            Self::Unsupported { backend, feature } => {
                write!(f, "Backend '{}' does not support {}", backend, feature)
            }
            Self::NotImplemented { context } => {
                write!(f, "Not implemented: {}", context)
            }
            Self::InvalidInterval { a, b, context } => {
                write!(
                    f,
                    "Invalid interval [{}, {}] in {}: bounds must satisfy a < b",
                    a, b, context
                )
            }
            Self::InvalidInput { context } => {
                write!(f, "Invalid input: {}", context)
            }
            Self::StepSizeTooSmall { step, t, context } => {
                write!(
                    f,
                    "{}: step size {:.2e} too small at t = {:.6}",
                    context, step, t
                )
            }
            Self::MaxStepsExceeded { steps, t, context } => {
                write!(
                    f,
                    "{}: exceeded maximum {} steps at t = {:.6}",
                    context, steps, t
                )
            }
            Self::NumrError(msg) => {
                write!(f, "numr error: {}", msg)
            }
        }
    }
}

impl std::error::Error for IntegrateError {}

impl From<numr::error::Error> for IntegrateError {
    fn from(err: numr::error::Error) -> Self {
        Self::NumrError(err.to_string())
    }
}
