//! Per-call integration metadata.

use crate::backend::RootEvent;
use crate::callback::Matrix;

/// Info record returned by every `integrate` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntegrationInfo {
    /// Internal independent-variable sequence (before post-processing).
    pub internal_xout: Vec<f64>,
    /// Internal dependent-variable matrix (before post-processing).
    pub internal_yout: Matrix,
    pub success: bool,
    /// Number of right-hand side evaluations.
    pub nfev: usize,
    /// Number of Jacobian evaluations; `None` unless a configured Jacobian
    /// was wired to the backend.
    pub njev: Option<usize>,
    /// Accepted steps.
    pub nsteps: usize,
    /// Rejected steps.
    pub nrejected: usize,
    /// Backend that ran the integration.
    pub integrator: String,
    /// Native method used by the backend.
    pub method: String,
    /// Roots of the root function located during integration.
    pub roots: Vec<RootEvent>,
    /// Backend message, set on failure.
    pub message: Option<String>,
}

impl IntegrationInfo {
    /// Total step attempts.
    pub fn attempts(&self) -> usize {
        self.nsteps + self.nrejected
    }
}
