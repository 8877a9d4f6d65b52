//! Step size control shared by the built-in backends.

/// Step size controller for adaptive methods.
#[derive(Debug, Clone)]
pub struct StepSizeController {
    /// Safety factor (default: 0.9)
    pub safety: f64,
    /// Minimum scale factor (default: 0.2)
    pub min_factor: f64,
    /// Maximum scale factor (default: 10.0)
    pub max_factor: f64,
}

impl Default for StepSizeController {
    fn default() -> Self {
        Self {
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 10.0,
        }
    }
}

impl StepSizeController {
    /// Compute the new step size based on error estimate.
    ///
    /// # Arguments
    /// * `h` - Current step size
    /// * `err` - Normalized error (should be <= 1 for step acceptance)
    /// * `order` - Order of the error estimator
    pub fn compute_step(&self, h: f64, err: f64, order: usize) -> (f64, bool) {
        let accept = err <= 1.0;

        let exponent = 1.0 / (order as f64 + 1.0);
        let factor = if err == 0.0 {
            self.max_factor
        } else if !err.is_finite() {
            self.min_factor
        } else {
            self.safety * (1.0 / err).powf(exponent)
        };

        let factor = factor.clamp(self.min_factor, self.max_factor);

        // Don't increase step size after rejection
        let factor = if accept { factor } else { factor.min(1.0) };

        (h * factor, accept)
    }
}

/// Compute the RMS error norm scaled by `atol + rtol * |y|`.
pub fn compute_error(y_new: &[f64], y_err: &[f64], y_old: &[f64], rtol: f64, atol: f64) -> f64 {
    let n = y_new.len();
    let mut err_sum = 0.0;

    for i in 0..n {
        let sc = atol + rtol * y_old[i].abs().max(y_new[i].abs());
        err_sum += (y_err[i] / sc).powi(2);
    }

    (err_sum / n as f64).sqrt()
}

/// Smallest step the driver will attempt near `x`.
pub fn default_min_step(x: f64) -> f64 {
    10.0 * f64::EPSILON * x.abs().max(1e-3)
}
