//! Forward-difference derivatives used when no analytic ones are wired.

use crate::callback::Matrix;

fn increment(v: f64) -> f64 {
    f64::EPSILON.sqrt() * (1.0 + v.abs())
}

/// Forward-difference approximation of `df/dy` at `(x, y)`.
///
/// `f0` is `f(x, y)`. Costs `n` evaluations of `f`.
pub(crate) fn finite_difference_jacobian(
    f: &dyn Fn(f64, &[f64]) -> Vec<f64>,
    x: f64,
    y: &[f64],
    f0: &[f64],
) -> Matrix {
    let n = y.len();
    let mut jac = vec![vec![0.0; n]; n];
    let mut y_pert = y.to_vec();

    for j in 0..n {
        let h = increment(y[j]);
        y_pert[j] = y[j] + h;
        let f_pert = f(x, &y_pert);
        y_pert[j] = y[j];

        for i in 0..n {
            jac[i][j] = (f_pert[i] - f0[i]) / h;
        }
    }
    jac
}

/// Forward-difference approximation of `df/dx` at `(x, y)`.
pub(crate) fn finite_difference_dfdx(
    f: &dyn Fn(f64, &[f64]) -> Vec<f64>,
    x: f64,
    y: &[f64],
    f0: &[f64],
) -> Vec<f64> {
    let h = increment(x);
    let f_pert = f(x + h, y);
    f_pert.iter().zip(f0).map(|(fp, f0)| (fp - f0) / h).collect()
}
