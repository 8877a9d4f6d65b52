//! Root-function sign-change detection and root refinement.
//!
//! After every accepted step the root function is evaluated at the new
//! point and compared component-wise with the previous value. A sign change
//! is refined on the step length with Brent's method, re-taking the step from
//! the last accepted point so the located state is as accurate as the step
//! itself.

use crate::backend::RootFunction;
use crate::error::{IntegrateError, IntegrateResult};

/// Tracks the last root-function value across accepted steps.
pub(crate) struct RootTracker<'a> {
    root_fn: RootFunction<'a>,
    g_old: Vec<f64>,
}

impl<'a> RootTracker<'a> {
    pub(crate) fn new(root_fn: RootFunction<'a>, x0: f64, y0: &[f64]) -> IntegrateResult<Self> {
        let mut tracker = Self {
            root_fn,
            g_old: Vec::new(),
        };
        tracker.g_old = tracker.evaluate(x0, y0)?;
        Ok(tracker)
    }

    /// Evaluate the root function, checking its declared output count.
    pub(crate) fn evaluate(&self, x: f64, y: &[f64]) -> IntegrateResult<Vec<f64>> {
        let g = (self.root_fn.f)(x, y);
        if g.len() != self.root_fn.nroots {
            return Err(IntegrateError::InvalidInput {
                context: format!(
                    "root function returned {} values, {} declared",
                    g.len(),
                    self.root_fn.nroots
                ),
            });
        }
        Ok(g)
    }

    /// Components whose sign changed between the previous value and `g_new`.
    ///
    /// A component that is exactly zero at the previous point is skipped, so
    /// a root that was just reported is not reported again.
    pub(crate) fn crossings(&self, g_new: &[f64]) -> Vec<usize> {
        self.g_old
            .iter()
            .zip(g_new)
            .enumerate()
            .filter(|(_, (old, new))| {
                **old != 0.0 && (**new == 0.0 || (**old < 0.0) != (**new < 0.0))
            })
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn previous(&self, index: usize) -> f64 {
        self.g_old[index]
    }

    /// Record the value at a new accepted point.
    pub(crate) fn update(&mut self, g: Vec<f64>) {
        self.g_old = g;
    }

    /// Record the value at a located root; the root component is pinned to
    /// zero.
    pub(crate) fn mark_root(&mut self, mut g: Vec<f64>, index: usize) {
        g[index] = 0.0;
        self.g_old = g;
    }
}

/// Brent's method for a root of `phi` in `[a, b]`.
///
/// `fa` and `fb` are `phi(a)` and `phi(b)` and must differ in sign (or one
/// be zero).
pub(crate) fn brent<F>(
    mut phi: F,
    a: f64,
    b: f64,
    fa: f64,
    fb: f64,
    tol: f64,
    max_iter: usize,
) -> IntegrateResult<f64>
where
    F: FnMut(f64) -> IntegrateResult<f64>,
{
    if (fa > 0.0 && fb > 0.0) || (fa < 0.0 && fb < 0.0) {
        return Err(IntegrateError::InvalidInput {
            context: format!("root bracket has same sign: f(a) = {}, f(b) = {}", fa, fb),
        });
    }

    let mut xa = a;
    let mut xb = b;
    let mut fa = fa;
    let mut fb = fb;

    let mut xc = xa;
    let mut fc = fa;
    let mut d = xb - xa;
    let mut e = d;

    for _ in 0..max_iter {
        if (fb > 0.0 && fc > 0.0) || (fb < 0.0 && fc < 0.0) {
            xc = xa;
            fc = fa;
            d = xb - xa;
            e = d;
        }

        if fc.abs() < fb.abs() {
            xa = xb;
            xb = xc;
            xc = xa;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol1 = 2.0 * f64::EPSILON * xb.abs() + 0.5 * tol;
        let xm = 0.5 * (xc - xb);

        if xm.abs() <= tol1 || fb == 0.0 {
            return Ok(xb);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            let s = fb / fa;
            let (p, q) = if xa == xc {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q_temp = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q_temp * (q_temp - r) - (xb - xa) * (r - 1.0)),
                    (q_temp - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };

            let (p, q) = if p > 0.0 { (p, -q) } else { (-p, q) };

            if 2.0 * p < (3.0 * xm * q - (tol1 * q).abs()).min((e * q).abs()) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        xa = xb;
        fa = fb;

        if d.abs() > tol1 {
            xb += d;
        } else {
            xb += if xm > 0.0 { tol1 } else { -tol1 };
        }

        fb = phi(xb)?;
    }

    // The bracket is still valid; return the best estimate.
    Ok(xb)
}
