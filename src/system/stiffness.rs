//! Stiffness diagnostic.
//!
//! The stiffness ratio at a point is `max |s| / min |s|` over the singular
//! values `s` of the Jacobian there, singular values standing in for
//! eigenvalue magnitudes.

use numr::algorithm::linalg::LinearAlgebraAlgorithms;
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use numr::tensor::Tensor;

use crate::callback::Matrix;
use crate::error::{IntegrateError, IntegrateResult};
use crate::pipeline::{Triple, XSpec};

use super::OdeSys;

/// Custom eigenvalue callback `eigenvals(x, y, params)`.
pub type EigenvalsFn<'a> = &'a dyn Fn(f64, &[f64], &[f64]) -> Vec<f64>;

/// Largest over smallest magnitude. All zeros give `1.0`; a zero among
/// nonzero values gives `+inf`.
fn magnitude_ratio(values: &[f64]) -> IntegrateResult<f64> {
    if values.is_empty() {
        return Err(IntegrateError::InvalidInput {
            context: "no eigenvalues to compare".to_string(),
        });
    }
    let (lo, hi) = values
        .iter()
        .map(|v| v.abs())
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if hi == 0.0 {
        return Ok(1.0);
    }
    Ok(hi / lo)
}

impl OdeSys {
    /// Stiffness ratio at every sample of a trajectory.
    ///
    /// Defaults to the internal trajectory of the last integration. An
    /// explicit `(x, y, params)` is pre-processed first, `y` holding one
    /// row per sample. Without `eigenvals` the singular values of the
    /// Jacobian are used, which needs a dense Jacobian.
    ///
    /// # Errors
    ///
    /// - [`IntegrateError::NotImplemented`] for a banded system without
    ///   `eigenvals`
    /// - [`IntegrateError::Configuration`] when no Jacobian is configured
    /// - [`IntegrateError::InvalidInput`] when there is no trajectory or its
    ///   `x` and `y` lengths differ
    pub fn stiffness(
        &self,
        xyp: Option<(XSpec, Matrix, Vec<f64>)>,
        eigenvals: Option<EigenvalsFn<'_>>,
    ) -> IntegrateResult<Vec<f64>> {
        if eigenvals.is_none() && self.band.is_some() {
            return Err(IntegrateError::NotImplemented {
                context: "stiffness of a banded system needs an eigenvalue callback".to_string(),
            });
        }

        let Triple { x, y, params } = match xyp {
            Some((x, y, params)) => self.pipeline.pre_process(x, y, params),
            None => self.last_trajectory().ok_or_else(|| IntegrateError::InvalidInput {
                context: "no trajectory: integrate first or pass one explicitly".to_string(),
            })?,
        };
        if x.len() != y.len() {
            return Err(IntegrateError::InvalidInput {
                context: format!("{} abscissas for {} samples", x.len(), y.len()),
            });
        }

        match eigenvals {
            Some(cb) => x
                .iter()
                .zip(&y)
                .map(|(&xi, yi)| magnitude_ratio(&cb(xi, yi, &params)))
                .collect(),
            None => self.svd_ratios(&x, &y, &params),
        }
    }

    fn svd_ratios(&self, x: &[f64], y: &Matrix, params: &[f64]) -> IntegrateResult<Vec<f64>> {
        let Some(jac) = self.jac.as_ref() else {
            return Err(IntegrateError::configuration(
                "stiffness needs a Jacobian or an eigenvalue callback",
            ));
        };

        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());

        let mut ratios = Vec::with_capacity(x.len());
        for (&xi, yi) in x.iter().zip(y) {
            let j = jac.call(xi, yi, params);
            let n = yi.len();
            if j.len() != n || j.iter().any(|row| row.len() != n) {
                return Err(IntegrateError::InvalidInput {
                    context: format!("Jacobian must be {} x {}, got {} rows", n, n, j.len()),
                });
            }
            let flat: Vec<f64> = j.into_iter().flatten().collect();
            let m = Tensor::<CpuRuntime>::from_slice(&flat, &[n, n], &device);
            let svd = client.svd_decompose(&m)?;
            let s: Vec<f64> = svd.s.to_vec();
            ratios.push(magnitude_ratio(&s)?);
        }
        Ok(ratios)
    }
}
