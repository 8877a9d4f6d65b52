//! The ODE system: callbacks, banded shape, processors and the trajectory of
//! the most recent integration.
//!
//! ```ignore
//! use odesys::{IntegrateOptions, OdeSys, UserFn};
//!
//! // dy/dx = p0 * x + p1 * y0^2
//! let mut sys = OdeSys::new(UserFn::ternary(|x, y: &[f64], p: &[f64]| {
//!     vec![p[0] * x + p[1] * y[0] * y[0]]
//! }))?;
//! let opts = IntegrateOptions::default();
//! let (yout, info) = sys.predefined(&[1.0], &[0.0, 0.2, 0.5], &[2.0, 1.0], &opts)?;
//! assert_eq!(yout.len(), 3);
//! assert!(info.success);
//! ```

mod dispatch;
mod info;
mod stiffness;

pub use info::IntegrationInfo;
pub use stiffness::EigenvalsFn;

use crate::backend::Band;
use crate::callback::{Callback, Matrix, UserFn, normalize};
use crate::config::{DEFAULT_INTEGRATOR, IntegratorChoice};
use crate::error::{IntegrateError, IntegrateResult};
use crate::pipeline::{Pipeline, Triple, XSpec};

/// Minimum arity of every callback: `(x, y)`.
const MIN_ARITY: usize = 2;

/// An ODE system `dy/dx = f(x, y, p)` and everything needed to integrate it.
#[derive(Debug)]
pub struct OdeSys {
    f: Callback<Vec<f64>>,
    jac: Option<Callback<Matrix>>,
    dfdx: Option<Callback<Vec<f64>>>,
    roots: Option<Callback<Vec<f64>>>,
    nroots: Option<usize>,
    band: Option<Band>,
    names: Option<Vec<String>>,
    pipeline: Pipeline,
    default_integrator: IntegratorChoice,
    internal_xout: Vec<f64>,
    internal_yout: Matrix,
    internal_params: Vec<f64>,
}

impl OdeSys {
    /// System with only a right-hand side.
    pub fn new(f: UserFn<Vec<f64>>) -> IntegrateResult<Self> {
        OdeSysBuilder::new(f).build()
    }

    pub fn builder(f: UserFn<Vec<f64>>) -> OdeSysBuilder {
        OdeSysBuilder::new(f)
    }

    /// Banded Jacobian shape, if any.
    pub fn band(&self) -> Option<Band> {
        self.band
    }

    /// Names of the dependent variables, for labelling output.
    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn nroots(&self) -> Option<usize> {
        self.nroots
    }

    pub fn has_jacobian(&self) -> bool {
        self.jac.is_some()
    }

    pub fn has_roots(&self) -> bool {
        self.roots.is_some()
    }

    /// Independent variable of the last integration, internal representation.
    pub fn internal_xout(&self) -> &[f64] {
        &self.internal_xout
    }

    /// Dependent variables of the last integration, internal representation.
    pub fn internal_yout(&self) -> &Matrix {
        &self.internal_yout
    }

    /// Parameters of the last integration, internal representation.
    pub fn internal_params(&self) -> &[f64] {
        &self.internal_params
    }

    /// The internal trajectory of the last integration, `None` before the
    /// first call.
    pub fn last_trajectory(&self) -> Option<Triple> {
        if self.internal_xout.is_empty() {
            return None;
        }
        Some(Triple::new(
            self.internal_xout.clone(),
            self.internal_yout.clone(),
            self.internal_params.clone(),
        ))
    }

    /// Run the pre-processor chain on an initial state.
    pub fn pre_process(&self, x: impl Into<XSpec>, y0: &[f64], params: &[f64]) -> Triple {
        self.pipeline
            .pre_process(x.into(), vec![y0.to_vec()], params.to_vec())
    }

    /// Run the post-processor chain on an internal trajectory.
    pub fn post_process(&self, triple: Triple) -> Triple {
        self.pipeline.post_process(triple)
    }

    fn store_trajectory(&mut self, xout: Vec<f64>, yout: Matrix) {
        self.internal_xout = xout;
        self.internal_yout = yout;
    }
}

/// Builder for [`OdeSys`].
///
/// All validation happens in [`OdeSysBuilder::build`].
#[derive(Debug)]
pub struct OdeSysBuilder {
    f: UserFn<Vec<f64>>,
    jac: Option<UserFn<Matrix>>,
    dfdx: Option<UserFn<Vec<f64>>>,
    roots: Option<UserFn<Vec<f64>>>,
    nroots: Option<usize>,
    band: Option<(i64, i64)>,
    names: Option<Vec<String>>,
    pipeline: Pipeline,
    default_integrator: Option<IntegratorChoice>,
}

impl OdeSysBuilder {
    pub fn new(f: UserFn<Vec<f64>>) -> Self {
        Self {
            f,
            jac: None,
            dfdx: None,
            roots: None,
            nroots: None,
            band: None,
            names: None,
            pipeline: Pipeline::new(),
            default_integrator: None,
        }
    }

    /// Jacobian `df/dy`: dense, or packed band storage when a band is set.
    pub fn jacobian(mut self, jac: UserFn<Matrix>) -> Self {
        self.jac = Some(jac);
        self
    }

    /// Partial derivative `df/dx`.
    pub fn dfdx(mut self, dfdx: UserFn<Vec<f64>>) -> Self {
        self.dfdx = Some(dfdx);
        self
    }

    pub fn roots(mut self, roots: UserFn<Vec<f64>>) -> Self {
        self.roots = Some(roots);
        self
    }

    /// Number of values the root function returns.
    pub fn nroots(mut self, nroots: usize) -> Self {
        self.nroots = Some(nroots);
        self
    }

    /// Banded Jacobian with `lband` sub- and `uband` super-diagonals.
    pub fn band(mut self, lband: i64, uband: i64) -> Self {
        self.band = Some((lband, uband));
        self
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Append a pre-processor.
    pub fn pre_processor<F>(mut self, f: F) -> Self
    where
        F: Fn(Triple) -> Triple + 'static,
    {
        self.pipeline.push_pre(f);
        self
    }

    /// Append a post-processor.
    pub fn post_processor<F>(mut self, f: F) -> Self
    where
        F: Fn(Triple) -> Triple + 'static,
    {
        self.pipeline.push_post(f);
        self
    }

    /// Backend used when a call does not name one.
    pub fn default_integrator(mut self, integrator: impl Into<IntegratorChoice>) -> Self {
        self.default_integrator = Some(integrator.into());
        self
    }

    pub fn build(self) -> IntegrateResult<OdeSys> {
        let band = match self.band {
            None => None,
            Some((lband, uband)) => {
                if lband < 0 || uband < 0 {
                    return Err(IntegrateError::configuration(format!(
                        "band must be non-negative, got ({}, {})",
                        lband, uband
                    )));
                }
                Some(Band::new(lband as usize, uband as usize))
            }
        };

        Ok(OdeSys {
            f: normalize(self.f, MIN_ARITY)?,
            jac: self.jac.map(|j| normalize(j, MIN_ARITY)).transpose()?,
            dfdx: self.dfdx.map(|d| normalize(d, MIN_ARITY)).transpose()?,
            roots: self.roots.map(|r| normalize(r, MIN_ARITY)).transpose()?,
            nroots: self.nroots,
            band,
            names: self.names,
            pipeline: self.pipeline,
            default_integrator: self
                .default_integrator
                .unwrap_or_else(|| IntegratorChoice::from(DEFAULT_INTEGRATOR)),
            internal_xout: Vec::new(),
            internal_yout: Vec::new(),
            internal_params: Vec::new(),
        })
    }
}
