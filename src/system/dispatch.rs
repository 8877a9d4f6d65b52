//! The integration entry points.

use crate::backend::{Backend, Problem, RootFunction};
use crate::callback::{Matrix, bind_parameters, instrument};
use crate::config::IntegrateOptions;
use crate::error::{IntegrateError, IntegrateResult};
use crate::pipeline::{Triple, XSpec};

use super::{IntegrationInfo, OdeSys};

/// Result of one backend call plus what the dispatcher measured around it.
struct Run {
    xout: Vec<f64>,
    yout: Matrix,
    info: IntegrationInfo,
}

impl OdeSys {
    /// Integrate the system.
    ///
    /// A two-point `x` (after pre-processing) runs in adaptive mode unless
    /// `options.force_predefined` is set; anything else is an output grid.
    /// Returns the post-processed `(x, y)` and the info record.
    ///
    /// # Errors
    ///
    /// - [`IntegrateError::Configuration`] for a per-call band, an unknown
    ///   backend name, a Jacobian requested but not configured, or a root
    ///   function without a root count
    /// - [`IntegrateError::Unsupported`] when the backend cannot honor a
    ///   requested feature
    /// - [`IntegrateError::IntegrationFailure`] when the backend reports
    ///   non-success; the partial trajectory is attached and also stored on
    ///   the system
    pub fn integrate(
        &mut self,
        x: impl Into<XSpec>,
        y0: &[f64],
        params: &[f64],
        options: &IntegrateOptions,
    ) -> IntegrateResult<(Vec<f64>, Matrix, IntegrationInfo)> {
        let Triple {
            x: xs,
            y: y0s,
            params,
        } = self.pre_process(x, y0, params);
        self.internal_params = params.clone();

        let run = self.run(&xs, &y0s, &params, options)?;

        self.store_trajectory(run.xout.clone(), run.yout.clone());
        if !run.info.success {
            let message = run
                .info
                .message
                .clone()
                .unwrap_or_else(|| "backend reported failure".to_string());
            log::warn!("{} ({}): {}", run.info.integrator, run.info.method, message);
            return Err(IntegrateError::IntegrationFailure {
                message,
                xout: run.xout,
                yout: run.yout,
                nfev: run.info.nfev,
            });
        }

        let out = self.post_process(Triple::new(run.xout, run.yout, params));
        Ok((out.x, out.y, run.info))
    }

    /// Integrate from `x0` to `xend` letting the backend choose the output
    /// points.
    pub fn adaptive(
        &mut self,
        y0: &[f64],
        x0: f64,
        xend: f64,
        params: &[f64],
        options: &IntegrateOptions,
    ) -> IntegrateResult<(Vec<f64>, Matrix, IntegrationInfo)> {
        self.integrate((x0, xend), y0, params, options)
    }

    /// Integrate reporting the state at each point of `xout`.
    ///
    /// The echoed `x` is dropped since it equals `xout`.
    pub fn predefined(
        &mut self,
        y0: &[f64],
        xout: &[f64],
        params: &[f64],
        options: &IntegrateOptions,
    ) -> IntegrateResult<(Matrix, IntegrationInfo)> {
        let options = IntegrateOptions {
            force_predefined: true,
            ..options.clone()
        };
        let (_, yout, info) = self.integrate(xout, y0, params, &options)?;
        Ok((yout, info))
    }

    fn run(
        &self,
        xs: &[f64],
        y0s: &Matrix,
        params: &[f64],
        options: &IntegrateOptions,
    ) -> IntegrateResult<Run> {
        if options.band.is_some() {
            return Err(IntegrateError::configuration(
                "band is fixed when the system is built and cannot be passed per call",
            ));
        }
        let [y0] = y0s.as_slice() else {
            return Err(IntegrateError::InvalidInput {
                context: format!(
                    "pre-processing must yield a single initial state, got {} rows",
                    y0s.len()
                ),
            });
        };
        let Some(&x0) = xs.first() else {
            return Err(IntegrateError::InvalidInput {
                context: "empty independent variable".to_string(),
            });
        };

        let backend = options
            .integrator
            .as_ref()
            .unwrap_or(&self.default_integrator)
            .resolve()?;

        let adaptive = xs.len() == 2 && !options.force_predefined;

        let mut bopts = options.backend_options(x0);
        bopts.band = self.band;
        let method = backend.resolve_method(&bopts)?;
        let with_jacobian = options
            .with_jacobian
            .unwrap_or_else(|| backend.method_requires_jac(method));

        log::debug!(
            "integrating with {} ({}), {} mode, with_jacobian = {}",
            backend.name(),
            method,
            if adaptive { "adaptive" } else { "predefined" },
            with_jacobian
        );

        let f = instrument(bind_parameters(&self.f, params));
        let rhs = |x: f64, y: &[f64]| f.call(x, y);

        let jac = match (with_jacobian, &self.jac) {
            (false, _) => None,
            (true, Some(jac)) => Some(instrument(bind_parameters(jac, params))),
            (true, None) => {
                return Err(IntegrateError::configuration(format!(
                    "with_jacobian requested for {} ({}) but no Jacobian is configured",
                    backend.name(),
                    method
                )));
            }
        };
        let jac_fn = jac.as_ref().map(|j| move |x: f64, y: &[f64]| j.call(x, y));

        // df/dx travels with the analytic Jacobian
        let dfdx = match (&jac, &self.dfdx) {
            (Some(_), Some(d)) => Some(bind_parameters(d, params)),
            _ => None,
        };

        let roots = match (&self.roots, self.nroots) {
            (None, _) => None,
            (Some(roots), Some(nroots)) => Some((bind_parameters(roots, params), nroots)),
            (Some(_), None) => {
                return Err(IntegrateError::configuration(
                    "a root function is configured without nroots",
                ));
            }
        };

        let jac_dyn: Option<&dyn Fn(f64, &[f64]) -> Matrix> = match &jac_fn {
            Some(j) => Some(j),
            None => None,
        };
        let problem = Problem {
            rhs: &rhs,
            jac: jac_dyn,
            dfdx: dfdx.as_deref(),
            roots: roots.as_ref().map(|(g, nroots)| RootFunction {
                f: &**g,
                nroots: *nroots,
            }),
            y0,
        };

        let (xout, yout, binfo) = if adaptive {
            let out = backend.integrate_adaptive(&problem, x0, xs[1], &bopts)?;
            if out.xout.len() != out.yout.len() {
                return Err(IntegrateError::InvalidInput {
                    context: format!(
                        "{} returned {} abscissas for {} rows",
                        backend.name(),
                        out.xout.len(),
                        out.yout.len()
                    ),
                });
            }
            (out.xout, out.yout, out.info)
        } else {
            let out = backend.integrate_predefined(&problem, xs, &bopts)?;
            let rows = out.yout.len();
            if rows > xs.len() || (out.info.success && rows != xs.len()) {
                return Err(IntegrateError::InvalidInput {
                    context: format!(
                        "{} returned {} rows for a grid of {} points",
                        backend.name(),
                        rows,
                        xs.len()
                    ),
                });
            }
            (xs[..rows].to_vec(), out.yout, out.info)
        };

        let info = IntegrationInfo {
            internal_xout: xout.clone(),
            internal_yout: yout.clone(),
            success: binfo.success,
            nfev: f.calls(),
            njev: jac.as_ref().map(|j| j.calls()),
            nsteps: binfo.naccept,
            nrejected: binfo.nreject,
            integrator: backend.name().to_string(),
            method: binfo.method,
            roots: binfo.roots,
            message: binfo.message,
        };
        Ok(Run { xout, yout, info })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::backend::{
        AdaptiveOutput, BackendInfo, BackendOptions, Integrator, PredefinedOutput,
    };
    use crate::callback::UserFn;
    use crate::pipeline::Triple;

    use super::*;

    fn riccati() -> OdeSys {
        // dy/dx = p0 * x + p1 * y0^2
        OdeSys::new(UserFn::ternary(|x, y: &[f64], p: &[f64]| {
            vec![p[0] * x + p[1] * y[0] * y[0]]
        }))
        .unwrap()
    }

    fn decay_with_jac() -> OdeSys {
        OdeSys::builder(UserFn::ternary(|_x, y: &[f64], p: &[f64]| {
            vec![-p[0] * y[0]]
        }))
        .jacobian(UserFn::ternary(|_x, _y: &[f64], p: &[f64]| {
            vec![vec![-p[0]]]
        }))
        .build()
        .unwrap()
    }

    #[test]
    fn test_predefined_scenario() {
        let mut sys = riccati();
        let (yout, info) = sys
            .predefined(&[1.0], &[0.0, 0.2, 0.5], &[2.0, 1.0], &IntegrateOptions::default())
            .unwrap();

        assert_eq!(yout.len(), 3);
        assert_eq!(yout[0], vec![1.0]);
        assert!(info.success);
        assert!(info.nfev > 0);
        assert!(info.njev.is_none());
        assert_eq!(info.integrator, "rk");
        assert_eq!(sys.internal_xout(), &[0.0, 0.2, 0.5]);
        assert_eq!(sys.internal_params(), &[2.0, 1.0]);
    }

    #[test]
    fn test_adaptive_properties() {
        let mut sys = decay_with_jac();
        let (xout, yout, info) = sys
            .adaptive(&[1.0], 0.0, 2.0, &[0.5], &IntegrateOptions::default())
            .unwrap();

        assert_eq!(xout[0], 0.0);
        assert!(*xout.last().unwrap() >= 2.0);
        assert!(xout.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(xout.len(), yout.len());
        assert!(info.nfev > 0);
        // rk does not use a Jacobian by default
        assert!(info.njev.is_none());

        let y_final = yout.last().unwrap()[0];
        let exact = (-1.0_f64).exp();
        assert!(
            (y_final - exact).abs() < 1e-6,
            "y_final = {}, exact = {}",
            y_final,
            exact
        );
    }

    #[test]
    fn test_force_predefined_two_points() {
        let mut sys = decay_with_jac();
        let opts = IntegrateOptions::default();
        let (xout, _, _) = sys.integrate((0.0, 1.0), &[1.0], &[1.0], &opts).unwrap();
        assert!(xout.len() > 2);

        let opts = opts.force_predefined(true);
        let (xout, yout, _) = sys.integrate((0.0, 1.0), &[1.0], &[1.0], &opts).unwrap();
        assert_eq!(xout, vec![0.0, 1.0]);
        assert_eq!(yout.len(), 2);
    }

    #[test]
    fn test_scalar_endpoint_starts_at_zero() {
        let mut sys = decay_with_jac();
        let (xout, _, _) = sys
            .integrate(1.5, &[1.0], &[1.0], &IntegrateOptions::default())
            .unwrap();
        assert_eq!(xout[0], 0.0);
        assert!(*xout.last().unwrap() >= 1.5);
    }

    #[test]
    fn test_jacobian_defaults_per_backend() {
        let mut sys = decay_with_jac();

        let opts = IntegrateOptions::default().integrator("rosenbrock");
        let (_, info) = sys.predefined(&[1.0], &[0.0, 1.0], &[2.0], &opts).unwrap();
        assert_eq!(info.method, "ode23s");
        assert!(info.njev.unwrap() > 0);

        let opts = opts.with_jacobian(false);
        let (yout, info) = sys.predefined(&[1.0], &[0.0, 1.0], &[2.0], &opts).unwrap();
        assert!(info.njev.is_none());
        assert!((yout[1][0] - (-2.0_f64).exp()).abs() < 1e-4);

        let opts = IntegrateOptions::default().with_jacobian(true);
        let (_, info) = sys.predefined(&[1.0], &[0.0, 1.0], &[2.0], &opts).unwrap();
        assert_eq!(info.integrator, "rk");
        assert!(info.njev.is_some());
    }

    #[test]
    fn test_missing_jacobian_is_configuration_error() {
        let mut sys = riccati();
        let opts = IntegrateOptions::default().with_jacobian(true);
        let err = sys
            .predefined(&[1.0], &[0.0, 0.5], &[2.0, 1.0], &opts)
            .unwrap_err();
        assert!(matches!(err, IntegrateError::Configuration { .. }));

        // ode23s wants a Jacobian unless told otherwise
        let opts = IntegrateOptions::default().integrator(Integrator::Rosenbrock);
        assert!(matches!(
            sys.predefined(&[1.0], &[0.0, 0.5], &[2.0, 1.0], &opts),
            Err(IntegrateError::Configuration { .. })
        ));
    }

    #[test]
    fn test_per_call_band_rejected() {
        let mut sys = OdeSys::builder(UserFn::binary(|_x, y: &[f64]| vec![-y[0]]))
            .band(0, 0)
            .build()
            .unwrap();
        let opts = IntegrateOptions {
            band: Some((1, 1)),
            ..Default::default()
        };
        assert!(matches!(
            sys.integrate(1.0, &[1.0], &[], &opts),
            Err(IntegrateError::Configuration { .. })
        ));
    }

    #[test]
    fn test_band_unsupported_by_rk() {
        let mut sys = OdeSys::builder(UserFn::binary(|_x, y: &[f64]| vec![-y[0]]))
            .band(0, 0)
            .build()
            .unwrap();
        assert!(matches!(
            sys.integrate(1.0, &[1.0], &[], &IntegrateOptions::default()),
            Err(IntegrateError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_unknown_integrator() {
        let mut sys = riccati();
        let opts = IntegrateOptions::default().integrator("lsoda");
        assert!(matches!(
            sys.integrate(0.1, &[1.0], &[2.0, 1.0], &opts),
            Err(IntegrateError::Configuration { .. })
        ));
    }

    #[test]
    fn test_integration_failure_keeps_partial_trajectory() {
        let mut sys = riccati();
        let opts = IntegrateOptions::default().max_steps(20);
        let err = sys
            .integrate((0.0, 0.5), &[1.0], &[2.0, 1.0], &opts)
            .unwrap_err();

        let (xout, yout) = err.partial_trajectory().unwrap();
        assert!(!xout.is_empty());
        assert_eq!(xout.len(), yout.len());
        assert_eq!(xout[0], 0.0);
        assert_eq!(sys.internal_xout(), xout);
    }

    #[test]
    fn test_pipeline_applied_both_ways() {
        // Internally integrate u = 2 y; report y.
        let mut sys = OdeSys::builder(UserFn::binary(|_x, u: &[f64]| vec![-u[0]]))
            .pre_processor(|mut t: Triple| {
                for row in &mut t.y {
                    row[0] *= 2.0;
                }
                t
            })
            .post_processor(|mut t: Triple| {
                for row in &mut t.y {
                    row[0] /= 2.0;
                }
                t
            })
            .build()
            .unwrap();

        let (yout, info) = sys
            .predefined(&[1.0], &[0.0, 1.0], &[], &IntegrateOptions::default())
            .unwrap();
        assert_eq!(yout[0], vec![1.0]);
        assert_eq!(info.internal_yout[0], vec![2.0]);
        assert!((yout[1][0] - (-1.0_f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_roots_require_nroots() {
        let mut sys = OdeSys::builder(UserFn::binary(|_x, _y: &[f64]| vec![-1.0]))
            .roots(UserFn::binary(|_x, y: &[f64]| vec![y[0]]))
            .build()
            .unwrap();
        assert!(matches!(
            sys.integrate(2.0, &[1.0], &[], &IntegrateOptions::default()),
            Err(IntegrateError::Configuration { .. })
        ));
    }

    #[test]
    fn test_return_on_root() {
        // y = 1 - x reaches zero at x = 1
        let mut sys = OdeSys::builder(UserFn::binary(|_x, _y: &[f64]| vec![-1.0]))
            .roots(UserFn::binary(|_x, y: &[f64]| vec![y[0]]))
            .nroots(1)
            .build()
            .unwrap();
        let opts = IntegrateOptions::default().return_on_root(true);
        let (xout, _, info) = sys.integrate(3.0, &[1.0], &[], &opts).unwrap();

        assert_eq!(info.roots.len(), 1);
        assert!((info.roots[0].x - 1.0).abs() < 1e-9);
        assert!((xout.last().unwrap() - 1.0).abs() < 1e-9);

        assert!(matches!(
            sys.predefined(&[1.0], &[0.0, 3.0], &[], &opts),
            Err(IntegrateError::Unsupported { .. })
        ));
    }

    /// Adapter that always fails after the first point.
    struct Failing;

    impl Backend for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn methods(&self) -> &[&'static str] {
            &["none"]
        }

        fn default_method(&self) -> &'static str {
            "none"
        }

        fn requires_jac(&self) -> &[&'static str] {
            &[]
        }

        fn integrate_adaptive(
            &self,
            problem: &Problem<'_>,
            x0: f64,
            _xend: f64,
            _options: &BackendOptions,
        ) -> IntegrateResult<AdaptiveOutput> {
            (problem.rhs)(x0, problem.y0);
            Ok(AdaptiveOutput {
                xout: vec![x0],
                yout: vec![problem.y0.to_vec()],
                info: BackendInfo {
                    success: false,
                    message: Some("gave up".to_string()),
                    method: "none".to_string(),
                    ..Default::default()
                },
            })
        }

        fn integrate_predefined(
            &self,
            _problem: &Problem<'_>,
            _xout: &[f64],
            _options: &BackendOptions,
        ) -> IntegrateResult<PredefinedOutput> {
            Err(IntegrateError::unsupported(self.name(), "predefined mode"))
        }
    }

    /// Adapter whose predefined mode returns `rows` copies of the initial state.
    struct FixedRows {
        rows: usize,
        success: bool,
    }

    impl Backend for FixedRows {
        fn name(&self) -> &str {
            "fixed-rows"
        }

        fn methods(&self) -> &[&'static str] {
            &["none"]
        }

        fn default_method(&self) -> &'static str {
            "none"
        }

        fn requires_jac(&self) -> &[&'static str] {
            &[]
        }

        fn integrate_adaptive(
            &self,
            _problem: &Problem<'_>,
            _x0: f64,
            _xend: f64,
            _options: &BackendOptions,
        ) -> IntegrateResult<AdaptiveOutput> {
            Err(IntegrateError::unsupported(self.name(), "adaptive mode"))
        }

        fn integrate_predefined(
            &self,
            problem: &Problem<'_>,
            _xout: &[f64],
            _options: &BackendOptions,
        ) -> IntegrateResult<PredefinedOutput> {
            Ok(PredefinedOutput {
                yout: vec![problem.y0.to_vec(); self.rows],
                info: BackendInfo {
                    success: self.success,
                    message: (!self.success).then(|| "stopped early".to_string()),
                    method: "none".to_string(),
                    ..Default::default()
                },
            })
        }
    }

    #[test]
    fn test_adapter_row_count_checked() {
        let mut sys = riccati();
        let grid = [0.0, 0.5, 1.0];
        let run = |sys: &mut OdeSys, rows: usize, success: bool| {
            let adapter: Arc<dyn Backend> = Arc::new(FixedRows { rows, success });
            let opts = IntegrateOptions::default().integrator(adapter);
            sys.predefined(&[1.0], &grid, &[2.0, 1.0], &opts)
        };

        for (rows, success) in [(4, true), (2, true), (4, false)] {
            assert!(
                matches!(
                    run(&mut sys, rows, success),
                    Err(IntegrateError::InvalidInput { .. })
                ),
                "rows = {}, success = {}",
                rows,
                success
            );
        }

        match run(&mut sys, 2, false) {
            Err(IntegrateError::IntegrationFailure { xout, yout, .. }) => {
                assert_eq!(xout, vec![0.0, 0.5]);
                assert_eq!(yout.len(), 2);
            }
            other => panic!("expected IntegrationFailure, got {:?}", other),
        }

        let (yout, info) = run(&mut sys, 3, true).unwrap();
        assert_eq!(yout.len(), 3);
        assert_eq!(info.internal_xout, grid.to_vec());
    }

    #[test]
    fn test_dfdx_follows_jacobian() {
        use std::cell::Cell;
        use std::rc::Rc;

        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut sys = OdeSys::builder(UserFn::ternary(|_x, y: &[f64], p: &[f64]| {
            vec![-p[0] * y[0]]
        }))
        .jacobian(UserFn::ternary(|_x, _y: &[f64], p: &[f64]| {
            vec![vec![-p[0]]]
        }))
        .dfdx(UserFn::binary(move |_x, y: &[f64]| {
            counter.set(counter.get() + 1);
            vec![0.0; y.len()]
        }))
        .build()
        .unwrap();

        let opts = IntegrateOptions::default().integrator("rosenbrock");
        sys.integrate(1.0, &[1.0], &[1.0], &opts.clone().with_jacobian(false))
            .unwrap();
        assert_eq!(calls.get(), 0);

        sys.integrate(1.0, &[1.0], &[1.0], &opts.with_jacobian(true))
            .unwrap();
        assert!(calls.get() > 0);
    }

    #[test]
    fn test_custom_adapter() {
        let mut sys = riccati();
        let adapter: Arc<dyn Backend> = Arc::new(Failing);
        let opts = IntegrateOptions::default().integrator(adapter);

        match sys.integrate(1.0, &[1.0], &[2.0, 1.0], &opts) {
            Err(IntegrateError::IntegrationFailure {
                message, xout, nfev, ..
            }) => {
                assert_eq!(message, "gave up");
                assert_eq!(xout, vec![0.0]);
                assert_eq!(nfev, 1);
            }
            other => panic!("expected IntegrationFailure, got {:?}", other),
        }

        assert!(matches!(
            sys.predefined(&[1.0], &[0.0, 1.0], &[2.0, 1.0], &opts),
            Err(IntegrateError::Unsupported { .. })
        ));
    }
}
