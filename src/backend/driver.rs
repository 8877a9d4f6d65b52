//! Adaptive and predefined stepping loops.
//!
//! The built-in backends only differ in how they take a single step; the
//! loops that clip steps to output points, control the step size, detect
//! roots and assemble the trajectory live here.

use crate::backend::roots::{RootTracker, brent};
use crate::backend::step_control::{StepSizeController, default_min_step};
use crate::backend::{
    AdaptiveOutput, BackendInfo, BackendOptions, PredefinedOutput, Problem, RootEvent,
    validate_grid, validate_problem,
};
use crate::callback::Matrix;
use crate::error::{IntegrateError, IntegrateResult};

const ROOT_MAX_ITER: usize = 100;

/// A single trial step from the current base point.
pub(crate) struct Attempt {
    /// Proposed state at `x + h`.
    pub y_new: Vec<f64>,
    /// `f(x + h, y_new)`, reused as the first stage of the next step.
    pub f_new: Vec<f64>,
    /// Normalized error estimate (accept when `<= 1`).
    pub err: f64,
}

/// One-step method driven by [`run_adaptive`] / [`run_predefined`].
pub(crate) trait Stepper {
    /// Method name used in messages.
    fn label(&self) -> &'static str;

    /// Order of the embedded error estimator.
    fn error_order(&self) -> usize;

    /// Make `(x, y)` the base point of the next step.
    fn reset(&mut self, x: f64, y: &[f64]) -> IntegrateResult<()>;

    /// Try a step of size `h` from the base point `(x, y)`.
    ///
    /// May be called repeatedly with different `h` for the same base point.
    fn attempt(&mut self, x: f64, y: &[f64], h: f64) -> IntegrateResult<Attempt>;

    /// Move the base point to the end of an accepted step.
    fn advance(&mut self, x_new: f64, y_new: &[f64], f_new: Vec<f64>) -> IntegrateResult<()>;
}

enum StepOutcome {
    Accepted(Option<RootEvent>),
    Failed(String),
}

struct Driver<'p, 'a, S> {
    stepper: S,
    options: &'p BackendOptions,
    controller: StepSizeController,
    roots: Option<RootTracker<'a>>,
    max_step: f64,
    x: f64,
    y: Vec<f64>,
    h: f64,
    naccept: usize,
    nreject: usize,
}

impl<'p, 'a, S: Stepper> Driver<'p, 'a, S> {
    fn new(
        mut stepper: S,
        problem: &'p Problem<'a>,
        options: &'p BackendOptions,
        x0: f64,
    ) -> IntegrateResult<Self> {
        if !(options.first_step.is_finite() && options.first_step > 0.0) {
            return Err(IntegrateError::InvalidInput {
                context: format!("first_step must be positive, got {}", options.first_step),
            });
        }

        for (name, bound) in [("max_step", options.max_step), ("min_step", options.min_step)] {
            if let Some(v) = bound {
                if !(v.is_finite() && v > 0.0) {
                    return Err(IntegrateError::InvalidInput {
                        context: format!("{} must be positive and finite, got {}", name, v),
                    });
                }
            }
        }
        if let (Some(min), Some(max)) = (options.min_step, options.max_step) {
            if min > max {
                return Err(IntegrateError::InvalidInput {
                    context: format!("min_step {} exceeds max_step {}", min, max),
                });
            }
        }

        stepper.reset(x0, problem.y0)?;
        let roots = match problem.roots {
            Some(root_fn) => Some(RootTracker::new(root_fn, x0, problem.y0)?),
            None => None,
        };
        let max_step = options.max_step.unwrap_or(f64::INFINITY);

        Ok(Self {
            stepper,
            options,
            controller: StepSizeController::default(),
            roots,
            max_step,
            x: x0,
            y: problem.y0.to_vec(),
            h: options.first_step.min(max_step),
            naccept: 0,
            nreject: 0,
        })
    }

    /// Never above `max_step`.
    fn min_step(&self) -> f64 {
        self.options
            .min_step
            .unwrap_or_else(|| default_min_step(self.x).min(self.max_step))
    }

    fn info(&self, success: bool, message: Option<String>, roots: Vec<RootEvent>) -> BackendInfo {
        BackendInfo {
            success,
            message,
            method: self.stepper.label().to_string(),
            naccept: self.naccept,
            nreject: self.nreject,
            roots,
        }
    }

    /// Take one accepted step towards `target`, never past it.
    fn step_towards(&mut self, target: f64) -> IntegrateResult<StepOutcome> {
        loop {
            if self.naccept + self.nreject >= self.options.max_steps {
                let err = IntegrateError::MaxStepsExceeded {
                    steps: self.options.max_steps,
                    t: self.x,
                    context: self.stepper.label().to_string(),
                };
                return Ok(StepOutcome::Failed(err.to_string()));
            }

            let remaining = target - self.x;
            let clipped = self.h >= remaining;
            let h = if clipped { remaining } else { self.h };

            let attempt = match self.stepper.attempt(self.x, &self.y, h) {
                Ok(attempt) => attempt,
                Err(IntegrateError::NumrError(msg)) => {
                    return Ok(StepOutcome::Failed(format!(
                        "{}: linear solve failed at t = {:.6}: {}",
                        self.stepper.label(),
                        self.x,
                        msg
                    )));
                }
                Err(e) => return Err(e),
            };

            let (h_new, accept) =
                self.controller
                    .compute_step(h, attempt.err, self.stepper.error_order());

            if !accept {
                self.nreject += 1;
                let min_step = self.min_step();
                if h_new < min_step {
                    let err = IntegrateError::StepSizeTooSmall {
                        step: h_new,
                        t: self.x,
                        context: self.stepper.label().to_string(),
                    };
                    return Ok(StepOutcome::Failed(err.to_string()));
                }
                self.h = h_new.min(self.max_step);
                continue;
            }

            self.naccept += 1;
            let x_new = if clipped { target } else { self.x + h };

            let root = match self.locate_root(h, x_new, &attempt) {
                Ok(root) => root,
                Err(IntegrateError::NumrError(msg)) => return Ok(StepOutcome::Failed(msg)),
                Err(e) => return Err(e),
            };
            if let Some((event, at_root)) = root {
                self.stepper.advance(event.x, &at_root.y_new, at_root.f_new)?;
                self.x = event.x;
                self.y = at_root.y_new;
                log::trace!("root {} located at x = {}", event.index, event.x);
                return Ok(StepOutcome::Accepted(Some(event)));
            }

            self.stepper.advance(x_new, &attempt.y_new, attempt.f_new)?;
            self.x = x_new;
            self.y = attempt.y_new;

            let proposal = if clipped { h_new.max(self.h) } else { h_new };
            self.h = proposal.clamp(self.min_step(), self.max_step);
            return Ok(StepOutcome::Accepted(None));
        }
    }

    /// Find the earliest root inside the accepted step `[x, x + h]`.
    ///
    /// Returns the root and the re-taken step that ends on it.
    fn locate_root(
        &mut self,
        h: f64,
        x_new: f64,
        attempt: &Attempt,
    ) -> IntegrateResult<Option<(RootEvent, Attempt)>> {
        let Some(tracker) = self.roots.as_mut() else {
            return Ok(None);
        };

        let g_new = tracker.evaluate(x_new, &attempt.y_new)?;
        let crossings = tracker.crossings(&g_new);
        if crossings.is_empty() {
            tracker.update(g_new);
            return Ok(None);
        }

        let x = self.x;
        let y = &self.y;
        let stepper = &mut self.stepper;
        let tol = 1e-12 * (x.abs() + h);

        let mut earliest: Option<(usize, f64)> = None;
        for &index in &crossings {
            let phi = |s: f64| -> IntegrateResult<f64> {
                let trial = stepper.attempt(x, y, s)?;
                Ok(tracker.evaluate(x + s, &trial.y_new)?[index])
            };
            let s = brent(
                phi,
                0.0,
                h,
                tracker.previous(index),
                g_new[index],
                tol,
                ROOT_MAX_ITER,
            )?;
            if earliest.is_none_or(|(_, best)| s < best) {
                earliest = Some((index, s));
            }
        }

        let Some((index, s)) = earliest else {
            return Ok(None);
        };
        let at_root = if s >= h {
            Attempt {
                y_new: attempt.y_new.clone(),
                f_new: attempt.f_new.clone(),
                err: attempt.err,
            }
        } else {
            stepper.attempt(x, y, s)?
        };
        let x_root = if s >= h { x_new } else { x + s };
        let g_root = tracker.evaluate(x_root, &at_root.y_new)?;
        tracker.mark_root(g_root, index);

        let event = RootEvent {
            x: x_root,
            y: at_root.y_new.clone(),
            index,
            sample: None,
        };
        Ok(Some((event, at_root)))
    }
}

/// Integrate from `x0` to `xend`, recording every accepted step.
pub(crate) fn run_adaptive<S: Stepper>(
    stepper: S,
    problem: &Problem<'_>,
    x0: f64,
    xend: f64,
    options: &BackendOptions,
) -> IntegrateResult<AdaptiveOutput> {
    validate_problem(problem, stepper.label())?;
    if !(x0 < xend) {
        return Err(IntegrateError::InvalidInterval {
            a: x0,
            b: xend,
            context: stepper.label().to_string(),
        });
    }

    let mut driver = Driver::new(stepper, problem, options, x0)?;
    let mut xout = vec![x0];
    let mut yout: Matrix = vec![problem.y0.to_vec()];
    let mut roots = Vec::new();

    while driver.x < xend {
        match driver.step_towards(xend)? {
            StepOutcome::Accepted(root) => {
                xout.push(driver.x);
                yout.push(driver.y.clone());
                if let Some(mut event) = root {
                    event.sample = Some(xout.len() - 1);
                    roots.push(event);
                    if options.return_on_root {
                        break;
                    }
                }
            }
            StepOutcome::Failed(message) => {
                let info = driver.info(false, Some(message), roots);
                return Ok(AdaptiveOutput { xout, yout, info });
            }
        }
    }

    let info = driver.info(true, None, roots);
    Ok(AdaptiveOutput { xout, yout, info })
}

/// Integrate reporting the state exactly at each point of `xout`.
pub(crate) fn run_predefined<S: Stepper>(
    stepper: S,
    problem: &Problem<'_>,
    xout: &[f64],
    options: &BackendOptions,
) -> IntegrateResult<PredefinedOutput> {
    validate_problem(problem, stepper.label())?;
    validate_grid(xout, stepper.label())?;
    if options.return_on_root {
        return Err(IntegrateError::unsupported(
            stepper.label(),
            "return_on_root in predefined mode",
        ));
    }

    let mut driver = Driver::new(stepper, problem, options, xout[0])?;
    let mut yout: Matrix = Vec::with_capacity(xout.len());
    yout.push(problem.y0.to_vec());
    let mut roots = Vec::new();

    for &target in &xout[1..] {
        while driver.x < target {
            match driver.step_towards(target)? {
                StepOutcome::Accepted(Some(event)) => roots.push(event),
                StepOutcome::Accepted(None) => {}
                StepOutcome::Failed(message) => {
                    let info = driver.info(false, Some(message), roots);
                    return Ok(PredefinedOutput { yout, info });
                }
            }
        }
        yout.push(driver.y.clone());
    }

    let info = driver.info(true, None, roots);
    Ok(PredefinedOutput { yout, info })
}
