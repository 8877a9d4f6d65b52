//! Callback adapter.
//!
//! User callbacks come in three shapes: `f(y)`, `f(x, y)` and `f(x, y, p)`.
//! [`normalize`] lifts any accepted shape to the three-argument form, and the
//! dispatcher then binds the parameter vector ([`bind_parameters`]) and
//! counts invocations ([`instrument`]) before handing a plain
//! `Fn(f64, &[f64]) -> T` to a backend.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use crate::error::{IntegrateError, IntegrateResult};

/// Dense row-major matrix: `m[i]` is row `i`.
///
/// Used for trajectories (rows = samples) and Jacobians (rows = equations).
pub type Matrix = Vec<Vec<f64>>;

/// A user-supplied callback in one of the accepted call shapes.
pub enum UserFn<T> {
    /// `f(y)`
    State(Arc<dyn Fn(&[f64]) -> T>),
    /// `f(x, y)`
    Binary(Arc<dyn Fn(f64, &[f64]) -> T>),
    /// `f(x, y, p)`
    Ternary(Arc<dyn Fn(f64, &[f64], &[f64]) -> T>),
}

impl<T> UserFn<T> {
    /// Wrap a callback of the form `f(y)`.
    pub fn state<F>(f: F) -> Self
    where
        F: Fn(&[f64]) -> T + 'static,
    {
        Self::State(Arc::new(f))
    }

    /// Wrap a callback of the form `f(x, y)`.
    pub fn binary<F>(f: F) -> Self
    where
        F: Fn(f64, &[f64]) -> T + 'static,
    {
        Self::Binary(Arc::new(f))
    }

    /// Wrap a callback of the form `f(x, y, p)`.
    pub fn ternary<F>(f: F) -> Self
    where
        F: Fn(f64, &[f64], &[f64]) -> T + 'static,
    {
        Self::Ternary(Arc::new(f))
    }

    /// Number of positional arguments the callback accepts.
    pub fn arity(&self) -> usize {
        match self {
            Self::State(_) => 1,
            Self::Binary(_) => 2,
            Self::Ternary(_) => 3,
        }
    }
}

impl<T> Clone for UserFn<T> {
    fn clone(&self) -> Self {
        match self {
            Self::State(f) => Self::State(Arc::clone(f)),
            Self::Binary(f) => Self::Binary(Arc::clone(f)),
            Self::Ternary(f) => Self::Ternary(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for UserFn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserFn(arity = {})", self.arity())
    }
}

/// A callback normalized to the `f(x, y, p)` calling convention.
pub struct Callback<T> {
    inner: Arc<dyn Fn(f64, &[f64], &[f64]) -> T>,
    arity: usize,
}

impl<T> Callback<T> {
    /// Invoke the callback.
    pub fn call(&self, x: f64, y: &[f64], params: &[f64]) -> T {
        (self.inner)(x, y, params)
    }

    /// Arity of the wrapped user callback.
    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            arity: self.arity,
        }
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback(arity = {})", self.arity)
    }
}

/// Lift `callback` to the three-argument form.
///
/// Arguments the user callback does not take are dropped when forwarding.
/// Fails with [`IntegrateError::Arity`] when the callback takes fewer than
/// `min_arity` arguments.
pub fn normalize<T: 'static>(
    callback: UserFn<T>,
    min_arity: usize,
) -> IntegrateResult<Callback<T>> {
    let arity = callback.arity();
    if arity < min_arity || min_arity > 3 {
        return Err(IntegrateError::Arity {
            expected: min_arity,
            found: arity,
            context: "normalize".to_string(),
        });
    }

    let inner: Arc<dyn Fn(f64, &[f64], &[f64]) -> T> = match callback {
        UserFn::State(f) => Arc::new(move |_x: f64, y: &[f64], _p: &[f64]| f(y)),
        UserFn::Binary(f) => Arc::new(move |x: f64, y: &[f64], _p: &[f64]| f(x, y)),
        UserFn::Ternary(f) => f,
    };

    Ok(Callback { inner, arity })
}

/// Bind the parameter vector, yielding the `f(x, y)` form backends consume.
///
/// With empty `params` the callback is invoked with an empty slice and the
/// bound vector is not captured.
pub fn bind_parameters<'a, T: 'static>(
    callback: &'a Callback<T>,
    params: &'a [f64],
) -> Box<dyn Fn(f64, &[f64]) -> T + 'a> {
    if params.is_empty() {
        Box::new(move |x: f64, y: &[f64]| callback.call(x, y, &[]))
    } else {
        Box::new(move |x: f64, y: &[f64]| callback.call(x, y, params))
    }
}

/// A callback that counts its invocations.
///
/// The counter starts at zero when the wrapper is created and belongs to the
/// wrapper alone; a fresh wrapper is built for every integration call.
pub struct Instrumented<F> {
    f: F,
    calls: Cell<usize>,
}

/// Wrap `f` with a call counter.
pub fn instrument<F>(f: F) -> Instrumented<F> {
    Instrumented {
        f,
        calls: Cell::new(0),
    }
}

impl<F> Instrumented<F> {
    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl<F, T> Instrumented<F>
where
    F: Fn(f64, &[f64]) -> T,
{
    /// Invoke the wrapped callback, incrementing the counter.
    pub fn call(&self, x: f64, y: &[f64]) -> T {
        self.calls.set(self.calls.get() + 1);
        (self.f)(x, y)
    }
}
