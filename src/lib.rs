//! odesys - one interface over ODE integration backends
//!
//! An [`OdeSys`] holds the definition of a system `dy/dx = f(x, y, p)`
//! (right-hand side, optional Jacobian, `df/dx` and root function, optional
//! banded shape, pre/post processors) and integrates it with any backend
//! implementing [`Backend`]. Backends are chosen per call by name or passed
//! in directly as an adapter.
//!
//! # Architecture
//!
//! ```text
//! caller (x, y0, p)
//!      │ pre-processors
//!      ▼
//! ┌──────────────────────────────────────────────────────┐
//! │ OdeSys::integrate                                    │
//! │   resolve backend, mode, Jacobian usage              │
//! │   bind params, count calls                           │
//! └──────────────┬───────────────────────────────────────┘
//!                │ Backend::integrate_adaptive / _predefined
//! ┌──────────────▼───────────┐  ┌────────────────────────┐
//! │ rk: rk23, rk45, dop853   │  │ rosenbrock: ode23s     │
//! └──────────────────────────┘  └────────────────────────┘
//!      │ post-processors
//!      ▼
//! caller (x, y, info)
//! ```
//!
//! # Modes
//!
//! - **adaptive**: a start/end pair; the backend picks the output points
//! - **predefined**: an explicit grid; one output row per grid point
//!
//! A two-point `x` is adaptive unless `force_predefined` is set.
//!
//! # Example
//!
//! ```ignore
//! use odesys::{IntegrateOptions, OdeSys, UserFn};
//!
//! let mut sys = OdeSys::builder(UserFn::ternary(|_x, y: &[f64], p: &[f64]| {
//!     vec![-p[0] * y[0]]
//! }))
//! .jacobian(UserFn::ternary(|_x, _y: &[f64], p: &[f64]| vec![vec![-p[0]]]))
//! .build()?;
//!
//! let opts = IntegrateOptions::default().integrator("rosenbrock");
//! let (x, y, info) = sys.integrate(10.0, &[1.0], &[0.5], &opts)?;
//! println!("{} steps, nfev = {}, njev = {:?}", info.nsteps, info.nfev, info.njev);
//! ```

pub mod backend;
pub mod callback;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod system;

pub use backend::{Backend, Band, BackendOptions, Integrator, RootEvent};
pub use callback::{Callback, Matrix, UserFn};
pub use config::{IntegrateOptions, IntegratorChoice, integrator_from_env};
pub use error::{IntegrateError, IntegrateResult};
pub use pipeline::{Pipeline, Triple, XSpec};
pub use system::{IntegrationInfo, OdeSys, OdeSysBuilder};
