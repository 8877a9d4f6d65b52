//! Bogacki-Shampine 2(3) pair.
//!
//! Lower order and cheaper per step than `rk45`, but typically needs more
//! steps for the same accuracy.

use super::{ErrorEstimate, Tableau};

pub(crate) static TABLEAU: Tableau = Tableau {
    name: "rk23",
    error_order: 2,
    c: &[0.0, 0.5, 0.75],
    a: &[&[], &[0.5], &[0.0, 0.75]],
    b: &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0],
    // 3rd - 2nd order, the last weight applies to the FSAL stage
    error: ErrorEstimate::Embedded(&[-5.0 / 72.0, 1.0 / 12.0, 1.0 / 9.0, -1.0 / 8.0]),
};
