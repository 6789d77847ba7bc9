//! Fittable functions.
//!
//! The iterative fitter only sees the `FittableFunction` contract, so any
//! function shape that can be fitted to weighted points plugs in here.

pub mod function;
pub mod polynomial;

pub use function::*;
pub use polynomial::*;
