//! Iterative function fitting.
//!
//! Responsibilities:
//!
//! - fit a `FittableFunction` to the active points
//! - let a `ContinuumFinder` re-classify points against the fitted model
//! - stop on convergence, the minimum point count, or the iteration limit

pub mod fitter;

pub use fitter::*;
