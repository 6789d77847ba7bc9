//! Mathematical utilities: basis functions, weighted least squares and order statistics.

pub mod basis;
pub mod ols;
pub mod stats;

pub use basis::*;
pub use ols::*;
pub use stats::*;
