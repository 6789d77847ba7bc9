//! Polynomial continuum functions.
//!
//! Coefficients are fitted by weighted linear least squares in a chosen basis.
//! When a `domain` is set, `x` is first mapped linearly onto `[-1, 1]`; this is
//! what keeps wavelength polynomials of moderate degree well conditioned.

use crate::domain::Basis;
use crate::math::{eval_series, fill_basis_row, weighted_least_squares};
use crate::models::FittableFunction;

#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    pub degree: usize,
    pub basis: Basis,
    /// `x` interval mapped onto `[-1, 1]`; `None` uses raw `x`.
    pub domain: Option<(f64, f64)>,
}

impl Polynomial {
    pub fn new(degree: usize, basis: Basis) -> Self {
        Self {
            degree,
            basis,
            domain: None,
        }
    }

    pub fn with_domain(mut self, lo: f64, hi: f64) -> Self {
        self.domain = if hi > lo { Some((lo, hi)) } else { None };
        self
    }

    #[inline]
    fn scale(&self, x: f64) -> f64 {
        match self.domain {
            Some((lo, hi)) => 2.0 * (x - lo) / (hi - lo) - 1.0,
            None => x,
        }
    }
}

impl FittableFunction for Polynomial {
    fn param_count(&self) -> usize {
        self.degree + 1
    }

    fn fit(&self, x: &[f64], y: &[f64], w: Option<&[f64]>, _p0: Option<&[f64]>) -> Option<Vec<f64>> {
        if x.len() != y.len() || x.len() < self.min_point_count() {
            return None;
        }
        weighted_least_squares(y, w, self.param_count(), |i, row| {
            fill_basis_row(self.basis, self.scale(x[i]), row)
        })
    }

    fn eval(&self, x: &[f64], params: &[f64]) -> Vec<f64> {
        let mut scratch = vec![0.0; params.len()];
        x.iter()
            .map(|&xi| eval_series(self.basis, self.scale(xi), params, &mut scratch))
            .collect()
    }
}
