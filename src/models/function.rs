//! The contract between the iterative fitter and a concrete function shape.

/// A parametric function `y = f(x; p)` that can be fitted to weighted points.
pub trait FittableFunction: Send + Sync {
    /// Number of parameters in `p`.
    fn param_count(&self) -> usize;

    /// Fewest points for which `fit` is well determined.
    fn min_point_count(&self) -> usize {
        self.param_count()
    }

    /// Fit the function to `(x, y)` with optional least-squares weights.
    ///
    /// `p0` is the previous estimate; linear shapes may ignore it. Returns
    /// `None` when the problem cannot be solved (too few points, singular
    /// design, non-finite result).
    fn fit(&self, x: &[f64], y: &[f64], w: Option<&[f64]>, p0: Option<&[f64]>) -> Option<Vec<f64>>;

    /// Evaluate the function at every `x`.
    fn eval(&self, x: &[f64], params: &[f64]) -> Vec<f64>;
}
