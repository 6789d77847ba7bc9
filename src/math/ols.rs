//! Weighted least squares solver.
//!
//! Every continuum function we fit is linear in its coefficients, so one fit
//! round is a single problem of the form
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T c)^2
//! ```
//!
//! Rows are scaled by `sqrt(w_i)` and the resulting ordinary least squares
//! problem is solved with an SVD. The design matrix is tall (many wavelength
//! samples, a handful of coefficients), which rules out nalgebra's `QR::solve`.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() < x.ncols() || x.nrows() != y.len() {
        return None;
    }

    let svd = x.clone().svd(true, true);

    // High-degree continua over a wide wavelength range are close to
    // collinear, so accept progressively looser singular value cutoffs.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(coeffs) = svd.solve(y, tol) {
            if coeffs.iter().all(|v| v.is_finite()) {
                return Some(coeffs);
            }
        }
    }

    None
}

/// Build the `sqrt(w)`-scaled system from a row generator and solve it.
///
/// `fill_row(i, row)` must write the `ncols` design values of observation `i`.
/// Missing weights mean uniform weighting.
pub fn weighted_least_squares<F>(
    y: &[f64],
    w: Option<&[f64]>,
    ncols: usize,
    mut fill_row: F,
) -> Option<Vec<f64>>
where
    F: FnMut(usize, &mut [f64]),
{
    let n = y.len();
    if ncols == 0 || n < ncols {
        return None;
    }
    if let Some(w) = w {
        if w.len() != n {
            return None;
        }
    }

    // Inverse-variance weights in physical flux units can be tiny; rescaling by
    // the largest weight keeps the SVD cutoff meaningful without changing the
    // solution.
    let w_max = w
        .map(|w| w.iter().copied().filter(|v| v.is_finite()).fold(0.0_f64, f64::max))
        .unwrap_or(1.0);
    if !(w_max > 0.0) {
        return None;
    }

    let mut xw = DMatrix::<f64>::zeros(n, ncols);
    let mut yw = DVector::<f64>::zeros(n);
    let mut row = vec![0.0; ncols];

    for i in 0..n {
        fill_row(i, &mut row);
        let sw = w.map_or(1.0, |w| (w[i] / w_max).max(0.0).sqrt());
        for j in 0..ncols {
            xw[(i, j)] = row[j] * sw;
        }
        yw[i] = y[i] * sw;
    }

    solve_least_squares(&xw, &yw).map(|c| c.iter().copied().collect())
}
