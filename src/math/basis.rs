//! Polynomial basis functions used by the continuum models.
//!
//! Every basis is evaluated through its three-term recurrence so a full design
//! row costs `O(degree)`:
//!
//! - power:     `x^0, x^1, x^2, ...`
//! - Legendre:  `(n+1) P_{n+1} = (2n+1) x P_n - n P_{n-1}`
//! - Chebyshev: `T_{n+1} = 2 x T_n - T_{n-1}`
//!
//! Legendre and Chebyshev polynomials are only well conditioned on `[-1, 1]`;
//! callers map wavelengths onto that interval first (see `models::Polynomial`).

use crate::domain::Basis;

/// Fill `out` with the basis functions of degree `0..out.len()` at `x`.
pub fn fill_basis_row(basis: Basis, x: f64, out: &mut [f64]) {
    if out.is_empty() {
        return;
    }
    out[0] = 1.0;
    if out.len() == 1 {
        return;
    }

    match basis {
        Basis::Power => {
            for n in 1..out.len() {
                out[n] = out[n - 1] * x;
            }
        }
        Basis::Legendre => {
            out[1] = x;
            for n in 1..out.len() - 1 {
                let nf = n as f64;
                out[n + 1] = ((2.0 * nf + 1.0) * x * out[n] - nf * out[n - 1]) / (nf + 1.0);
            }
        }
        Basis::Chebyshev => {
            out[1] = x;
            for n in 1..out.len() - 1 {
                out[n + 1] = 2.0 * x * out[n] - out[n - 1];
            }
        }
    }
}

/// Evaluate `Σ c_n B_n(x)` for the given basis.
pub fn eval_series(basis: Basis, x: f64, coeffs: &[f64], scratch: &mut [f64]) -> f64 {
    let row = &mut scratch[..coeffs.len()];
    fill_basis_row(basis, x, row);
    row.iter().zip(coeffs.iter()).map(|(b, c)| b * c).sum()
}
