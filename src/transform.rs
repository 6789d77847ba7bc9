//! Flux transforms applied before fitting and undone after evaluation.
//!
//! Continua are often easier to fit in log space (multiplicative features turn
//! additive, the dynamic range shrinks). The log/exp pair is guarded so that
//! values outside the valid domain turn into `NaN` instead of failing:
//!
//! - forward: `log(f)` only where `f > 1e-7`, error `σ / f`
//! - reverse: `exp(g)` only where `g < 100`, error `exp(g) · σ'`
//!
//! `NaN` means "unknown at this pixel"; neighbouring pixels stay valid.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Smallest flux that still has a logarithm.
pub const LOG_FLUX_EPS: f64 = 1e-7;

/// Largest log-flux that is exponentiated.
pub const EXP_OVERFLOW: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FluxTransform {
    /// Fit the flux as is.
    #[default]
    Identity,
    /// Fit the natural logarithm of the flux.
    Log,
}

impl FluxTransform {
    /// Map linear flux (and optional uncertainty) into fitting space.
    pub fn forward(&self, flux: &[f64], flux_err: Option<&[f64]>) -> (Vec<f64>, Option<Vec<f64>>) {
        match self {
            FluxTransform::Identity => (flux.to_vec(), flux_err.map(<[f64]>::to_vec)),
            FluxTransform::Log => {
                let err = flux_err.map(|err| {
                    flux.iter()
                        .zip(err.iter())
                        .map(|(&f, &s)| safe_log_error(f, s))
                        .collect()
                });
                (flux.iter().copied().map(safe_log).collect(), err)
            }
        }
    }

    /// Map fitting-space values (and optional uncertainty) back to linear flux.
    pub fn reverse(&self, flux: &[f64], flux_err: Option<&[f64]>) -> (Vec<f64>, Option<Vec<f64>>) {
        match self {
            FluxTransform::Identity => (flux.to_vec(), flux_err.map(<[f64]>::to_vec)),
            FluxTransform::Log => {
                let err = flux_err.map(|err| {
                    flux.iter()
                        .zip(err.iter())
                        .map(|(&g, &s)| safe_exp_error(g, s))
                        .collect()
                });
                (flux.iter().copied().map(safe_exp).collect(), err)
            }
        }
    }
}

pub fn safe_log(x: f64) -> f64 {
    if x > LOG_FLUX_EPS { x.ln() } else { f64::NAN }
}

pub fn safe_log_error(x: f64, sigma: f64) -> f64 {
    if x > LOG_FLUX_EPS { sigma / x } else { f64::NAN }
}

pub fn safe_exp(x: f64) -> f64 {
    if x < EXP_OVERFLOW { x.exp() } else { f64::NAN }
}

/// Propagate a log-space uncertainty `sigma` at log-flux `x` back to linear flux.
pub fn safe_exp_error(x: f64, sigma: f64) -> f64 {
    if x < EXP_OVERFLOW { x.exp() * sigma } else { f64::NAN }
}
