//! Robust sigma clipping around the current model.

use crate::finders::{ContinuumFinder, usable};
use crate::math::mad_scale;

/// Keep points whose residual lies within `[-sigma_low·s, +sigma_high·s]`.
///
/// The scale `s` is the median absolute residual of the currently active
/// points (scaled to a Gaussian sigma), so a handful of deep lines or cosmic
/// rays don't inflate it.
/// A larger `sigma_high` than `sigma_low` suits absorption spectra.
#[derive(Debug, Clone)]
pub struct SigmaClipping {
    pub sigma_low: f64,
    pub sigma_high: f64,
}

impl SigmaClipping {
    pub fn new(sigma_low: f64, sigma_high: f64) -> Self {
        Self {
            sigma_low: sigma_low.abs(),
            sigma_high: sigma_high.abs(),
        }
    }
}

impl ContinuumFinder for SigmaClipping {
    fn name(&self) -> &'static str {
        "sigma-clip"
    }

    fn find(
        &mut self,
        _iter: usize,
        _x: &[f64],
        y: &[f64],
        w: Option<&[f64]>,
        mask: &[bool],
        model: &[f64],
    ) -> (Vec<bool>, bool) {
        let residual: Vec<f64> = y.iter().zip(model.iter()).map(|(a, b)| a - b).collect();
        let active: Vec<f64> = residual
            .iter()
            .zip(mask.iter())
            .filter(|(_, m)| **m)
            .map(|(r, _)| *r)
            .collect();

        let Some(sigma) = mad_scale(&active) else {
            return (mask.to_vec(), false);
        };
        let lo = -self.sigma_low * sigma;
        let hi = self.sigma_high * sigma;

        let new_mask: Vec<bool> = (0..y.len())
            .map(|i| {
                mask[i]
                    && usable(y[i], model[i], w.map(|w| w[i]))
                    && residual[i] >= lo
                    && residual[i] <= hi
            })
            .collect();

        let changed = new_mask != mask;
        (new_mask, changed)
    }
}
