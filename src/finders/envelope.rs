//! Upper-envelope continuum finder for absorption-dominated spectra.

use crate::finders::{ContinuumFinder, usable};
use crate::math::quantile;

/// Keep points whose residual is at or above the `quantile` of the active
/// residuals.
///
/// Absorption lines only ever pull the flux below the continuum, so the upper
/// part of the residual distribution traces it. Each round tightens the
/// selection; the fitter's iteration limit and minimum point count bound it.
#[derive(Debug, Clone)]
pub struct UpperEnvelope {
    pub quantile: f64,
}

impl UpperEnvelope {
    pub fn new(quantile: f64) -> Self {
        Self {
            quantile: quantile.clamp(0.0, 1.0),
        }
    }
}

impl ContinuumFinder for UpperEnvelope {
    fn name(&self) -> &'static str {
        "upper-envelope"
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

        let Some(cut) = quantile(&active, self.quantile) else {
            return (mask.to_vec(), false);
        };

        let new_mask: Vec<bool> = (0..y.len())
            .map(|i| mask[i] && usable(y[i], model[i], w.map(|w| w[i])) && residual[i] >= cut)
            .collect();

        let changed = new_mask != mask;
        (new_mask, changed)
    }
}
