//! Continuum finders.
//!
//! A finder looks at the current model and decides which points are
//! continuum. The iterative fitter refits on the returned mask until the finder
//! is satisfied:
//!
//! - `SigmaClipping`: symmetric/asymmetric robust sigma clipping
//! - `UpperEnvelope`: keep the upper part of the residual distribution

use crate::domain::{FinderKind, FitConfig};

pub mod envelope;
pub mod sigma_clip;

pub use envelope::*;
pub use sigma_clip::*;

/// Classifies points as continuum (`true`) or feature (`false`).
pub trait ContinuumFinder: Send {
    fn name(&self) -> &'static str;

    /// Return the new continuum mask and whether another fit round is wanted.
    ///
    /// `mask` is the mask the current `model` was fitted on; all slices share
    /// the length of `x`.
    fn find(
        &mut self,
        iter: usize,
        x: &[f64],
        y: &[f64],
        w: Option<&[f64]>,
        mask: &[bool],
        model: &[f64],
    ) -> (Vec<bool>, bool);
}

/// Build the finder selected in the run configuration.
pub fn finder_from_config(config: &FitConfig) -> Option<Box<dyn ContinuumFinder>> {
    match config.finder {
        FinderKind::None => None,
        FinderKind::SigmaClip => Some(Box::new(SigmaClipping::new(config.sigma_low, config.sigma_high))),
        FinderKind::UpperEnvelope => Some(Box::new(UpperEnvelope::new(config.quantile))),
    }
}

#[inline]
pub(crate) fn usable(y: f64, model: f64, w: Option<f64>) -> bool {
    y.is_finite() && model.is_finite() && w.is_none_or(|w| w.is_finite() && w > 0.0)
}
