//! Per-model cache of the include/exclude masks.
//!
//! Models fitted to many spectra on the same grid (e.g. a whole synthetic
//! grid) would otherwise rebuild identical masks for every spectrum. The cache
//! keeps the wave vector it was built for and rebuilds when:
//!
//! - it is empty,
//! - the caller forces it,
//! - the incoming wave vector differs from the bound one, or
//! - the include/exclude ranges or the overflow policy changed.

use log::{debug, warn};

use crate::domain::Range;
use crate::error::AppError;
use crate::mask::ranges::{MaskOptions, RangeMask, ranges_to_mask, validate_wave};

#[derive(Debug, Clone, Default)]
pub struct MaskCache {
    wave: Option<Vec<f64>>,
    include: Option<RangeMask>,
    exclude: Option<RangeMask>,
    include_ranges: Option<Vec<Range>>,
    exclude_ranges: Option<Vec<Range>>,
    omit_overflow: bool,
}

impl MaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound wave vector, if any.
    pub fn wave(&self) -> Option<&[f64]> {
        self.wave.as_deref()
    }

    pub fn include(&self) -> Option<&RangeMask> {
        self.include.as_ref()
    }

    pub fn exclude(&self) -> Option<&RangeMask> {
        self.exclude.as_ref()
    }

    /// `true` if `wave` is exactly the bound vector.
    pub fn is_bound_to(&self, wave: &[f64]) -> bool {
        self.wave.as_deref() == Some(wave)
    }

    /// Bind `wave` and (re)build the range masks if needed.
    ///
    /// Returns `true` when the cache was rebuilt.
    pub fn bind(
        &mut self,
        wave: &[f64],
        include_ranges: Option<&[Range]>,
        exclude_ranges: Option<&[Range]>,
        omit_overflow: bool,
        force: bool,
    ) -> Result<bool, AppError> {
        let same_ranges = self.include_ranges.as_deref() == include_ranges
            && self.exclude_ranges.as_deref() == exclude_ranges
            && self.omit_overflow == omit_overflow;
        if !force && same_ranges && self.is_bound_to(wave) {
            return Ok(false);
        }

        validate_wave(wave)?;
        let opts = MaskOptions::default().omit_overflow(omit_overflow);

        self.include = include_ranges
            .map(|r| ranges_to_mask(wave, r, None, &opts))
            .transpose()?;
        self.exclude = exclude_ranges
            .map(|r| ranges_to_mask(wave, r, None, &opts))
            .transpose()?;
        self.wave = Some(wave.to_vec());
        self.include_ranges = include_ranges.map(<[Range]>::to_vec);
        self.exclude_ranges = exclude_ranges.map(<[Range]>::to_vec);
        self.omit_overflow = omit_overflow;

        for (label, rm) in [("include", &self.include), ("exclude", &self.exclude)] {
            if let Some(rm) = rm {
                if !rm.overflow.is_empty() {
                    warn!(
                        "{label} ranges {:?} reach past the wavelength grid [{}, {}]",
                        rm.overflow,
                        wave[0],
                        wave[wave.len() - 1]
                    );
                }
            }
        }
        debug!("mask cache rebuilt for {} wavelengths", wave.len());

        Ok(true)
    }

    /// Combine a fitting mask with the cached include/exclude masks:
    /// `mask & include & !exclude`.
    pub fn apply(&self, mask: Option<&[bool]>) -> Option<Vec<bool>> {
        let n = self.wave.as_ref()?.len();
        let mut out = match mask {
            Some(m) => m.to_vec(),
            None => vec![true; n],
        };
        if let Some(inc) = &self.include {
            for (o, &i) in out.iter_mut().zip(inc.mask.iter()) {
                *o &= i;
            }
        }
        if let Some(exc) = &self.exclude {
            for (o, &e) in out.iter_mut().zip(exc.mask.iter()) {
                *o &= !e;
            }
        }
        Some(out)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
