//! Wavelength ranges to boolean masks.

use log::debug;

use crate::domain::{Buffer, Range};
use crate::error::AppError;

/// Options shared by `ranges_to_mask` and `limits_to_masks`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MaskOptions {
    /// Buffer applied to every range bound (`lo + low`, `hi - high`).
    pub buffer: Buffer,
    /// Use open intervals (`<`) instead of closed ones (`<=`).
    pub strict: bool,
    /// Ranges reaching past the wave grid contribute nothing.
    pub omit_overflow: bool,
}

impl MaskOptions {
    pub fn with_buffer(mut self, buffer: impl Into<Buffer>) -> Self {
        self.buffer = buffer.into();
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn omit_overflow(mut self, omit: bool) -> Self {
        self.omit_overflow = omit;
        self
    }
}

/// A mask built from ranges plus the indices of ranges that overflowed the grid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeMask {
    pub mask: Vec<bool>,
    /// Indices into the range list (not into the wave grid).
    pub overflow: Vec<usize>,
}

impl RangeMask {
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Check that a wave grid is usable for masking: non-empty, finite, ascending.
pub fn validate_wave(wave: &[f64]) -> Result<(), AppError> {
    if wave.is_empty() {
        return Err(AppError::input("Wavelength vector is empty."));
    }
    if let Some(i) = wave.iter().position(|w| !w.is_finite()) {
        return Err(AppError::input(format!(
            "Wavelength vector has a non-finite value at index {i}."
        )));
    }
    if let Some(i) = wave.windows(2).position(|p| p[1] < p[0]) {
        return Err(AppError::input(format!(
            "Wavelength vector is not sorted ascending at index {}.",
            i + 1
        )));
    }
    Ok(())
}

pub(crate) fn check_mask_len(mask: Option<&[bool]>, n: usize, what: &str) -> Result<(), AppError> {
    match mask {
        Some(m) if m.len() != n => Err(AppError::input(format!(
            "{what} has length {} but the wavelength vector has length {n}.",
            m.len()
        ))),
        _ => Ok(()),
    }
}

#[inline]
pub(crate) fn less_than(a: f64, b: f64, strict: bool) -> bool {
    if strict { a < b } else { a <= b }
}

/// `true` when the buffered interval `[lo, hi]` reaches outside the grid.
#[inline]
pub(crate) fn overflows(wave: &[f64], lo: f64, hi: f64, buffer: Buffer) -> bool {
    lo + buffer.low < wave[0] || hi - buffer.high > wave[wave.len() - 1]
}

/// OR the buffered interval `[lo, hi]` into `out`.
pub(crate) fn mark_interval(wave: &[f64], lo: f64, hi: f64, opts: &MaskOptions, out: &mut [bool]) {
    let lo = lo + opts.buffer.low;
    let hi = hi - opts.buffer.high;
    for (m, &w) in out.iter_mut().zip(wave.iter()) {
        if less_than(lo, w, opts.strict) && less_than(w, hi, opts.strict) {
            *m = true;
        }
    }
}

/// Convert a list of wavelength ranges into a mask over `wave`.
///
/// Ranges are OR-ed together; `existing` (if given) is AND-ed at the end so it
/// can only restrict the result. `wave` must be sorted ascending.
pub fn ranges_to_mask<R>(
    wave: &[f64],
    ranges: R,
    existing: Option<&[bool]>,
    opts: &MaskOptions,
) -> Result<RangeMask, AppError>
where
    R: AsRef<[Range]>,
{
    validate_wave(wave)?;
    check_mask_len(existing, wave.len(), "Input mask")?;

    let mut mask = vec![false; wave.len()];
    let mut overflow = Vec::new();

    for (i, r) in ranges.as_ref().iter().enumerate() {
        if overflows(wave, r.lo, r.hi, opts.buffer) {
            overflow.push(i);
            if opts.omit_overflow {
                debug!("range {i} [{}, {}] overflows the wave grid, omitted", r.lo, r.hi);
                continue;
            }
        }
        mark_interval(wave, r.lo, r.hi, opts, &mut mask);
    }

    if let Some(existing) = existing {
        for (m, &e) in mask.iter_mut().zip(existing.iter()) {
            *m &= e;
        }
    }

    Ok(RangeMask { mask, overflow })
}
