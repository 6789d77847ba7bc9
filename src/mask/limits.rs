//! Partitioning a wave grid at a list of limits.
//!
//! Used to split a spectrum at the hydrogen series limits (Balmer jump and
//! friends) so each segment gets its own continuum.

use crate::domain::Range;
use crate::error::AppError;
use crate::mask::ranges::{MaskOptions, check_mask_len, mark_interval, overflows, validate_wave};

/// Air wavelengths (Å) of the Balmer, Paschen and Brackett series limits.
pub const HYDROGEN_LIMITS_AIR: [f64; 3] = [3646.0, 8204.0, 14584.0];

/// Outer bounds bracketing the hydrogen limits, air wavelengths (Å).
const HYDROGEN_OUTER_AIR: (f64, f64) = (2530.0, 17500.0);

/// One interval between consecutive limits.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Index of the interval (`limits[index]..limits[index + 1]`).
    pub index: usize,
    pub mask: Vec<bool>,
    /// First and last masked wavelength, `(NaN, NaN)` if nothing is selected.
    pub range: (f64, f64),
}

impl Segment {
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.mask.iter().any(|&m| m)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LimitMasks {
    pub segments: Vec<Segment>,
    /// Indices of intervals that reach past the grid.
    pub overflow: Vec<usize>,
}

/// Build one mask per interval between consecutive `limits`.
///
/// A `None` limit stands for the first (or last) wavelength of the grid.
/// Overflowing intervals are recorded; with `omit_overflow` they produce no
/// segment at all, so segment `index` values may have gaps.
pub fn limits_to_masks(
    wave: &[f64],
    limits: &[Option<f64>],
    existing: Option<&[bool]>,
    opts: &MaskOptions,
) -> Result<LimitMasks, AppError> {
    validate_wave(wave)?;
    check_mask_len(existing, wave.len(), "Input mask")?;

    let first = wave[0];
    let last = wave[wave.len() - 1];

    let mut out = LimitMasks::default();
    for (index, pair) in limits.windows(2).enumerate() {
        let lo = pair[0].unwrap_or(first);
        let hi = pair[1].unwrap_or(last);

        if overflows(wave, lo, hi, opts.buffer) {
            out.overflow.push(index);
            if opts.omit_overflow {
                continue;
            }
        }

        let mut mask = vec![false; wave.len()];
        mark_interval(wave, lo, hi, opts, &mut mask);
        if let Some(existing) = existing {
            for (m, &e) in mask.iter_mut().zip(existing.iter()) {
                *m &= e;
            }
        }

        let mut selected = wave.iter().zip(mask.iter()).filter(|(_, m)| **m).map(|(w, _)| *w);
        let range = match selected.next() {
            Some(w0) => (w0, selected.last().unwrap_or(w0)),
            None => (f64::NAN, f64::NAN),
        };

        out.segments.push(Segment { index, mask, range });
    }

    Ok(out)
}

/// Consecutive limits as ranges: `[l0, l1], [l1, l2], ...`.
pub fn limits_to_ranges(limits: &[f64]) -> Vec<Range> {
    limits.windows(2).map(|p| Range::new(p[0], p[1])).collect()
}

/// Hydrogen series limits bracketed by the outer bounds, in vacuum wavelengths.
pub fn hydrogen_limits() -> Vec<f64> {
    std::iter::once(HYDROGEN_OUTER_AIR.0)
        .chain(HYDROGEN_LIMITS_AIR)
        .chain(std::iter::once(HYDROGEN_OUTER_AIR.1))
        .map(air_to_vac)
        .collect()
}

/// Air to vacuum wavelength (Å), using the refractive index of Ciddor (1996)
/// as parameterised by Piskunov for VALD.
pub fn air_to_vac(air: f64) -> f64 {
    let s = 1e4 / air;
    let s2 = s * s;
    let n = 1.0
        + 0.000_083_366_242_120_83
        + 0.024_089_268_699_68 / (130.106_592_452_2 - s2)
        + 0.000_159_974_089_489_7 / (38.925_687_932_93 - s2);
    air * n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<f64> {
        (0..=30).map(|i| 4000.0 + 100.0 * i as f64).collect()
    }

    #[test]
    fn n_limits_give_n_minus_one_segments() {
        let wave = grid();
        let limits = [None, Some(5000.0), Some(6000.0), None];
        let lm = limits_to_masks(&wave, &limits, None, &MaskOptions::default()).unwrap();
        assert_eq!(lm.segments.len(), 3);
        assert!(lm.overflow.is_empty());
        assert_eq!(lm.segments[0].range, (4000.0, 5000.0));
        assert_eq!(lm.segments[1].range, (5000.0, 6000.0));
        assert_eq!(lm.segments[2].range, (6000.0, 7000.0));
        for s in &lm.segments {
            assert_eq!(s.mask.len(), wave.len());
        }
    }

    #[test]
    fn strict_limits_do_not_share_boundary_pixels() {
        let wave = grid();
        let limits = [None, Some(5000.0), None];
        let opts = MaskOptions::default().strict(true);
        let lm = limits_to_masks(&wave, &limits, None, &opts).unwrap();
        // Open intervals drop the shared boundary and the grid ends.
        assert_eq!(lm.segments[0].range, (4100.0, 4900.0));
        assert_eq!(lm.segments[1].range, (5100.0, 6900.0));
    }

    #[test]
    fn empty_segment_reports_nan_range() {
        let wave = grid();
        let limits = [Some(2000.0), Some(3000.0), Some(5000.0)];
        let lm = limits_to_masks(&wave, &limits, None, &MaskOptions::default()).unwrap();
        assert_eq!(lm.overflow, vec![0, 1]);
        assert!(lm.segments[0].is_empty());
        assert!(lm.segments[0].range.0.is_nan() && lm.segments[0].range.1.is_nan());
        assert_eq!(lm.segments[1].range, (4000.0, 5000.0));

        let omitted =
            limits_to_masks(&wave, &limits, None, &MaskOptions::default().omit_overflow(true)).unwrap();
        assert!(omitted.segments.is_empty());
        assert_eq!(omitted.overflow, vec![0, 1]);
    }

    #[test]
    fn hydrogen_limits_are_vacuum_and_sorted() {
        let limits = hydrogen_limits();
        assert_eq!(limits.len(), 5);
        assert!(limits.windows(2).all(|p| p[0] < p[1]));
        // Balmer limit is ~3647.0 Å in vacuum.
        assert!((limits[1] - 3647.04).abs() < 0.1, "{}", limits[1]);
        assert!(limits[1] > HYDROGEN_LIMITS_AIR[0]);
    }

    #[test]
    fn limits_to_ranges_pairs_neighbours() {
        let r = limits_to_ranges(&[1.0, 2.0, 5.0]);
        assert_eq!(r, vec![Range::new(1.0, 2.0), Range::new(2.0, 5.0)]);
    }
}
