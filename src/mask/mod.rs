//! Wavelength-domain masks.
//!
//! - declarative ranges to boolean masks, with overflow reporting (`ranges`)
//! - partitioning a grid at limits, hydrogen series limits (`limits`)
//! - the per-model include/exclude mask cache (`cache`)

pub mod cache;
pub mod limits;
pub mod ranges;

pub use cache::*;
pub use limits::*;
pub use ranges::{MaskOptions, RangeMask, ranges_to_mask, validate_wave};

/// Number of `true` entries in a mask.
pub fn count(mask: &[bool]) -> usize {
    mask.iter().filter(|&&m| m).count()
}
