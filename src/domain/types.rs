//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - reloaded later to evaluate a saved continuum

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::transform::FluxTransform;

/// Polynomial basis used by the fittable functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Basis {
    Power,
    Legendre,
    Chebyshev,
}

impl Basis {
    pub fn display_name(self) -> &'static str {
        match self {
            Basis::Power => "power",
            Basis::Legendre => "legendre",
            Basis::Chebyshev => "chebyshev",
        }
    }
}

/// Which continuum shape to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    /// A single polynomial over the whole spectrum.
    Polynomial,
    /// One polynomial per interval between hydrogen series limits.
    Segmented,
}

/// Which continuum finder (if any) refines the control points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FinderKind {
    /// Fit all unmasked points once.
    None,
    /// Reject points outside a robust sigma band around the model.
    SigmaClip,
    /// Keep points above a quantile of the residuals.
    UpperEnvelope,
}

/// How the first round of an iterative fit treats an initial parameter estimate.
///
/// With `ReuseWithFinder`, iteration 0 skips fitting and hands the supplied
/// estimate straight to the continuum finder, but only when both an estimate
/// and a finder are present. `AlwaysFit` fits in every round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InitialParams {
    AlwaysFit,
    ReuseWithFinder,
}

/// A closed wavelength interval `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub lo: f64,
    pub hi: f64,
}

impl Range {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }
}

impl AsRef<[Range]> for Range {
    fn as_ref(&self) -> &[Range] {
        std::slice::from_ref(self)
    }
}

/// Parses `lo:hi` (as used on the command line).
impl FromStr for Range {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((lo, hi)) = s.split_once(':') else {
            return Err(AppError::input(format!(
                "Invalid wavelength range '{s}' (expected LO:HI)."
            )));
        };
        let lo: f64 = lo
            .trim()
            .parse()
            .map_err(|e| AppError::input(format!("Invalid range lower bound '{lo}': {e}")))?;
        let hi: f64 = hi
            .trim()
            .parse()
            .map_err(|e| AppError::input(format!("Invalid range upper bound '{hi}': {e}")))?;
        if !(lo.is_finite() && hi.is_finite()) || hi < lo {
            return Err(AppError::input(format!(
                "Invalid wavelength range '{s}' (bounds must be finite and LO <= HI)."
            )));
        }
        Ok(Range { lo, hi })
    }
}

/// Buffer applied to range bounds: `lo + low` and `hi - high`.
///
/// Positive values shrink a range, negative values grow it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Buffer {
    pub low: f64,
    pub high: f64,
}

impl From<f64> for Buffer {
    fn from(value: f64) -> Self {
        Buffer {
            low: value,
            high: value,
        }
    }
}

impl From<(f64, f64)> for Buffer {
    fn from((low, high): (f64, f64)) -> Self {
        Buffer { low, high }
    }
}

/// A flat (one-dimensional) observed or synthetic spectrum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    pub flux_err: Option<Vec<f64>>,
    /// Reference continuum (e.g. the model continuum of a synthetic spectrum).
    pub cont: Option<Vec<f64>>,
    /// Boolean mask, `true` marks usable pixels.
    pub mask: Option<Vec<bool>>,
    /// Pixel flags, non-zero bits mark problems.
    pub mask_flags: Option<Vec<u32>>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    /// Convert the spectrum's mask information into a boolean mask.
    ///
    /// A pixel is kept only if both the flags and the boolean mask keep it.
    /// With `bits = None` any non-zero flag masks the pixel, otherwise only
    /// the given bits do.
    /// Returns `None` when the spectrum carries no mask at all.
    pub fn mask_as_bool(&self, bits: Option<u32>) -> Option<Vec<bool>> {
        if let Some(flags) = &self.mask_flags {
            let bits = bits.unwrap_or(u32::MAX);
            let mut m: Vec<bool> = flags.iter().map(|f| f & bits == 0).collect();
            if let Some(mask) = &self.mask {
                for (a, &b) in m.iter_mut().zip(mask.iter()) {
                    *a &= b;
                }
            }
            return Some(m);
        }
        self.mask.clone()
    }
}

/// Resolved configuration for a `contfit fit` run.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub inputs: Vec<PathBuf>,
    pub shape: ShapeKind,
    pub basis: Basis,
    pub degree: usize,
    pub finder: FinderKind,
    pub sigma_low: f64,
    pub sigma_high: f64,
    pub quantile: f64,
    pub max_iter: usize,
    pub initial_params: InitialParams,
    pub refit_on_convergence: bool,
    pub transform: FluxTransform,
    pub use_spec_continuum: bool,
    pub use_spec_mask: bool,
    pub mask_bits: Option<u32>,
    pub include_ranges: Vec<Range>,
    pub exclude_ranges: Vec<Range>,
    pub omit_overflow: bool,
    pub segment_buffer: f64,
    pub export_results: Option<PathBuf>,
    pub export_params: Option<PathBuf>,
    pub debug_bundle: bool,
}

/// Portable representation of a fitted continuum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuumFile {
    pub tool: String,
    pub generated: DateTime<Local>,
    pub source: Option<String>,
    pub model: String,
    pub transform: FluxTransform,
    pub constants: BTreeMap<String, f64>,
    /// Shape settings (degree, basis, limits, ...).
    pub items: BTreeMap<String, serde_json::Value>,
    /// Fitted parameters, `null` where a parameter could not be determined.
    pub params: Vec<Option<f64>>,
    pub wave_min: f64,
    pub wave_max: f64,
    /// Continuum evaluated over the fitted grid, in linear flux.
    pub grid: ContinuumGrid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuumGrid {
    pub wave: Vec<f64>,
    pub continuum: Vec<Option<f64>>,
}
