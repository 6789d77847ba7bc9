//! Reporting utilities: fit quality and formatted terminal output.

pub mod format;

pub use format::*;

/// Quality of a continuum against the pixels it was fitted on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuumQuality {
    /// Pixels with a finite normalized flux among the fitted ones.
    pub n: usize,
    /// Mean of the normalized flux over those pixels.
    pub mean: f64,
    /// RMS deviation of the normalized flux from 1.
    pub rms: f64,
    /// Pixels where the continuum is undefined.
    pub undefined: usize,
}

/// Normalized-flux statistics on the final continuum points.
pub fn continuum_quality(flux: &[f64], continuum: &[f64], mask: &[bool]) -> ContinuumQuality {
    let undefined = continuum.iter().filter(|c| !c.is_finite()).count();
    let normalized: Vec<f64> = flux
        .iter()
        .zip(continuum.iter())
        .zip(mask.iter())
        .filter(|(_, m)| **m)
        .map(|((f, c), _)| f / c)
        .filter(|v| v.is_finite())
        .collect();

    let n = normalized.len();
    if n == 0 {
        return ContinuumQuality {
            n,
            mean: f64::NAN,
            rms: f64::NAN,
            undefined,
        };
    }
    let mean = normalized.iter().sum::<f64>() / n as f64;
    let rms = (normalized.iter().map(|v| (v - 1.0) * (v - 1.0)).sum::<f64>() / n as f64).sqrt();
    ContinuumQuality {
        n,
        mean,
        rms,
        undefined,
    }
}
