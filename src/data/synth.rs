//! Synthetic absorption spectra.
//!
//! A smooth quadratic continuum, multiplied by Gaussian absorption lines, plus
//! Gaussian noise at a fixed signal-to-noise ratio and optional cosmic-ray
//! spikes. The true continuum is kept in `Spectrum::cont` so fits can be
//! checked against it.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Normal, Uniform};

use crate::domain::Spectrum;
use crate::error::AppError;

/// Line depth range (fraction of the continuum).
const DEPTH_RANGE: (f64, f64) = (0.05, 0.8);
/// Gaussian line sigma range (Å).
const WIDTH_RANGE: (f64, f64) = (0.5, 3.0);
/// Cosmic-ray amplitude range (multiples of the continuum).
const COSMIC_RANGE: (f64, f64) = (0.5, 5.0);

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub seed: u64,
    pub pixels: usize,
    pub wave_min: f64,
    pub wave_max: f64,
    pub lines: usize,
    pub snr: f64,
    pub cosmic_rate: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            pixels: 2000,
            wave_min: 4000.0,
            wave_max: 7000.0,
            lines: 40,
            snr: 100.0,
            cosmic_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthLine {
    pub center: f64,
    pub depth: f64,
    pub sigma: f64,
}

#[derive(Debug, Clone)]
pub struct SynthSpectrum {
    pub spectrum: Spectrum,
    pub lines: Vec<SynthLine>,
    /// Pixels hit by a cosmic ray.
    pub cosmics: Vec<usize>,
}

pub fn generate_spectrum(config: &SynthConfig) -> Result<SynthSpectrum, AppError> {
    if config.pixels < 2 {
        return Err(AppError::input("A synthetic spectrum needs at least 2 pixels."));
    }
    if !(config.wave_min.is_finite() && config.wave_max.is_finite() && config.wave_max > config.wave_min) {
        return Err(AppError::input("Invalid wavelength range for the synthetic spectrum."));
    }
    if !(config.snr.is_finite() && config.snr > 0.0) {
        return Err(AppError::input("Signal-to-noise ratio must be > 0."));
    }
    if !(0.0..=1.0).contains(&config.cosmic_rate) {
        return Err(AppError::input("Cosmic-ray rate must be within [0, 1]."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::model(format!("Noise distribution error: {e}")))?;

    let step = (config.wave_max - config.wave_min) / (config.pixels - 1) as f64;
    let wave: Vec<f64> = (0..config.pixels)
        .map(|i| config.wave_min + step * i as f64)
        .collect();

    let level = rng.gen_range(0.5..2.0);
    let slope = rng.gen_range(-0.3..0.3);
    let curvature = rng.gen_range(-0.1..0.1);
    let mid = 0.5 * (config.wave_min + config.wave_max);
    let half = 0.5 * (config.wave_max - config.wave_min);
    let cont: Vec<f64> = wave
        .iter()
        .map(|&w| {
            let t = (w - mid) / half;
            level * (1.0 + slope * t + curvature * t * t)
        })
        .collect();

    let centers = Uniform::new(config.wave_min, config.wave_max);
    let lines: Vec<SynthLine> = (0..config.lines)
        .map(|_| SynthLine {
            center: centers.sample(&mut rng),
            depth: rng.gen_range(DEPTH_RANGE.0..DEPTH_RANGE.1),
            sigma: rng.gen_range(WIDTH_RANGE.0..WIDTH_RANGE.1),
        })
        .collect();

    let mut flux = Vec::with_capacity(config.pixels);
    let mut flux_err = Vec::with_capacity(config.pixels);
    let mut cosmics = Vec::new();
    for (i, (&w, &c)) in wave.iter().zip(cont.iter()).enumerate() {
        let absorbed = lines.iter().fold(c, |f, l| {
            let z = (w - l.center) / l.sigma;
            f * (1.0 - l.depth * (-0.5 * z * z).exp())
        });
        let sigma = c / config.snr;
        let mut value = absorbed + sigma * normal.sample(&mut rng);
        if config.cosmic_rate > 0.0 && rng.gen_bool(config.cosmic_rate) {
            value += c * rng.gen_range(COSMIC_RANGE.0..COSMIC_RANGE.1);
            cosmics.push(i);
        }
        flux.push(value);
        flux_err.push(sigma);
    }

    Ok(SynthSpectrum {
        spectrum: Spectrum {
            wave,
            flux,
            flux_err: Some(flux_err),
            cont: Some(cont),
            mask: None,
            mask_flags: None,
        },
        lines,
        cosmics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_spectrum() {
        let a = generate_spectrum(&SynthConfig::default()).unwrap();
        let b = generate_spectrum(&SynthConfig::default()).unwrap();
        assert_eq!(a.spectrum, b.spectrum);
        assert_eq!(a.lines, b.lines);

        let c = generate_spectrum(&SynthConfig {
            seed: 7,
            ..SynthConfig::default()
        })
        .unwrap();
        assert_ne!(a.spectrum.flux, c.spectrum.flux);
    }

    #[test]
    fn lines_only_absorb() {
        let synth = generate_spectrum(&SynthConfig {
            snr: 1e9,
            ..SynthConfig::default()
        })
        .unwrap();
        let s = &synth.spectrum;
        let cont = s.cont.as_ref().unwrap();
        assert_eq!(s.wave.len(), 2000);
        assert_eq!(s.wave[0], 4000.0);
        assert!((s.wave[1999] - 7000.0).abs() < 1e-9);
        for (f, c) in s.flux.iter().zip(cont.iter()) {
            assert!(*f <= c * (1.0 + 1e-6));
        }
        assert!(synth.cosmics.is_empty());
    }

    #[test]
    fn cosmic_rays_land_above_the_continuum() {
        let synth = generate_spectrum(&SynthConfig {
            cosmic_rate: 0.05,
            lines: 0,
            ..SynthConfig::default()
        })
        .unwrap();
        assert!(!synth.cosmics.is_empty());
        let s = &synth.spectrum;
        let cont = s.cont.as_ref().unwrap();
        for &i in &synth.cosmics {
            assert!(s.flux[i] > 1.3 * cont[i]);
        }
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let bad = SynthConfig {
            pixels: 1,
            ..SynthConfig::default()
        };
        assert_eq!(generate_spectrum(&bad).unwrap_err().exit_code(), 2);
        let bad = SynthConfig {
            wave_max: 100.0,
            ..SynthConfig::default()
        };
        assert!(generate_spectrum(&bad).is_err());
    }
}
