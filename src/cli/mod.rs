//! Command-line parsing for the continuum fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the fitting code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{Basis, FinderKind, InitialParams, Range, ShapeKind};
use crate::transform::FluxTransform;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "contfit", version, about = "Iterative spectral continuum fitter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the continuum of one or more spectrum CSVs and print diagnostics.
    Fit(FitArgs),
    /// Evaluate a saved continuum on the wave grid of a spectrum CSV.
    Eval(EvalArgs),
    /// Write a synthetic absorption spectrum to CSV.
    Synth(SynthArgs),
}

/// Options for fitting.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Spectrum CSV files (`wave,flux[,flux_err,cont,mask,mask_flags]`).
    #[arg(required = true, value_name = "CSV")]
    pub inputs: Vec<PathBuf>,

    /// Continuum shape.
    #[arg(long, value_enum, default_value_t = ShapeKind::Polynomial)]
    pub shape: ShapeKind,

    /// Polynomial basis.
    #[arg(long, value_enum, default_value_t = Basis::Legendre)]
    pub basis: Basis,

    /// Polynomial degree (per segment for `--shape segmented`).
    #[arg(short = 'd', long, env = "CONTFIT_DEGREE", default_value_t = 3)]
    pub degree: usize,

    /// Continuum finder used to refine the control points.
    #[arg(long, value_enum, default_value_t = FinderKind::SigmaClip)]
    pub finder: FinderKind,

    /// Lower clipping threshold in robust sigmas.
    #[arg(long, default_value_t = 2.0)]
    pub sigma_low: f64,

    /// Upper clipping threshold in robust sigmas.
    #[arg(long, default_value_t = 3.0)]
    pub sigma_high: f64,

    /// Residual quantile kept by the upper-envelope finder.
    #[arg(long, default_value_t = 0.5)]
    pub quantile: f64,

    /// Maximum number of finder iterations.
    #[arg(long, env = "CONTFIT_MAX_ITER", default_value_t = crate::fit::DEFAULT_MAX_ITER)]
    pub max_iter: usize,

    /// How the first round treats a supplied initial estimate.
    #[arg(long, value_enum, default_value_t = InitialParams::ReuseWithFinder)]
    pub initial_params: InitialParams,

    /// Do not refit once the finder has converged.
    #[arg(long)]
    pub no_refit: bool,

    /// Flux transform applied before fitting.
    #[arg(long, value_enum, default_value_t = FluxTransform::Identity)]
    pub transform: FluxTransform,

    /// Fit the spectrum's `cont` column instead of its flux.
    #[arg(long)]
    pub use_spec_continuum: bool,

    /// Ignore the spectrum's own mask columns.
    #[arg(long)]
    pub ignore_spec_mask: bool,

    /// Flag bits that mask a pixel (default: any flag).
    #[arg(long, value_name = "BITS")]
    pub mask_bits: Option<u32>,

    /// Wavelength range allowed to provide continuum points (`lo:hi`, repeatable).
    #[arg(long = "include", value_name = "LO:HI")]
    pub include: Vec<Range>,

    /// Wavelength range never used as continuum (`lo:hi`, repeatable).
    #[arg(long = "exclude", value_name = "LO:HI")]
    pub exclude: Vec<Range>,

    /// Drop ranges that reach past the wavelength grid.
    #[arg(long)]
    pub omit_overflow: bool,

    /// Widen each segment by this many Å on both sides.
    #[arg(long, default_value_t = 0.0)]
    pub segment_buffer: f64,

    /// Export per-pixel results to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export the fitted continuum (model + params + grid) to JSON.
    #[arg(long = "export-params")]
    pub export_params: Option<PathBuf>,

    /// Write a markdown bundle of every fit iteration into `debug/`.
    #[arg(long)]
    pub debug: bool,
}

/// Options for evaluating a saved continuum.
#[derive(Debug, Parser, Clone)]
pub struct EvalArgs {
    /// Parameter JSON written by `contfit fit --export-params`.
    #[arg(long, value_name = "JSON")]
    pub params: PathBuf,

    /// Spectrum CSV providing the wave grid (and flux to normalize).
    #[arg(value_name = "CSV")]
    pub input: PathBuf,

    /// Export per-pixel results to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

/// Options for generating a synthetic spectrum.
#[derive(Debug, Parser, Clone)]
pub struct SynthArgs {
    /// Output CSV.
    #[arg(short = 'o', long, value_name = "CSV")]
    pub output: PathBuf,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of pixels.
    #[arg(short = 'n', long, default_value_t = 2000)]
    pub pixels: usize,

    /// First wavelength (Å).
    #[arg(long, default_value_t = 4000.0)]
    pub wave_min: f64,

    /// Last wavelength (Å).
    #[arg(long, default_value_t = 7000.0)]
    pub wave_max: f64,

    /// Number of absorption lines.
    #[arg(long, default_value_t = 40)]
    pub lines: usize,

    /// Signal-to-noise ratio at the continuum.
    #[arg(long, default_value_t = 100.0)]
    pub snr: f64,

    /// Probability that a pixel is hit by a cosmic ray.
    #[arg(long, default_value_t = 0.0)]
    pub cosmic_rate: f64,
}
