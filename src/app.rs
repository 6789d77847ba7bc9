//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` defaults and parses CLI arguments
//! - runs the fit pipeline over the input spectra
//! - evaluates saved continua
//! - generates synthetic spectra
//! - prints reports and writes optional exports

use clap::Parser;
use log::{debug, error};

use crate::cli::{Command, EvalArgs, FitArgs, SynthArgs};
use crate::data::{SynthConfig, generate_spectrum};
use crate::domain::FitConfig;
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `contfit` binary.
pub fn run() -> Result<(), AppError> {
    // A missing `.env` is fine; everything has a CLI default.
    if let Ok(path) = dotenvy::dotenv() {
        debug!("loaded environment from {}", path.display());
    }
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Eval(args) => handle_eval(&args),
        Command::Synth(args) => handle_synth(&args),
    }
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(args);
    let batch = pipeline::run_fit(&config)?;
    let multiple = config.inputs.len() > 1;

    let labels: Vec<String> = batch.runs.iter().map(|r| r.label()).collect();
    let labels = pipeline::unique_labels(&labels);

    for (run, label) in batch.runs.iter().zip(labels.iter()) {
        println!("{}", crate::report::format_run_summary(run, &config));

        if let Some(base) = &config.export_results {
            let path = pipeline::output_path(base, label, multiple);
            crate::io::write_results_csv(&path, run.spectrum(), &run.continuum, &run.fit_mask)?;
        }
        if let Some(base) = &config.export_params {
            let path = pipeline::output_path(base, label, multiple);
            crate::io::write_params_json(&path, &run.file)?;
        }
        if config.debug_bundle {
            let path = crate::debug::write_debug_bundle(run, label, &config)?;
            println!("Debug bundle: {}", path.display());
        }
    }

    for (path, e) in &batch.failures {
        error!("{}: {e}", path.display());
    }
    match batch.failures.into_iter().next() {
        Some((path, e)) => Err(AppError::new(
            e.exit_code(),
            format!("Failed to fit '{}': {}", path.display(), e.message()),
        )),
        None => Ok(()),
    }
}

fn handle_eval(args: &EvalArgs) -> Result<(), AppError> {
    let file = crate::io::read_params_json(&args.params)?;
    let (mut model, params) = crate::io::model_from_file(&file)?;
    let ingest = crate::io::load_spectrum(&args.input)?;
    let spec = &ingest.spectrum;

    model.init_wave(&spec.wave, true)?;
    let (_, continuum) = model.eval(&params)?;

    println!("{}", crate::report::format_eval_summary(&file, spec, &continuum));

    if let Some(path) = &args.export {
        let mask = vec![true; spec.len()];
        crate::io::write_results_csv(path, spec, &continuum, &mask)?;
    }
    Ok(())
}

fn handle_synth(args: &SynthArgs) -> Result<(), AppError> {
    let synth = generate_spectrum(&SynthConfig {
        seed: args.seed,
        pixels: args.pixels,
        wave_min: args.wave_min,
        wave_max: args.wave_max,
        lines: args.lines,
        snr: args.snr,
        cosmic_rate: args.cosmic_rate,
    })?;
    crate::io::write_spectrum_csv(&args.output, &synth.spectrum)?;
    println!(
        "Wrote {} pixels, {} lines, {} cosmic rays to {}",
        synth.spectrum.len(),
        synth.lines.len(),
        synth.cosmics.len(),
        args.output.display()
    );
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        inputs: args.inputs.clone(),
        shape: args.shape,
        basis: args.basis,
        degree: args.degree,
        finder: args.finder,
        sigma_low: args.sigma_low,
        sigma_high: args.sigma_high,
        quantile: args.quantile,
        max_iter: args.max_iter,
        initial_params: args.initial_params,
        refit_on_convergence: !args.no_refit,
        transform: args.transform,
        use_spec_continuum: args.use_spec_continuum,
        use_spec_mask: !args.ignore_spec_mask,
        mask_bits: args.mask_bits,
        include_ranges: args.include.clone(),
        exclude_ranges: args.exclude.clone(),
        omit_overflow: args.omit_overflow,
        segment_buffer: args.segment_buffer,
        export_results: args.export.clone(),
        export_params: args.export_params.clone(),
        debug_bundle: args.debug,
    }
}
