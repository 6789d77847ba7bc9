//! Shared "fit pipeline" logic.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! CSV ingest -> model from config -> iterative fit -> evaluate -> parameter file
//!
//! Every input gets its own `ContinuumModel`; a batch fits inputs in parallel
//! on the rayon pool.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::info;
use rayon::prelude::*;

use crate::continuum::{ContinuumModel, model_from_config};
use crate::domain::{ContinuumFile, FitConfig, Spectrum};
use crate::error::AppError;
use crate::fit::FunctionFit;
use crate::io::{IngestedSpectrum, continuum_file, load_spectrum};
use crate::trace::{LogTrace, RecordingTrace, TraceLog};

/// All computed outputs of fitting one spectrum.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ingest: IngestedSpectrum,
    pub model_name: &'static str,
    pub params: Vec<f64>,
    /// Continuum over the spectrum's wave grid (linear flux).
    pub continuum: Vec<f64>,
    /// Pixels used by the final round of any fit session.
    pub fit_mask: Vec<bool>,
    pub sessions: Vec<FunctionFit>,
    pub include_overflow: Vec<usize>,
    pub exclude_overflow: Vec<usize>,
    pub file: ContinuumFile,
    /// Recorded iterations (only with `debug_bundle`).
    pub trace: Option<TraceLog>,
}

impl RunOutput {
    pub fn label(&self) -> String {
        self.ingest.label()
    }

    pub fn spectrum(&self) -> &Spectrum {
        &self.ingest.spectrum
    }
}

/// Outcome of a batch: successful runs and per-input failures, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub runs: Vec<RunOutput>,
    pub failures: Vec<(PathBuf, AppError)>,
}

/// Fit every input of `config` in parallel.
pub fn run_fit(config: &FitConfig) -> Result<BatchOutput, AppError> {
    if config.inputs.is_empty() {
        return Err(AppError::input("No input spectra given."));
    }

    let results: Vec<(PathBuf, Result<RunOutput, AppError>)> = config
        .inputs
        .par_iter()
        .map(|path| (path.clone(), run_fit_path(path, config)))
        .collect();

    let mut out = BatchOutput::default();
    for (path, result) in results {
        match result {
            Ok(run) => out.runs.push(run),
            Err(e) => out.failures.push((path, e)),
        }
    }
    Ok(out)
}

/// Load and fit a single spectrum CSV.
pub fn run_fit_path(path: &Path, config: &FitConfig) -> Result<RunOutput, AppError> {
    let ingest = load_spectrum(path)?;
    run_fit_spectrum(ingest, config)
}

/// Fit an already loaded spectrum.
pub fn run_fit_spectrum(ingest: IngestedSpectrum, config: &FitConfig) -> Result<RunOutput, AppError> {
    let recorder = config.debug_bundle.then(RecordingTrace::new);
    let mut model = model_from_config(config);
    model = match &recorder {
        Some(r) => model.with_trace(Box::new(r.clone())),
        None => model.with_trace(Box::new(LogTrace)),
    };

    let params = model.fit(&ingest.spectrum, None)?;
    let (_, continuum) = model.eval(&params)?;
    let label = ingest.label();
    let file = continuum_file(&model, &params, Some(&label))?;

    info!(
        "{label}: {} continuum fitted with {} of {} pixels",
        model.name(),
        model.last_fits().iter().map(FunctionFit::point_count).sum::<usize>(),
        ingest.spectrum.len()
    );

    Ok(RunOutput {
        fit_mask: final_mask(&model, ingest.spectrum.len()),
        model_name: model.name(),
        params,
        continuum,
        sessions: model.last_fits().to_vec(),
        include_overflow: model.include_overflow().to_vec(),
        exclude_overflow: model.exclude_overflow().to_vec(),
        file,
        trace: recorder.map(|r| r.snapshot()),
        ingest,
    })
}

fn final_mask(model: &ContinuumModel, n: usize) -> Vec<bool> {
    let mut mask = vec![false; n];
    for fit in model.last_fits() {
        for (m, &f) in mask.iter_mut().zip(fit.mask.iter()) {
            *m |= f;
        }
    }
    mask
}

/// Make run labels distinct so per-input outputs never overwrite each other.
///
/// The first occurrence keeps its label, later ones get `-2`, `-3`, ...
pub fn unique_labels(labels: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    labels
        .iter()
        .map(|label| {
            let mut candidate = label.clone();
            let mut k = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{label}-{k}");
                k += 1;
            }
            candidate
        })
        .collect()
}

/// Per-input output path: `base` for a single input, `base_stem-label.ext`
/// when several inputs share one `--export` option.
pub fn output_path(base: &Path, label: &str, multiple: bool) -> PathBuf {
    if !multiple {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}-{label}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{label}"),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SynthConfig, generate_spectrum};
    use crate::domain::{Basis, FinderKind, InitialParams, ShapeKind};
    use crate::io::write_spectrum_csv;
    use crate::transform::FluxTransform;

    fn config(inputs: Vec<PathBuf>) -> FitConfig {
        FitConfig {
            inputs,
            shape: ShapeKind::Polynomial,
            basis: Basis::Legendre,
            degree: 2,
            finder: FinderKind::SigmaClip,
            sigma_low: 1.5,
            sigma_high: 3.0,
            quantile: 0.5,
            max_iter: 20,
            initial_params: InitialParams::ReuseWithFinder,
            refit_on_convergence: true,
            transform: FluxTransform::Identity,
            use_spec_continuum: false,
            use_spec_mask: true,
            mask_bits: None,
            include_ranges: Vec::new(),
            exclude_ranges: Vec::new(),
            omit_overflow: false,
            segment_buffer: 0.0,
            export_results: None,
            export_params: None,
            debug_bundle: true,
        }
    }

    #[test]
    fn batch_fits_synthetic_spectra_and_reports_failures() {
        let dir = std::env::temp_dir();
        let pid = std::process::id();
        let mut inputs = Vec::new();
        for seed in [1u64, 2] {
            let synth = generate_spectrum(&SynthConfig {
                seed,
                lines: 15,
                snr: 200.0,
                ..SynthConfig::default()
            })
            .unwrap();
            let path = dir.join(format!("contfit-batch-{pid}-{seed}.csv"));
            write_spectrum_csv(&path, &synth.spectrum).unwrap();
            inputs.push(path);
        }
        inputs.push(dir.join(format!("contfit-batch-{pid}-missing.csv")));

        let batch = run_fit(&config(inputs.clone())).unwrap();
        for p in &inputs {
            let _ = std::fs::remove_file(p);
        }

        assert_eq!(batch.runs.len(), 2);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].1.exit_code(), 2);

        for run in &batch.runs {
            let truth = run.spectrum().cont.as_ref().unwrap();
            let worst = run
                .continuum
                .iter()
                .zip(truth.iter())
                .map(|(c, t)| ((c - t) / t).abs())
                .fold(0.0, f64::max);
            assert!(worst < 0.02, "{}: worst relative error {worst}", run.label());
            assert!(run.fit_mask.iter().any(|m| !m));
            assert!(run.trace.as_ref().is_some_and(|t| !t.iterations.is_empty()));
            assert_eq!(run.file.params.len(), 3);
        }
    }

    #[test]
    fn inputs_with_the_same_stem_get_distinct_outputs() {
        let labels: Vec<String> = ["spec", "other", "spec", "spec-2"].map(String::from).to_vec();
        let unique = unique_labels(&labels);
        assert_eq!(unique, vec!["spec", "other", "spec-2", "spec-2-2"]);

        let base = Path::new("out/results.csv");
        let paths: HashSet<PathBuf> = unique.iter().map(|l| output_path(base, l, true)).collect();
        assert_eq!(paths.len(), labels.len());
    }

    #[test]
    fn output_path_appends_label_for_batches() {
        let base = Path::new("out/results.csv");
        assert_eq!(output_path(base, "a", false), PathBuf::from("out/results.csv"));
        assert_eq!(output_path(base, "a", true), PathBuf::from("out/results-a.csv"));
        assert_eq!(output_path(Path::new("res"), "b", true), PathBuf::from("res-b"));
    }
}
