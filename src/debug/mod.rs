//! Debug bundle writer for inspecting the iterations of a continuum fit.

use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::app::pipeline::RunOutput;
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::mask;
use crate::report::format_sessions;
use crate::trace::{IterSnapshot, TraceLog};

/// Write `debug/contfit_debug_<label>_<timestamp>.md` for a traced run.
pub fn write_debug_bundle(run: &RunOutput, label: &str, config: &FitConfig) -> Result<PathBuf, AppError> {
    write_debug_bundle_in(Path::new("debug"), run, label, config)
}

pub fn write_debug_bundle_in(
    dir: &Path,
    run: &RunOutput,
    label: &str,
    config: &FitConfig,
) -> Result<PathBuf, AppError> {
    create_dir_all(dir).map_err(|e| AppError::model(format!("Failed to create debug dir: {e}")))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("contfit_debug_{label}_{ts}.md"));

    let text = render_bundle(run, config);
    let mut file =
        File::create(&path).map_err(|e| AppError::model(format!("Failed to create debug file: {e}")))?;
    file.write_all(text.as_bytes())
        .map_err(|e| AppError::model(format!("Failed to write debug file: {e}")))?;

    Ok(path)
}

fn render_bundle(run: &RunOutput, config: &FitConfig) -> String {
    let mut out = String::new();
    let spec = run.spectrum();

    // Writing into a String cannot fail.
    let _ = writeln!(out, "# contfit debug bundle");
    let _ = writeln!(out, "- generated: {}", Local::now().to_rfc3339());
    let _ = writeln!(out, "- source: {}", run.ingest.source.display());
    let _ = writeln!(out, "- pixels: {} (rows read {}, skipped {})", spec.len(), run.ingest.rows_read, run.ingest.row_errors.len());
    let _ = writeln!(
        out,
        "- model: {} degree={} basis={} transform={:?}",
        run.model_name,
        config.degree,
        config.basis.display_name(),
        config.transform
    );
    let _ = writeln!(
        out,
        "- finder: {:?} sigma=({}, {}) quantile={} max_iter={} initial={:?} refit={}",
        config.finder,
        config.sigma_low,
        config.sigma_high,
        config.quantile,
        config.max_iter,
        config.initial_params,
        config.refit_on_convergence
    );
    let _ = writeln!(out, "- include: {:?}", config.include_ranges);
    let _ = writeln!(out, "- exclude: {:?}", config.exclude_ranges);

    for e in &run.ingest.row_errors {
        let _ = writeln!(out, "- skipped line {}: {}", e.line, e.message);
    }

    let _ = writeln!(out, "\n## Sessions\n```");
    out.push_str(&format_sessions(&run.sessions));
    let _ = writeln!(out, "```");

    match &run.trace {
        Some(log) => render_trace(&mut out, log),
        None => {
            let _ = writeln!(out, "\n_No iterations recorded._");
        }
    }

    out
}

fn render_trace(out: &mut String, log: &TraceLog) {
    if let Some(start) = &log.start {
        let masked = start.mask.as_deref().map_or(start.len(), mask::count);
        let _ = writeln!(out, "\n## Start\n- pixels: {} | unmasked: {masked}", start.len());
    }

    let _ = writeln!(out, "\n## Iterations");
    let _ = writeln!(out, "| id | iter | points | mean residual | rms residual |");
    let _ = writeln!(out, "| - | - | - | - | - |");
    for it in &log.iterations {
        let (n, mean, rms) = residual_stats(it);
        let _ = writeln!(out, "| {} | {} | {n} | {mean:.4e} | {rms:.4e} |", it.id, it.iter);
    }

    if let Some(finish) = &log.finish {
        let undefined = finish
            .cont
            .as_deref()
            .map_or(finish.len(), |c| c.iter().filter(|v| !v.is_finite()).count());
        let _ = writeln!(out, "\n## Finish\n- undefined continuum pixels: {undefined}");
    }
}

fn residual_stats(it: &IterSnapshot) -> (usize, f64, f64) {
    let r: Vec<f64> = it
        .y
        .iter()
        .zip(it.model.iter())
        .zip(it.mask.iter())
        .filter(|(_, m)| **m)
        .map(|((y, m), _)| y - m)
        .filter(|v| v.is_finite())
        .collect();
    if r.is_empty() {
        return (0, f64::NAN, f64::NAN);
    }
    let n = r.len() as f64;
    let mean = r.iter().sum::<f64>() / n;
    let rms = (r.iter().map(|v| v * v).sum::<f64>() / n).sqrt();
    (r.len(), mean, rms)
}
