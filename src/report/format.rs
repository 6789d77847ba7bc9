//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use crate::app::pipeline::RunOutput;
use crate::domain::{ContinuumFile, FitConfig, Spectrum};
use crate::fit::FunctionFit;
use crate::report::continuum_quality;

/// Format the summary of one fitted spectrum.
pub fn format_run_summary(run: &RunOutput, config: &FitConfig) -> String {
    let mut out = String::new();
    let spec = run.spectrum();

    out.push_str(&format!("=== contfit - {} ===\n", run.label()));
    out.push_str(&format!("Source: {}\n", run.ingest.source.display()));
    out.push_str(&format!(
        "Pixels: n={} | wave=[{:.3}, {:.3}] | rows skipped={}\n",
        spec.len(),
        spec.wave.first().copied().unwrap_or(f64::NAN),
        spec.wave.last().copied().unwrap_or(f64::NAN),
        run.ingest.row_errors.len()
    ));
    out.push_str(&format!(
        "Model: {} (degree={}, basis={}, transform={:?})\n",
        run.model_name,
        config.degree,
        config.basis.display_name(),
        config.transform
    ));
    out.push_str(&format!(
        "Finder: {:?} | max_iter={} | initial={:?} | refit={}\n",
        config.finder, config.max_iter, config.initial_params, config.refit_on_convergence
    ));

    if !run.include_overflow.is_empty() {
        out.push_str(&format!("Include ranges past the grid: {:?}\n", run.include_overflow));
    }
    if !run.exclude_overflow.is_empty() {
        out.push_str(&format!("Exclude ranges past the grid: {:?}\n", run.exclude_overflow));
    }

    out.push_str("\nFit sessions:\n");
    out.push_str(&format_sessions(&run.sessions));

    let q = continuum_quality(&spec.flux, &run.continuum, &run.fit_mask);
    out.push_str(&format!(
        "\nContinuum points: n={} | normalized mean={:.5} rms={:.5} | undefined pixels={}\n",
        q.n, q.mean, q.rms, q.undefined
    ));
    out.push_str(&format!("Params: {}\n", fmt_vec(&run.params)));

    out
}

/// Format a per-session table.
pub fn format_sessions(sessions: &[FunctionFit]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<16} {:>7} {:>6} {:>9} {:>8}\n",
            "id", "status", "iters", "fit_calls", "points"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<16} {:-<7} {:-<6} {:-<9} {:-<8}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    for s in sessions {
        out.push_str(
            format!(
                "{:<16} {:>7} {:>6} {:>9} {:>8}\n",
                truncate(&s.id, 16),
                if s.success { "ok" } else { "failed" },
                s.iterations,
                s.fit_calls,
                s.point_count()
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Format the result of evaluating a saved continuum.
pub fn format_eval_summary(file: &ContinuumFile, spec: &Spectrum, continuum: &[f64]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "=== contfit eval - {} ===\n",
        file.source.as_deref().unwrap_or(&file.model)
    ));
    out.push_str(&format!(
        "Model: {} | fitted on [{:.3}, {:.3}] | generated {}\n",
        file.model,
        file.wave_min,
        file.wave_max,
        file.generated.format("%Y-%m-%d %H:%M:%S")
    ));
    let outside = spec
        .wave
        .iter()
        .filter(|w| **w < file.wave_min || **w > file.wave_max)
        .count();
    if outside > 0 {
        out.push_str(&format!("Warning: {outside} pixels lie outside the fitted range\n"));
    }
    let all = vec![true; spec.len()];
    let q = continuum_quality(&spec.flux, continuum, &all);
    out.push_str(&format!(
        "Pixels: n={} | normalized mean={:.5} | undefined continuum={}\n",
        spec.len(),
        q.mean,
        q.undefined
    ));
    out
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6e}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
