//! Diagnostic hooks called during continuum fitting.
//!
//! Traces observe; they never change what gets fitted. Two implementations
//! ship with the crate:
//!
//! - `LogTrace` writes one `debug!` line per event
//! - `RecordingTrace` keeps snapshots in memory (debug bundles, tests)

use std::sync::{Arc, Mutex};

use log::debug;

use crate::domain::Spectrum;
use crate::mask;

/// Callbacks of the continuum model and the iterative fitter.
pub trait ContinuumTrace: Send {
    /// Called with the (transformed) flux and mask before fitting.
    fn on_fit_start(&mut self, _spectrum: &Spectrum) {}

    /// Called after every fit round of the iterative fitter.
    #[allow(clippy::too_many_arguments)]
    fn on_fit_function_iter(
        &mut self,
        _id: &str,
        _iter: usize,
        _x: &[f64],
        _y: &[f64],
        _w: Option<&[f64]>,
        _model: &[f64],
        _mask: &[bool],
    ) {
    }

    /// Called with the evaluated continuum (in `cont`) after fitting.
    fn on_fit_finish(&mut self, _spectrum: &Spectrum) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogTrace;

impl ContinuumTrace for LogTrace {
    fn on_fit_start(&mut self, spectrum: &Spectrum) {
        debug!(
            "continuum fit start: {} pixels, {} unmasked",
            spectrum.len(),
            spectrum.mask.as_deref().map_or(spectrum.len(), mask::count)
        );
    }

    fn on_fit_function_iter(
        &mut self,
        id: &str,
        iter: usize,
        _x: &[f64],
        y: &[f64],
        _w: Option<&[f64]>,
        model: &[f64],
        mask: &[bool],
    ) {
        let (sum, n) = y
            .iter()
            .zip(model.iter())
            .zip(mask.iter())
            .filter(|(_, m)| **m)
            .map(|((a, b), _)| (a - b) * (a - b))
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        let rms = if n > 0 { (sum / n as f64).sqrt() } else { f64::NAN };
        debug!("{id} iter {iter}: {n} points, rms {rms:.4e}");
    }

    fn on_fit_finish(&mut self, spectrum: &Spectrum) {
        let nan = spectrum
            .cont
            .as_deref()
            .map_or(0, |c| c.iter().filter(|v| !v.is_finite()).count());
        debug!("continuum fit finish: {nan} undefined continuum pixels");
    }
}

/// Snapshot of one fit round.
#[derive(Debug, Clone, PartialEq)]
pub struct IterSnapshot {
    pub id: String,
    pub iter: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub model: Vec<f64>,
    pub mask: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceLog {
    pub start: Option<Spectrum>,
    pub iterations: Vec<IterSnapshot>,
    pub finish: Option<Spectrum>,
}

/// Records snapshots into a log shared between clones.
///
/// Hand one clone to the model and keep the other to read the log back.
#[derive(Debug, Clone, Default)]
pub struct RecordingTrace {
    log: Arc<Mutex<TraceLog>>,
}

impl RecordingTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> TraceLog {
        match self.log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_log(&self, f: impl FnOnce(&mut TraceLog)) {
        match self.log.lock() {
            Ok(mut log) => f(&mut log),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl ContinuumTrace for RecordingTrace {
    fn on_fit_start(&mut self, spectrum: &Spectrum) {
        self.with_log(|log| {
            *log = TraceLog {
                start: Some(spectrum.clone()),
                ..TraceLog::default()
            };
        });
    }

    fn on_fit_function_iter(
        &mut self,
        id: &str,
        iter: usize,
        x: &[f64],
        y: &[f64],
        _w: Option<&[f64]>,
        model: &[f64],
        mask: &[bool],
    ) {
        self.with_log(|log| {
            log.iterations.push(IterSnapshot {
                id: id.to_string(),
                iter,
                x: x.to_vec(),
                y: y.to_vec(),
                model: model.to_vec(),
                mask: mask.to_vec(),
            });
        });
    }

    fn on_fit_finish(&mut self, spectrum: &Spectrum) {
        self.with_log(|log| log.finish = Some(spectrum.clone()));
    }
}
