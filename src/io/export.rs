//! Export per-pixel results to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream
//! scripts; undefined values are written as empty fields.

use std::path::Path;

use serde::Serialize;

use crate::domain::Spectrum;
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct ResultRow {
    wave: f64,
    flux: Option<f64>,
    flux_err: Option<f64>,
    continuum: Option<f64>,
    normalized: Option<f64>,
    mask: u8,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// Write `wave,flux,flux_err,continuum,normalized,mask` rows.
///
/// `mask` marks the pixels the continuum was finally fitted on.
pub fn write_results_csv(
    path: &Path,
    spec: &Spectrum,
    continuum: &[f64],
    mask: &[bool],
) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::input(format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_rows(&mut writer, spec, continuum, mask)?;
    writer
        .flush()
        .map_err(|e| AppError::input(format!("Failed to write export CSV '{}': {e}", path.display())))
}

fn write_rows<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    spec: &Spectrum,
    continuum: &[f64],
    mask: &[bool],
) -> Result<(), AppError> {
    if continuum.len() != spec.len() || mask.len() != spec.len() {
        return Err(AppError::model(format!(
            "Export needs {} continuum and mask values, got {} and {}.",
            spec.len(),
            continuum.len(),
            mask.len()
        )));
    }

    for i in 0..spec.len() {
        let flux = spec.flux[i];
        let cont = continuum[i];
        let row = ResultRow {
            wave: spec.wave[i],
            flux: finite(flux),
            flux_err: spec.flux_err.as_ref().and_then(|e| finite(e[i])),
            continuum: finite(cont),
            normalized: finite(flux / cont),
            mask: u8::from(mask[i]),
        };
        writer
            .serialize(row)
            .map_err(|e| AppError::input(format!("Failed to write export CSV row: {e}")))?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SpectrumRow {
    wave: f64,
    flux: f64,
    flux_err: Option<f64>,
    cont: Option<f64>,
}

/// Write a spectrum as `wave,flux,flux_err,cont` (readable by `load_spectrum`).
pub fn write_spectrum_csv(path: &Path, spec: &Spectrum) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::input(format!("Failed to create spectrum CSV '{}': {e}", path.display())))?;
    for i in 0..spec.len() {
        let row = SpectrumRow {
            wave: spec.wave[i],
            flux: spec.flux[i],
            flux_err: spec.flux_err.as_ref().and_then(|e| e.get(i).copied()),
            cont: spec.cont.as_ref().and_then(|c| c.get(i).copied()),
        };
        writer
            .serialize(row)
            .map_err(|e| AppError::input(format!("Failed to write spectrum CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::input(format!("Failed to write spectrum CSV '{}': {e}", path.display())))
}
