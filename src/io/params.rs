//! Read/write continuum parameter files.
//!
//! A parameter file is the portable representation of a fitted continuum:
//! - model name, constants and shape items (enough to rebuild the model)
//! - flux transform and parameters (`null` where undefined)
//! - the continuum evaluated over the fitted grid
//!
//! The schema is defined by `domain::ContinuumFile`.

use std::fs::File;
use std::path::Path;

use chrono::Local;

use crate::continuum::{ContinuumModel, ContinuumSettings, shape_from_name};
use crate::domain::{ContinuumFile, ContinuumGrid};
use crate::error::AppError;

/// Snapshot a fitted model into a `ContinuumFile`.
pub fn continuum_file(
    model: &ContinuumModel,
    params: &[f64],
    source: Option<&str>,
) -> Result<ContinuumFile, AppError> {
    let (wave, cont) = model.eval(params)?;
    let wave_min = wave.first().copied().unwrap_or(f64::NAN);
    let wave_max = wave.last().copied().unwrap_or(f64::NAN);
    Ok(ContinuumFile {
        tool: "contfit".to_string(),
        generated: Local::now(),
        source: source.map(str::to_string),
        model: model.name().to_string(),
        transform: model.settings.transform,
        constants: model.get_constants(),
        items: model.save_items(),
        params: params.iter().map(|p| p.is_finite().then_some(*p)).collect(),
        wave_min,
        wave_max,
        grid: ContinuumGrid {
            wave,
            continuum: cont.iter().map(|c| c.is_finite().then_some(*c)).collect(),
        },
    })
}

/// Rebuild an (unbound) model and its parameters from a parameter file.
pub fn model_from_file(file: &ContinuumFile) -> Result<(ContinuumModel, Vec<f64>), AppError> {
    let shape = shape_from_name(&file.model, &file.items)?;
    let settings = ContinuumSettings {
        transform: file.transform,
        ..ContinuumSettings::default()
    };
    let mut model = ContinuumModel::new(shape).with_settings(settings);
    model.set_constants(&file.constants)?;
    let params = file.params.iter().map(|p| p.unwrap_or(f64::NAN)).collect();
    Ok((model, params))
}

/// Write a parameter JSON file.
pub fn write_params_json(path: &Path, file: &ContinuumFile) -> Result<(), AppError> {
    let out = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create parameter JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(out, file)
        .map_err(|e| AppError::input(format!("Failed to write parameter JSON: {e}")))?;
    Ok(())
}

/// Read a parameter JSON file.
pub fn read_params_json(path: &Path) -> Result<ContinuumFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open parameter JSON '{}': {e}", path.display())))?;
    let parsed: ContinuumFile = serde_json::from_reader(file)
        .map_err(|e| AppError::input(format!("Invalid parameter JSON '{}': {e}", path.display())))?;
    Ok(parsed)
}
