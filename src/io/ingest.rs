//! Spectrum CSV ingest.
//!
//! Turns a CSV with (at least) `wave` and `flux` columns into a `Spectrum`.
//!
//! - **Strict schema** for required columns (exit code 2)
//! - **Row-level validation**: rows with unparsable wave/flux are skipped and
//!   reported, optional columns fall back to `NaN` / unmasked
//! - no fitting logic here

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use log::warn;

use crate::domain::Spectrum;
use crate::error::AppError;

const WAVE_COLUMNS: [&str; 3] = ["wave", "wavelength", "lambda"];
const FLUX_COLUMNS: [&str; 1] = ["flux"];
const ERR_COLUMNS: [&str; 4] = ["flux_err", "err", "error", "sigma"];
const CONT_COLUMNS: [&str; 2] = ["cont", "continuum"];
const MASK_COLUMNS: [&str; 1] = ["mask"];
const FLAG_COLUMNS: [&str; 2] = ["mask_flags", "flags"];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: the spectrum plus what happened on the way.
#[derive(Debug, Clone)]
pub struct IngestedSpectrum {
    pub source: PathBuf,
    pub spectrum: Spectrum,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

impl IngestedSpectrum {
    /// File stem, used to label results.
    pub fn label(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Column indices resolved from the header row.
#[derive(Debug, Clone, Copy)]
struct Columns {
    wave: usize,
    flux: usize,
    flux_err: Option<usize>,
    cont: Option<usize>,
    mask: Option<usize>,
    flags: Option<usize>,
}

/// Load a spectrum CSV.
pub fn load_spectrum(path: &Path) -> Result<IngestedSpectrum, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_spectrum(file, path)
}

/// Parse a spectrum CSV from any reader; `source` labels errors.
pub fn read_spectrum<R: std::io::Read>(reader: R, source: &Path) -> Result<IngestedSpectrum, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers of '{}': {e}", source.display())))?
        .clone();
    let header_map = build_header_map(&headers);
    let cols = resolve_columns(&header_map)?;

    let mut spec = Spectrum {
        flux_err: cols.flux_err.map(|_| Vec::new()),
        cont: cols.cont.map(|_| Vec::new()),
        mask: cols.mask.map(|_| Vec::new()),
        mask_flags: cols.flags.map(|_| Vec::new()),
        ..Spectrum::default()
    };
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &cols) {
            Ok(row) => {
                spec.wave.push(row.wave);
                spec.flux.push(row.flux);
                if let Some(v) = spec.flux_err.as_mut() {
                    v.push(row.flux_err);
                }
                if let Some(v) = spec.cont.as_mut() {
                    v.push(row.cont);
                }
                if let Some(v) = spec.mask.as_mut() {
                    v.push(row.mask);
                }
                if let Some(v) = spec.mask_flags.as_mut() {
                    v.push(row.flags);
                }
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        warn!(
            "{}: skipped {} of {rows_read} rows (first: line {}: {})",
            source.display(),
            row_errors.len(),
            row_errors[0].line,
            row_errors[0].message
        );
    }

    if spec.is_empty() {
        return Err(AppError::new(
            3,
            format!("No valid rows in '{}'.", source.display()),
        ));
    }

    Ok(IngestedSpectrum {
        source: source.to_path_buf(),
        spectrum: spec,
        row_errors,
        rows_read,
    })
}

struct Row {
    wave: f64,
    flux: f64,
    flux_err: f64,
    cont: f64,
    mask: bool,
    flags: u32,
}

fn parse_row(record: &StringRecord, cols: &Columns) -> Result<Row, String> {
    let wave = parse_required(record, cols.wave, "wave")?;
    if !wave.is_finite() {
        return Err(format!("Non-finite wavelength {wave}."));
    }
    // Non-finite flux is kept; the fitter never uses it.
    let flux = parse_required(record, cols.flux, "flux")?;

    let flux_err = parse_optional(record, cols.flux_err, "flux_err")?.unwrap_or(f64::NAN);
    let cont = parse_optional(record, cols.cont, "cont")?.unwrap_or(f64::NAN);
    let mask = match get_field(record, cols.mask) {
        Some(s) => parse_bool(s)?,
        None => true,
    };
    let flags = match get_field(record, cols.flags) {
        Some(s) => s
            .parse::<u32>()
            .map_err(|_| format!("Invalid mask flags '{s}'."))?,
        None => 0,
    };

    Ok(Row {
        wave,
        flux,
        flux_err,
        cont,
        mask,
        flags,
    })
}

fn resolve_columns(header_map: &HashMap<String, usize>) -> Result<Columns, AppError> {
    let find = |names: &[&str]| names.iter().find_map(|n| header_map.get(*n).copied());
    let wave = find(&WAVE_COLUMNS).ok_or_else(|| {
        AppError::input("Missing required column: `wave` (or `wavelength`, `lambda`)")
    })?;
    let flux = find(&FLUX_COLUMNS).ok_or_else(|| AppError::input("Missing required column: `flux`"))?;
    Ok(Columns {
        wave,
        flux,
        flux_err: find(&ERR_COLUMNS),
        cont: find(&CONT_COLUMNS),
        mask: find(&MASK_COLUMNS),
        flags: find(&FLAG_COLUMNS),
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn get_field(record: &StringRecord, idx: Option<usize>) -> Option<&str> {
    record.get(idx?).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_required(record: &StringRecord, idx: usize, name: &str) -> Result<f64, String> {
    let s = get_field(record, Some(idx)).ok_or_else(|| format!("Missing required value: `{name}`"))?;
    parse_f64(s, name)
}

fn parse_optional(record: &StringRecord, idx: Option<usize>, name: &str) -> Result<Option<f64>, String> {
    get_field(record, idx).map(|s| parse_f64(s, name)).transpose()
}

fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    s.parse::<f64>()
        .map_err(|_| format!("Invalid `{name}` value '{s}'."))
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Ok(true),
        "0" | "false" | "f" | "no" | "n" => Ok(false),
        _ => Err(format!("Invalid mask value '{s}' (expected 0/1 or true/false).")),
    }
}
