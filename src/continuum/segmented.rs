//! Piecewise polynomial continuum split at hydrogen series limits.
//!
//! Each interval between consecutive limits gets an independent polynomial,
//! mapped onto its own wavelength range. Parameters of all segments are
//! concatenated; pixels outside every segment evaluate to `NaN`.
//!
//! The per-segment domains of the fit are kept with the parameters, so a
//! loaded model evaluates identically on a different grid.

use log::debug;
use serde_json::json;

use crate::continuum::model::{ContinuumShape, FitContext, Items, inverse_variance};
use crate::continuum::polynomial::{load_item, load_poly_items};
use crate::domain::Basis;
use crate::error::AppError;
use crate::mask::{MaskOptions, Segment, hydrogen_limits, limits_to_masks};
use crate::models::{FittableFunction, Polynomial};

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedContinuum {
    pub degree: usize,
    pub basis: Basis,
    /// Segment boundaries; `None` stands for the end of the grid.
    pub limits: Vec<Option<f64>>,
    /// Widens every segment by this much on each side when selecting pixels.
    pub buffer: f64,
    segments: Vec<Segment>,
    /// Wave interval of each segment at fit time, by segment index.
    domains: Vec<Option<(f64, f64)>>,
}

impl SegmentedContinuum {
    /// Segments between the (vacuum) hydrogen series limits.
    pub fn new(degree: usize, basis: Basis) -> Self {
        Self::with_limits(degree, basis, hydrogen_limits().into_iter().map(Some).collect())
    }

    pub fn with_limits(degree: usize, basis: Basis, limits: Vec<Option<f64>>) -> Self {
        Self {
            degree,
            basis,
            limits,
            buffer: 0.0,
            segments: Vec::new(),
            domains: Vec::new(),
        }
    }

    pub fn with_buffer(mut self, buffer: f64) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn per_segment(&self) -> usize {
        self.degree + 1
    }

    pub fn domains(&self) -> &[Option<(f64, f64)>] {
        &self.domains
    }

    fn function(&self, segment: &Segment) -> Polynomial {
        let (lo, hi) = self
            .domains
            .get(segment.index)
            .copied()
            .flatten()
            .unwrap_or(segment.range);
        Polynomial::new(self.degree, self.basis).with_domain(lo, hi)
    }
}

impl ContinuumShape for SegmentedContinuum {
    fn name(&self) -> &'static str {
        "segmented"
    }

    fn param_count(&self) -> usize {
        self.segments.len() * self.per_segment()
    }

    fn init_wave(&mut self, wave: &[f64]) -> Result<(), AppError> {
        let opts = MaskOptions::default().with_buffer(self.buffer);
        let masks = limits_to_masks(wave, &self.limits, None, &opts)?;
        self.segments = masks.segments;
        debug!(
            "segmented continuum: {} segments, point counts {:?}",
            self.segments.len(),
            self.segments.iter().map(Segment::count).collect::<Vec<_>>()
        );
        Ok(())
    }

    fn fit_impl(
        &mut self,
        ctx: &mut FitContext<'_>,
        flux: &[f64],
        flux_err: Option<&[f64]>,
        mask: Option<&[bool]>,
    ) -> Result<Vec<f64>, AppError> {
        let wave = ctx.wave();
        let base = ctx.fitting_mask(mask);
        let weights = flux_err.map(inverse_variance);

        let slots = self.segments.iter().map(|s| s.index + 1).max().unwrap_or(0);
        self.domains = vec![None; slots];
        for segment in &self.segments {
            let (lo, hi) = segment.range;
            if hi > lo {
                self.domains[segment.index] = Some((lo, hi));
            }
        }

        let mut params = Vec::with_capacity(self.param_count());
        for segment in &self.segments {
            let seg_mask: Vec<bool> = base
                .iter()
                .zip(segment.mask.iter())
                .map(|(a, b)| *a && *b)
                .collect();
            let id = format!("{}[{}]", self.name(), segment.index);
            let func = self.function(segment);
            let fit = ctx.fit_function(
                &id,
                &func,
                wave,
                flux,
                weights.as_deref(),
                None,
                Some(&seg_mask),
            )?;
            params.extend(fit.params);
        }
        Ok(params)
    }

    fn eval_impl(&self, wave: &[f64], params: &[f64]) -> Result<Vec<f64>, AppError> {
        if params.len() != self.param_count() {
            return Err(AppError::model(format!(
                "{} segments need {} parameters, got {}.",
                self.segments.len(),
                self.param_count(),
                params.len()
            )));
        }

        let mut out = vec![f64::NAN; wave.len()];
        for (segment, p) in self.segments.iter().zip(params.chunks(self.per_segment())) {
            if segment.mask.len() != wave.len() {
                return Err(AppError::model(
                    "Segments were built for a different wavelength grid.",
                ));
            }
            if p.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let (x, idx): (Vec<f64>, Vec<usize>) = wave
                .iter()
                .enumerate()
                .filter(|(i, _)| segment.mask[*i] && out[*i].is_nan())
                .map(|(i, &w)| (w, i))
                .unzip();
            for (i, v) in idx.into_iter().zip(self.function(segment).eval(&x, p)) {
                out[i] = v;
            }
        }
        Ok(out)
    }

    fn save_items(&self, items: &mut Items) {
        items.insert("segmented_degree".into(), json!(self.degree));
        items.insert("segmented_basis".into(), json!(self.basis.display_name()));
        items.insert("segmented_limits".into(), json!(self.limits));
        items.insert("segmented_buffer".into(), json!(self.buffer));
        items.insert("segmented_domains".into(), json!(self.domains));
    }

    fn load_items(&mut self, items: &Items) -> Result<(), AppError> {
        let (degree, basis) = load_poly_items(items, "segmented")?;
        if let Some(limits) = items.get("segmented_limits") {
            self.limits = serde_json::from_value(limits.clone())
                .map_err(|e| AppError::model(format!("Invalid item 'segmented_limits': {e}")))?;
        }
        if let Some(buffer) = items.get("segmented_buffer").and_then(serde_json::Value::as_f64) {
            self.buffer = buffer;
        }
        self.domains = load_item::<Vec<Option<(f64, f64)>>>(items, "segmented_domains")?.unwrap_or_default();
        self.degree = degree;
        self.basis = basis;
        self.segments.clear();
        Ok(())
    }
}
