//! Continuum model orchestration.
//!
//! `ContinuumModel` owns everything that is shared between fits of spectra on
//! the same wavelength grid (settings, mask cache, fitter, trace) and delegates
//! the actual shape of the continuum to a `ContinuumShape`.
//!
//! A fit goes through:
//! 1. bind the wave grid (masks are rebuilt when the grid or the ranges change)
//! 2. pick the flux source and apply the forward flux transform
//! 3. AND the spectrum mask (if enabled) with the caller's mask
//! 4. `ContinuumShape::fit_impl`
//!
//! and evaluation applies the reverse transform to `ContinuumShape::eval_impl`.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::domain::{Range, Spectrum};
use crate::error::AppError;
use crate::fit::{FunctionFit, IterativeFitter};
use crate::mask::{MaskCache, ranges::check_mask_len};
use crate::models::FittableFunction;
use crate::trace::ContinuumTrace;
use crate::transform::FluxTransform;

/// Values saved alongside fitted parameters (degree, basis, limits, ...).
pub type Items = BTreeMap<String, serde_json::Value>;

/// A concrete continuum shape.
pub trait ContinuumShape: Send {
    fn name(&self) -> &'static str;

    /// Number of parameters `fit_impl` returns for the bound grid.
    fn param_count(&self) -> usize;

    /// Called whenever the model binds a new wave grid.
    fn init_wave(&mut self, _wave: &[f64]) -> Result<(), AppError> {
        Ok(())
    }

    /// Fit the (transformed) flux; `mask` is the composed pixel mask.
    fn fit_impl(
        &mut self,
        ctx: &mut FitContext<'_>,
        flux: &[f64],
        flux_err: Option<&[f64]>,
        mask: Option<&[bool]>,
    ) -> Result<Vec<f64>, AppError>;

    /// Evaluate the continuum (in transformed space) over `wave`.
    fn eval_impl(&self, wave: &[f64], params: &[f64]) -> Result<Vec<f64>, AppError>;

    fn save_items(&self, _items: &mut Items) {}

    fn load_items(&mut self, _items: &Items) -> Result<(), AppError> {
        Ok(())
    }

    /// Names of parameters that may be interpolated between fits.
    fn interpolated_params(&self) -> Vec<String> {
        Vec::new()
    }
}

/// What a shape gets to work with during `fit_impl`.
pub struct FitContext<'a> {
    wave: &'a [f64],
    cache: &'a MaskCache,
    fitter: &'a mut IterativeFitter,
    trace: Option<&'a mut (dyn ContinuumTrace + 'static)>,
    fits: &'a mut Vec<FunctionFit>,
}

impl<'a> FitContext<'a> {
    pub fn wave(&self) -> &'a [f64] {
        self.wave
    }

    /// `mask & include & !exclude` over the bound grid.
    pub fn fitting_mask(&self, mask: Option<&[bool]>) -> Vec<bool> {
        self.cache
            .apply(mask)
            .unwrap_or_else(|| mask.map_or_else(|| vec![true; self.wave.len()], <[bool]>::to_vec))
    }

    /// Run the iterative fitter and record the session.
    #[allow(clippy::too_many_arguments)]
    pub fn fit_function(
        &mut self,
        id: &str,
        func: &dyn FittableFunction,
        x: &[f64],
        y: &[f64],
        w: Option<&[f64]>,
        p0: Option<&[f64]>,
        mask: Option<&[bool]>,
    ) -> Result<FunctionFit, AppError> {
        let fit = self
            .fitter
            .fit_function(id, func, x, y, w, p0, mask, self.trace.as_deref_mut())?;
        if !fit.success {
            warn!("{id}: continuum fit failed on {} candidate points", crate::mask::count(&fit.mask));
        }
        self.fits.push(fit.clone());
        Ok(fit)
    }
}

/// Model-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuumSettings {
    pub version: u32,
    /// Fit the spectrum's reference continuum instead of its flux.
    pub use_spec_continuum: bool,
    /// AND the spectrum's own mask into the fitting mask.
    pub use_spec_mask: bool,
    /// Flag bits that mask a pixel (`None`: any flag).
    pub mask_bits: Option<u32>,
    pub transform: FluxTransform,
    /// Only these ranges may provide continuum points.
    pub include_ranges: Option<Vec<Range>>,
    /// These ranges never provide continuum points.
    pub exclude_ranges: Option<Vec<Range>>,
    pub omit_overflow: bool,
}

impl Default for ContinuumSettings {
    fn default() -> Self {
        Self {
            version: 1,
            use_spec_continuum: false,
            use_spec_mask: true,
            mask_bits: None,
            transform: FluxTransform::Identity,
            include_ranges: None,
            exclude_ranges: None,
            omit_overflow: false,
        }
    }
}

pub struct ContinuumModel {
    pub settings: ContinuumSettings,
    pub fitter: IterativeFitter,
    shape: Box<dyn ContinuumShape>,
    trace: Option<Box<dyn ContinuumTrace>>,
    cache: MaskCache,
    last_fits: Vec<FunctionFit>,
}

impl std::fmt::Debug for ContinuumModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuumModel")
            .field("shape", &self.shape.name())
            .field("settings", &self.settings)
            .field("fitter", &self.fitter)
            .field("traced", &self.trace.is_some())
            .finish()
    }
}

impl ContinuumModel {
    pub fn new(shape: Box<dyn ContinuumShape>) -> Self {
        Self {
            settings: ContinuumSettings::default(),
            fitter: IterativeFitter::default(),
            shape,
            trace: None,
            cache: MaskCache::new(),
            last_fits: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: ContinuumSettings) -> Self {
        self.settings = settings;
        self.cache.clear();
        self
    }

    pub fn with_fitter(mut self, fitter: IterativeFitter) -> Self {
        self.fitter = fitter;
        self
    }

    pub fn with_trace(mut self, trace: Box<dyn ContinuumTrace>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn name(&self) -> &'static str {
        self.shape.name()
    }

    pub fn param_count(&self) -> usize {
        self.shape.param_count()
    }

    pub fn interpolated_params(&self) -> Vec<String> {
        self.shape.interpolated_params()
    }

    /// The bound wave grid, if any.
    pub fn wave(&self) -> Option<&[f64]> {
        self.cache.wave()
    }

    pub fn include_overflow(&self) -> &[usize] {
        self.cache.include().map_or(&[], |m| m.overflow.as_slice())
    }

    pub fn exclude_overflow(&self) -> &[usize] {
        self.cache.exclude().map_or(&[], |m| m.overflow.as_slice())
    }

    /// Fit sessions of the most recent `fit`.
    pub fn last_fits(&self) -> &[FunctionFit] {
        &self.last_fits
    }

    /// Bind a wave grid; masks and shape state are rebuilt when the grid or
    /// the range settings differ from the bound ones, or `force` is set.
    pub fn init_wave(&mut self, wave: &[f64], force: bool) -> Result<bool, AppError> {
        let rebuilt = self.cache.bind(
            wave,
            self.settings.include_ranges.as_deref(),
            self.settings.exclude_ranges.as_deref(),
            self.settings.omit_overflow,
            force,
        )?;
        if rebuilt {
            self.shape.init_wave(wave)?;
        }
        Ok(rebuilt)
    }

    /// Fit the continuum of `spec`. `mask` is AND-ed with the spectrum mask.
    pub fn fit(&mut self, spec: &Spectrum, mask: Option<&[bool]>) -> Result<Vec<f64>, AppError> {
        let n = spec.wave.len();
        if spec.flux.len() != n {
            return Err(AppError::input(format!(
                "Spectrum has {n} wavelengths but {} flux values.",
                spec.flux.len()
            )));
        }
        if let Some(err) = &spec.flux_err {
            if err.len() != n {
                return Err(AppError::input(format!(
                    "Spectrum has {n} wavelengths but {} flux errors.",
                    err.len()
                )));
            }
        }
        check_mask_len(mask, n, "Fit mask")?;

        self.init_wave(&spec.wave, false)?;

        let (source, source_err) = if self.settings.use_spec_continuum {
            let Some(cont) = spec.cont.as_deref() else {
                return Err(AppError::input(
                    "Fitting the reference continuum was requested but the spectrum has none.",
                ));
            };
            if cont.len() != n {
                return Err(AppError::input("Reference continuum length differs from the wave grid."));
            }
            (cont, None)
        } else {
            (spec.flux.as_slice(), spec.flux_err.as_deref())
        };

        let (flux, flux_err) = self.settings.transform.forward(source, source_err);

        let mut m = if self.settings.use_spec_mask {
            spec.mask_as_bool(self.settings.mask_bits)
        } else {
            None
        };
        check_mask_len(m.as_deref(), n, "Spectrum mask")?;
        if let Some(mask) = mask {
            m = Some(match m {
                Some(sm) => sm.iter().zip(mask.iter()).map(|(a, b)| *a && *b).collect(),
                None => mask.to_vec(),
            });
        }

        if let Some(trace) = self.trace.as_deref_mut() {
            trace.on_fit_start(&Spectrum {
                wave: spec.wave.clone(),
                flux: flux.clone(),
                flux_err: flux_err.clone(),
                cont: None,
                mask: m.clone(),
                mask_flags: spec.mask_flags.clone(),
            });
        }

        self.last_fits.clear();
        let params = {
            let Some(wave) = self.cache.wave() else {
                return Err(AppError::model("No wavelength grid bound to the continuum model."));
            };
            let mut ctx = FitContext {
                wave,
                cache: &self.cache,
                fitter: &mut self.fitter,
                trace: self.trace.as_deref_mut(),
                fits: &mut self.last_fits,
            };
            self.shape.fit_impl(&mut ctx, &flux, flux_err.as_deref(), m.as_deref())?
        };

        if params.len() != self.shape.param_count() {
            return Err(AppError::model(format!(
                "{} returned {} parameters, expected {}.",
                self.shape.name(),
                params.len(),
                self.shape.param_count()
            )));
        }

        let undefined = params.iter().filter(|p| !p.is_finite()).count();
        info!(
            "{} continuum: {} parameters ({undefined} undefined) from {} fit session(s)",
            self.shape.name(),
            params.len(),
            self.last_fits.len()
        );

        if self.trace.is_some() {
            let (_, cont) = self.eval(&params)?;
            if let Some(trace) = self.trace.as_deref_mut() {
                trace.on_fit_finish(&Spectrum {
                    wave: spec.wave.clone(),
                    flux: source.to_vec(),
                    flux_err: source_err.map(<[f64]>::to_vec),
                    cont: Some(cont),
                    mask: m,
                    mask_flags: spec.mask_flags.clone(),
                });
            }
        }

        Ok(params)
    }

    /// Evaluate the continuum over the bound grid, in linear flux.
    pub fn eval(&self, params: &[f64]) -> Result<(Vec<f64>, Vec<f64>), AppError> {
        let Some(wave) = self.cache.wave() else {
            return Err(AppError::model(
                "Cannot evaluate the continuum: no wavelength grid bound.",
            ));
        };
        if params.len() != self.shape.param_count() {
            return Err(AppError::model(format!(
                "{} expects {} parameters, got {}.",
                self.shape.name(),
                self.shape.param_count(),
                params.len()
            )));
        }
        let fitted = self.shape.eval_impl(wave, params)?;
        let (flux, _) = self.settings.transform.reverse(&fitted, None);
        Ok((wave.to_vec(), flux))
    }

    /// Divide flux and flux error by the continuum.
    pub fn normalize(&self, spec: &Spectrum, params: &[f64]) -> Result<Spectrum, AppError> {
        self.rescale(spec, params, |v, c| v / c)
    }

    /// Multiply flux and flux error by the continuum.
    pub fn denormalize(&self, spec: &Spectrum, params: &[f64]) -> Result<Spectrum, AppError> {
        self.rescale(spec, params, |v, c| v * c)
    }

    fn rescale(
        &self,
        spec: &Spectrum,
        params: &[f64],
        op: impl Fn(f64, f64) -> f64,
    ) -> Result<Spectrum, AppError> {
        if !self.cache.is_bound_to(&spec.wave) {
            return Err(AppError::input(
                "Spectrum is not on the wavelength grid the continuum was fitted on.",
            ));
        }
        let (_, cont) = self.eval(params)?;
        let apply = |values: &[f64]| -> Vec<f64> {
            values.iter().zip(cont.iter()).map(|(&v, &c)| op(v, c)).collect()
        };
        Ok(Spectrum {
            wave: spec.wave.clone(),
            flux: apply(&spec.flux),
            flux_err: spec.flux_err.as_deref().map(apply),
            cont: None,
            mask: spec.mask.clone(),
            mask_flags: spec.mask_flags.clone(),
        })
    }

    fn version_key(&self) -> String {
        format!("{}_version", self.shape.name())
    }

    /// Constants stored alongside fitted parameters.
    pub fn get_constants(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([(self.version_key(), f64::from(self.settings.version))])
    }

    pub fn set_constants(&mut self, constants: &BTreeMap<String, f64>) -> Result<(), AppError> {
        let key = self.version_key();
        let Some(&version) = constants.get(&key) else {
            return Err(AppError::model(format!("Missing model constant '{key}'.")));
        };
        if !(version.is_finite() && version >= 0.0) {
            return Err(AppError::model(format!("Invalid model constant {key}={version}.")));
        }
        self.settings.version = version as u32;
        debug!("{key} set to {}", self.settings.version);
        Ok(())
    }

    /// Look up a constant, falling back to `default` when absent or `NaN`.
    pub fn set_constant(name: &str, constants: &BTreeMap<String, f64>, default: f64) -> f64 {
        match constants.get(name) {
            Some(v) if !v.is_nan() => *v,
            _ => default,
        }
    }

    pub fn save_items(&self) -> Items {
        let mut items = Items::new();
        self.shape.save_items(&mut items);
        items
    }

    /// Restore shape items; shape state is rebuilt for the bound grid.
    pub fn load_items(&mut self, items: &Items) -> Result<(), AppError> {
        self.shape.load_items(items)?;
        if let Some(wave) = self.cache.wave() {
            let wave = wave.to_vec();
            self.shape.init_wave(&wave)?;
        }
        Ok(())
    }
}

/// Inverse-variance weights from flux errors; unusable errors get weight 0.
pub fn inverse_variance(flux_err: &[f64]) -> Vec<f64> {
    flux_err
        .iter()
        .map(|&s| if s.is_finite() && s > 0.0 { 1.0 / (s * s) } else { 0.0 })
        .collect()
}
