//! Continuum models.
//!
//! - `model`: shared orchestration (`ContinuumModel`, `ContinuumShape`)
//! - `polynomial`: one polynomial over the whole grid
//! - `segmented`: one polynomial per hydrogen-limit interval

pub mod model;
pub mod polynomial;
pub mod segmented;

pub use model::*;
pub use polynomial::*;
pub use segmented::*;

use crate::domain::{Basis, FitConfig, ShapeKind};
use crate::error::AppError;
use crate::finders::finder_from_config;
use crate::fit::IterativeFitter;

/// Build an unfitted shape of the given kind.
pub fn shape_for(kind: ShapeKind, degree: usize, basis: Basis, segment_buffer: f64) -> Box<dyn ContinuumShape> {
    match kind {
        ShapeKind::Polynomial => Box::new(PolynomialContinuum::new(degree, basis)),
        ShapeKind::Segmented => Box::new(SegmentedContinuum::new(degree, basis).with_buffer(segment_buffer)),
    }
}

/// Build a shape from the name stored in a parameter file.
pub fn shape_from_name(name: &str, items: &Items) -> Result<Box<dyn ContinuumShape>, AppError> {
    let mut shape: Box<dyn ContinuumShape> = match name {
        "polynomial" => Box::new(PolynomialContinuum::new(0, Basis::Legendre)),
        "segmented" => Box::new(SegmentedContinuum::new(0, Basis::Legendre)),
        other => return Err(AppError::model(format!("Unknown continuum model '{other}'."))),
    };
    shape.load_items(items)?;
    Ok(shape)
}

/// Settings, fitter and shape of a `fit` run.
pub fn model_from_config(config: &FitConfig) -> ContinuumModel {
    let settings = ContinuumSettings {
        use_spec_continuum: config.use_spec_continuum,
        use_spec_mask: config.use_spec_mask,
        mask_bits: config.mask_bits,
        transform: config.transform,
        include_ranges: (!config.include_ranges.is_empty()).then(|| config.include_ranges.clone()),
        exclude_ranges: (!config.exclude_ranges.is_empty()).then(|| config.exclude_ranges.clone()),
        omit_overflow: config.omit_overflow,
        ..ContinuumSettings::default()
    };

    let mut fitter = IterativeFitter::new(config.max_iter);
    fitter.initial_params = config.initial_params;
    fitter.refit_on_convergence = config.refit_on_convergence;
    fitter.set_finder(finder_from_config(config));

    ContinuumModel::new(shape_for(config.shape, config.degree, config.basis, config.segment_buffer))
        .with_settings(settings)
        .with_fitter(fitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FinderKind, InitialParams, Range, Spectrum};
    use crate::transform::FluxTransform;

    fn config() -> FitConfig {
        FitConfig {
            inputs: Vec::new(),
            shape: ShapeKind::Polynomial,
            basis: Basis::Legendre,
            degree: 2,
            finder: FinderKind::SigmaClip,
            sigma_low: 2.0,
            sigma_high: 3.0,
            quantile: 0.5,
            max_iter: 10,
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
            debug_bundle: false,
        }
    }

    fn absorbed_spectrum() -> Spectrum {
        let wave: Vec<f64> = (0..200).map(|i| 5000.0 + 5.0 * i as f64).collect();
        let flux = wave
            .iter()
            .map(|&w| {
                let cont = 2.0 + 3e-4 * (w - 5000.0);
                let line = 0.8 * (-0.5 * ((w - 5400.0) / 8.0).powi(2)).exp();
                cont * (1.0 - line)
            })
            .collect();
        Spectrum {
            wave,
            flux,
            ..Default::default()
        }
    }

    #[test]
    fn sigma_clipping_ignores_an_absorption_line() {
        let spec = absorbed_spectrum();
        let mut model = model_from_config(&config());
        let params = model.fit(&spec, None).unwrap();
        let (wave, cont) = model.eval(&params).unwrap();
        for (w, c) in wave.iter().zip(cont.iter()) {
            let truth = 2.0 + 3e-4 * (w - 5000.0);
            assert!((c - truth).abs() < 1e-3, "{w}: {c} vs {truth}");
        }
        let fit = &model.last_fits()[0];
        assert!(fit.success);
        assert!(fit.iterations >= 1);
        assert!(fit.point_count() < spec.len());
    }

    #[test]
    fn exclude_range_alone_also_recovers_the_continuum() {
        let spec = absorbed_spectrum();
        let mut cfg = config();
        cfg.finder = FinderKind::None;
        cfg.exclude_ranges = vec![Range::new(5340.0, 5460.0)];
        let mut model = model_from_config(&cfg);
        let params = model.fit(&spec, None).unwrap();
        let (_, cont) = model.eval(&params).unwrap();
        assert!((cont[0] - 2.0).abs() < 1e-6);
        assert_eq!(model.last_fits()[0].fit_calls, 1);
    }

    #[test]
    fn finder_never_uses_ranged_out_or_flagged_pixels() {
        let mut spec = absorbed_spectrum();
        let mut flags = vec![0u32; spec.len()];
        flags[50] = 1;
        spec.mask_flags = Some(flags);

        let mut cfg = config();
        cfg.include_ranges = vec![Range::new(5000.0, 5600.0)];
        cfg.exclude_ranges = vec![Range::new(5100.0, 5200.0)];
        let mut model = model_from_config(&cfg);
        model.fit(&spec, None).unwrap();

        let fit = &model.last_fits()[0];
        assert!(fit.success);
        assert!(!fit.mask[50]);
        for (w, m) in spec.wave.iter().zip(fit.mask.iter()) {
            if *m {
                assert!((5000.0..=5600.0).contains(w), "{w} is outside the include range");
                assert!(!(5100.0..=5200.0).contains(w), "{w} is inside the exclude range");
            }
        }
    }

    #[test]
    fn changed_ranges_take_effect_on_the_same_grid() {
        let spec = absorbed_spectrum();
        let mut cfg = config();
        cfg.finder = FinderKind::None;
        let mut model = model_from_config(&cfg);
        model.fit(&spec, None).unwrap();
        assert_eq!(model.last_fits()[0].point_count(), spec.len());

        model.settings.exclude_ranges = Some(vec![Range::new(5000.0, 5495.0)]);
        model.fit(&spec, None).unwrap();
        assert_eq!(model.last_fits()[0].point_count(), spec.len() - 100);
    }

    #[test]
    fn log_transform_round_trips_through_eval() {
        let spec = absorbed_spectrum();
        let mut cfg = config();
        cfg.transform = FluxTransform::Log;
        let mut model = model_from_config(&cfg);
        let params = model.fit(&spec, None).unwrap();
        let (_, cont) = model.eval(&params).unwrap();
        // A quadratic in log flux is close to, but not exactly, the linear continuum.
        assert!((cont[0] - 2.0).abs() < 1e-2, "{}", cont[0]);
        assert!(cont.iter().all(|c| *c > 0.0));
    }

    #[test]
    fn normalize_then_denormalize_restores_flux() {
        let spec = absorbed_spectrum();
        let mut model = model_from_config(&config());
        let params = model.fit(&spec, None).unwrap();
        let norm = model.normalize(&spec, &params).unwrap();
        assert!((norm.flux[0] - 1.0).abs() < 1e-3);
        let back = model.denormalize(&norm, &params).unwrap();
        for (a, b) in back.flux.iter().zip(spec.flux.iter()) {
            assert!((a - b).abs() < 1e-9);
        }

        let mut other = spec.clone();
        other.wave[0] -= 1.0;
        assert!(model.normalize(&other, &params).is_err());
    }

    #[test]
    fn spectrum_mask_and_caller_mask_are_combined() {
        let mut spec = absorbed_spectrum();
        let n = spec.len();
        spec.mask = Some((0..n).map(|i| i < n / 2).collect());
        let caller: Vec<bool> = (0..n).map(|i| i >= n / 4).collect();

        let mut cfg = config();
        cfg.finder = FinderKind::None;
        let mut model = model_from_config(&cfg);
        model.fit(&spec, Some(&caller)).unwrap();
        assert_eq!(model.last_fits()[0].point_count(), n / 2 - n / 4);

        model.settings.use_spec_mask = false;
        model.fit(&spec, Some(&caller)).unwrap();
        assert_eq!(model.last_fits()[0].point_count(), n - n / 4);
    }

    #[test]
    fn reference_continuum_is_required_when_requested() {
        let mut spec = absorbed_spectrum();
        let mut cfg = config();
        cfg.use_spec_continuum = true;
        let mut model = model_from_config(&cfg);
        assert_eq!(model.fit(&spec, None).unwrap_err().exit_code(), 2);

        spec.cont = Some(vec![3.0; spec.len()]);
        let params = model.fit(&spec, None).unwrap();
        let (_, cont) = model.eval(&params).unwrap();
        assert!(cont.iter().all(|c| (c - 3.0).abs() < 1e-9));
    }

    #[test]
    fn eval_before_fit_is_a_model_error() {
        let model = model_from_config(&config());
        assert_eq!(model.eval(&[1.0, 0.0, 0.0]).unwrap_err().exit_code(), 4);
    }

    #[test]
    fn constants_carry_the_versioned_key() {
        let mut model = model_from_config(&config());
        let constants = model.get_constants();
        assert_eq!(constants.get("polynomial_version"), Some(&1.0));

        let mut changed = constants.clone();
        changed.insert("polynomial_version".into(), 3.0);
        model.set_constants(&changed).unwrap();
        assert_eq!(model.settings.version, 3);

        assert!(model.set_constants(&Default::default()).is_err());
        assert_eq!(ContinuumModel::set_constant("missing", &constants, 7.0), 7.0);
        assert_eq!(ContinuumModel::set_constant("polynomial_version", &constants, 7.0), 1.0);
    }

    #[test]
    fn shape_from_name_restores_saved_items() {
        let model = model_from_config(&config());
        let items = model.save_items();
        let shape = shape_from_name(model.name(), &items).unwrap();
        assert_eq!(shape.param_count(), 3);
        assert!(model.interpolated_params().is_empty());
        assert!(shape_from_name("spline", &items).is_err());
    }

    #[test]
    fn recording_trace_sees_every_round() {
        use crate::trace::RecordingTrace;

        let spec = absorbed_spectrum();
        let trace = RecordingTrace::new();
        let mut model = model_from_config(&config()).with_trace(Box::new(trace.clone()));
        model.fit(&spec, None).unwrap();

        let log = trace.snapshot();
        assert!(log.start.is_some());
        assert!(log.finish.as_ref().and_then(|s| s.cont.as_ref()).is_some());
        assert!(log.iterations.len() >= 2);
        assert!(log.iterations.iter().all(|it| it.id == "polynomial"));
    }
}
