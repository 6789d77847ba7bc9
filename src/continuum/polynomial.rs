//! A single polynomial over the whole wave grid.
//!
//! The wavelength interval mapped onto `[-1, 1]` is fixed by the grid of the
//! fit and saved with the parameters, so a loaded model evaluates the same
//! curve on any other grid.

use serde_json::json;

use crate::continuum::model::{ContinuumShape, FitContext, Items, inverse_variance};
use crate::domain::Basis;
use crate::error::AppError;
use crate::models::{FittableFunction, Polynomial};

#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialContinuum {
    pub degree: usize,
    pub basis: Basis,
    /// Wave interval of the last fit (or of the loaded items).
    domain: Option<(f64, f64)>,
}

impl PolynomialContinuum {
    pub fn new(degree: usize, basis: Basis) -> Self {
        Self {
            degree,
            basis,
            domain: None,
        }
    }

    pub fn domain(&self) -> Option<(f64, f64)> {
        self.domain
    }

    /// The polynomial for evaluating on `wave`. Without a fitted domain the
    /// grid's own ends are used.
    fn function(&self, wave: &[f64]) -> Polynomial {
        let p = Polynomial::new(self.degree, self.basis);
        match self.domain.or_else(|| grid_domain(wave)) {
            Some((lo, hi)) => p.with_domain(lo, hi),
            None => p,
        }
    }
}

/// `(first, last)` of an ascending grid, `None` if it spans nothing.
pub(crate) fn grid_domain(wave: &[f64]) -> Option<(f64, f64)> {
    match (wave.first(), wave.last()) {
        (Some(&lo), Some(&hi)) if hi > lo => Some((lo, hi)),
        _ => None,
    }
}

impl ContinuumShape for PolynomialContinuum {
    fn name(&self) -> &'static str {
        "polynomial"
    }

    fn param_count(&self) -> usize {
        self.degree + 1
    }

    fn fit_impl(
        &mut self,
        ctx: &mut FitContext<'_>,
        flux: &[f64],
        flux_err: Option<&[f64]>,
        mask: Option<&[bool]>,
    ) -> Result<Vec<f64>, AppError> {
        let wave = ctx.wave();
        self.domain = grid_domain(wave);
        let mask = ctx.fitting_mask(mask);
        let weights = flux_err.map(inverse_variance);
        let func = self.function(wave);
        let fit = ctx.fit_function(
            self.name(),
            &func,
            wave,
            flux,
            weights.as_deref(),
            None,
            Some(&mask),
        )?;
        Ok(fit.params)
    }

    fn eval_impl(&self, wave: &[f64], params: &[f64]) -> Result<Vec<f64>, AppError> {
        if params.len() != self.param_count() {
            return Err(AppError::model(format!(
                "Polynomial of degree {} needs {} coefficients, got {}.",
                self.degree,
                self.param_count(),
                params.len()
            )));
        }
        Ok(self.function(wave).eval(wave, params))
    }

    fn save_items(&self, items: &mut Items) {
        items.insert("polynomial_degree".into(), json!(self.degree));
        items.insert("polynomial_basis".into(), json!(self.basis.display_name()));
        items.insert("polynomial_domain".into(), json!(self.domain));
    }

    fn load_items(&mut self, items: &Items) -> Result<(), AppError> {
        let (degree, basis) = load_poly_items(items, "polynomial")?;
        self.degree = degree;
        self.basis = basis;
        self.domain = load_item::<Option<(f64, f64)>>(items, "polynomial_domain")?.flatten();
        Ok(())
    }
}

/// Read `{prefix}_degree` and `{prefix}_basis` back from saved items.
pub(crate) fn load_poly_items(items: &Items, prefix: &str) -> Result<(usize, Basis), AppError> {
    let key = format!("{prefix}_degree");
    let degree = items
        .get(&key)
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| AppError::model(format!("Missing or invalid item '{key}'.")))?;
    let basis = load_item::<Basis>(items, &format!("{prefix}_basis"))?.unwrap_or(Basis::Legendre);
    Ok((degree as usize, basis))
}

/// Deserialize an optional item; absent keys give `None`.
pub(crate) fn load_item<T: serde::de::DeserializeOwned>(items: &Items, key: &str) -> Result<Option<T>, AppError> {
    items
        .get(key)
        .cloned()
        .map(serde_json::from_value::<T>)
        .transpose()
        .map_err(|e| AppError::model(format!("Invalid item '{key}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuum::ContinuumModel;
    use crate::domain::Spectrum;

    fn linear_spectrum() -> Spectrum {
        let wave: Vec<f64> = (0..=30).map(|i| 4000.0 + 100.0 * i as f64).collect();
        let flux = wave.iter().map(|w| 1.0 + 1e-4 * (w - 4000.0)).collect();
        Spectrum {
            wave,
            flux,
            ..Default::default()
        }
    }

    #[test]
    fn fits_and_evaluates_a_line_exactly() {
        let spec = linear_spectrum();
        let mut model = ContinuumModel::new(Box::new(PolynomialContinuum::new(1, Basis::Legendre)));

        let params = model.fit(&spec, None).unwrap();
        assert_eq!(params.len(), 2);

        let (wave, cont) = model.eval(&params).unwrap();
        assert_eq!(wave, spec.wave);
        for (c, f) in cont.iter().zip(spec.flux.iter()) {
            assert!((c - f).abs() < 1e-9, "{c} vs {f}");
        }
        assert_eq!(model.last_fits().len(), 1);
        assert_eq!(model.last_fits()[0].fit_calls, 1);
    }

    #[test]
    fn items_round_trip_through_json_values() {
        let shape = PolynomialContinuum::new(4, Basis::Chebyshev);
        let mut items = Items::new();
        shape.save_items(&mut items);

        let mut other = PolynomialContinuum::new(1, Basis::Power);
        other.load_items(&items).unwrap();
        assert_eq!(other.degree, 4);
        assert_eq!(other.basis, Basis::Chebyshev);
        assert_eq!(other.domain(), None);

        items.remove("polynomial_degree");
        assert!(other.load_items(&items).is_err());
    }

    #[test]
    fn fitted_domain_survives_a_wider_grid() {
        let spec = linear_spectrum();
        let mut model = ContinuumModel::new(Box::new(PolynomialContinuum::new(1, Basis::Legendre)));
        let params = model.fit(&spec, None).unwrap();
        let items = model.save_items();
        assert_eq!(items["polynomial_domain"], json!([4000.0, 7000.0]));

        let mut shape = PolynomialContinuum::new(0, Basis::Power);
        shape.load_items(&items).unwrap();
        assert_eq!(shape.domain(), Some((4000.0, 7000.0)));

        let wide: Vec<f64> = (0..=40).map(|i| 4000.0 + 100.0 * i as f64).collect();
        let cont = shape.eval_impl(&wide, &params).unwrap();
        for (w, c) in wide.iter().zip(cont.iter()) {
            let truth = 1.0 + 1e-4 * (w - 4000.0);
            assert!((c - truth).abs() < 1e-9, "{w}: {c} vs {truth}");
        }
    }

    #[test]
    fn eval_rejects_wrong_parameter_count() {
        let shape = PolynomialContinuum::new(2, Basis::Power);
        assert!(shape.eval_impl(&[1.0, 2.0], &[1.0, 2.0]).is_err());
    }
}
