//! Iterative fitting of a function to continuum points.
//!
//! Given:
//! - samples `x_i`, `y_i` and optional weights `w_i`
//! - a `FittableFunction`
//! - optionally a `ContinuumFinder`
//!
//! we fit the function to the active points, let the finder re-classify the
//! points against the fitted model, and refit on the new selection until the
//! finder is satisfied, too few points remain, or `max_iter` rounds have run.
//!
//! Without a finder this is a single weighted fit.

use log::debug;

use crate::domain::InitialParams;
use crate::error::AppError;
use crate::finders::ContinuumFinder;
use crate::models::FittableFunction;
use crate::trace::ContinuumTrace;

/// Default number of finder rounds.
pub const DEFAULT_MAX_ITER: usize = 5;

/// Outcome of one `fit_function` session.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionFit {
    pub id: String,
    /// `false` only if no fit ever succeeded; `params` is then all `NaN`.
    pub success: bool,
    pub params: Vec<f64>,
    /// Number of finder rounds completed.
    pub iterations: usize,
    /// Number of calls to `FittableFunction::fit`.
    pub fit_calls: usize,
    /// The selection `params` were determined on.
    pub mask: Vec<bool>,
}

impl FunctionFit {
    fn failed(id: &str, param_count: usize, mask: Vec<bool>, iterations: usize, fit_calls: usize) -> Self {
        Self {
            id: id.to_string(),
            success: false,
            params: vec![f64::NAN; param_count],
            iterations,
            fit_calls,
            mask,
        }
    }

    pub fn point_count(&self) -> usize {
        crate::mask::count(&self.mask)
    }
}

/// Drives fit rounds and the optional continuum finder.
pub struct IterativeFitter {
    pub max_iter: usize,
    pub initial_params: InitialParams,
    /// Once the finder has converged, fit once more on its final mask.
    pub refit_on_convergence: bool,
    finder: Option<Box<dyn ContinuumFinder>>,
}

impl Default for IterativeFitter {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            initial_params: InitialParams::ReuseWithFinder,
            refit_on_convergence: true,
            finder: None,
        }
    }
}

impl std::fmt::Debug for IterativeFitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterativeFitter")
            .field("max_iter", &self.max_iter)
            .field("initial_params", &self.initial_params)
            .field("refit_on_convergence", &self.refit_on_convergence)
            .field("finder", &self.finder.as_ref().map(|f| f.name()))
            .finish()
    }
}

impl IterativeFitter {
    pub fn new(max_iter: usize) -> Self {
        Self {
            max_iter,
            ..Self::default()
        }
    }

    pub fn with_finder(mut self, finder: Box<dyn ContinuumFinder>) -> Self {
        self.finder = Some(finder);
        self
    }

    pub fn set_finder(&mut self, finder: Option<Box<dyn ContinuumFinder>>) {
        self.finder = finder;
    }

    pub fn finder_name(&self) -> Option<&'static str> {
        self.finder.as_ref().map(|f| f.name())
    }

    /// Fit `func` to `(x, y)`, refining the selection with the finder.
    ///
    /// `mask` restricts the points that may ever be used (default: all).
    /// Non-finite samples and non-positive weights are never fitted. Errors are
    /// reserved for inconsistent inputs; numerical failure shows up as
    /// `success == false` with `NaN` parameters.
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
        mut trace: Option<&mut (dyn ContinuumTrace + 'static)>,
    ) -> Result<FunctionFit, AppError> {
        let n = x.len();
        let param_count = func.param_count();
        let min_points = func.min_point_count();

        if y.len() != n {
            return Err(AppError::input(format!(
                "{id}: x has {n} values but y has {}.",
                y.len()
            )));
        }
        if let Some(w) = w {
            if w.len() != n {
                return Err(AppError::input(format!(
                    "{id}: x has {n} values but the weights have {}.",
                    w.len()
                )));
            }
        }
        crate::mask::ranges::check_mask_len(mask, n, "Fit mask")?;
        if let Some(p0) = p0 {
            if p0.len() != param_count {
                return Err(AppError::model(format!(
                    "{id}: initial estimate has {} parameters, the function takes {param_count}.",
                    p0.len()
                )));
            }
        }

        let input_mask = mask.map_or_else(|| vec![true; n], <[bool]>::to_vec);
        let mut mask = input_mask.clone();
        let mut fitted_mask = mask.clone();
        let mut params: Option<Vec<f64>> = None;
        let mut iter = 0usize;
        let mut fit_calls = 0usize;

        loop {
            let reuse_p0 = iter == 0
                && p0.is_some()
                && self.finder.is_some()
                && self.initial_params == InitialParams::ReuseWithFinder;

            if reuse_p0 {
                params = p0.map(<[f64]>::to_vec);
            } else {
                fit_calls += 1;
                let seed = params.as_deref().or(p0);
                match fit_masked(func, x, y, w, &mask, seed) {
                    Some(p) => {
                        params = Some(p);
                        fitted_mask.clone_from(&mask);
                    }
                    None => {
                        debug!("{id} iter {iter}: fit failed on {} points", usable_count(x, y, w, &mask));
                        break;
                    }
                }
            }

            let Some(current) = params.as_deref() else {
                break;
            };
            let model = func.eval(x, current);
            if let Some(t) = trace.as_deref_mut() {
                t.on_fit_function_iter(id, iter, x, y, w, &model, &mask);
            }

            let Some(finder) = self.finder.as_mut() else {
                break;
            };

            let (mut new_mask, more) = finder.find(iter, x, y, w, &mask, &model);
            if new_mask.len() != n {
                return Err(AppError::model(format!(
                    "{id}: continuum finder '{}' returned a mask of length {} for {n} points.",
                    finder.name(),
                    new_mask.len()
                )));
            }
            // A finder may only select among the points the caller allowed.
            for (m, allowed) in new_mask.iter_mut().zip(input_mask.iter()) {
                *m &= *allowed;
            }
            mask = new_mask;
            iter += 1;

            let active = usable_count(x, y, w, &mask);
            debug!("{id} iter {iter}: finder kept {active} points, more={more}");

            if !more {
                if self.refit_on_convergence && active >= min_points {
                    fit_calls += 1;
                    let seed = params.as_deref();
                    if let Some(p) = fit_masked(func, x, y, w, &mask, seed) {
                        if let Some(t) = trace.as_deref_mut() {
                            let model = func.eval(x, &p);
                            t.on_fit_function_iter(id, iter, x, y, w, &model, &mask);
                        }
                        params = Some(p);
                        fitted_mask.clone_from(&mask);
                    }
                }
                break;
            }

            if active < min_points {
                debug!("{id}: {active} points left, below the minimum of {min_points}");
                break;
            }

            if iter >= self.max_iter {
                break;
            }
        }

        Ok(match params {
            Some(params) => FunctionFit {
                id: id.to_string(),
                success: true,
                params,
                iterations: iter,
                fit_calls,
                mask: fitted_mask,
            },
            None => FunctionFit::failed(id, param_count, fitted_mask, iter, fit_calls),
        })
    }
}

#[inline]
fn is_usable(x: f64, y: f64, w: Option<f64>) -> bool {
    x.is_finite() && y.is_finite() && w.is_none_or(|w| w.is_finite() && w > 0.0)
}

fn usable_count(x: &[f64], y: &[f64], w: Option<&[f64]>, mask: &[bool]) -> usize {
    (0..x.len())
        .filter(|&i| mask[i] && is_usable(x[i], y[i], w.map(|w| w[i])))
        .count()
}

/// Fit on the usable subset selected by `mask`.
fn fit_masked(
    func: &dyn FittableFunction,
    x: &[f64],
    y: &[f64],
    w: Option<&[f64]>,
    mask: &[bool],
    p0: Option<&[f64]>,
) -> Option<Vec<f64>> {
    let idx: Vec<usize> = (0..x.len())
        .filter(|&i| mask[i] && is_usable(x[i], y[i], w.map(|w| w[i])))
        .collect();
    if idx.len() < func.min_point_count() {
        return None;
    }

    let xs: Vec<f64> = idx.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = idx.iter().map(|&i| y[i]).collect();
    let ws: Option<Vec<f64>> = w.map(|w| idx.iter().map(|&i| w[i]).collect());

    func.fit(&xs, &ys, ws.as_deref(), p0)
        .filter(|p| p.len() == func.param_count() && p.iter().all(|v| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::domain::Basis;
    use crate::finders::SigmaClipping;
    use crate::models::Polynomial;
    use crate::trace::RecordingTrace;

    /// Polynomial that counts its `fit` calls.
    struct Counting {
        inner: Polynomial,
        calls: Arc<AtomicUsize>,
    }

    impl FittableFunction for Counting {
        fn param_count(&self) -> usize {
            self.inner.param_count()
        }

        fn min_point_count(&self) -> usize {
            self.inner.min_point_count()
        }

        fn fit(&self, x: &[f64], y: &[f64], w: Option<&[f64]>, p0: Option<&[f64]>) -> Option<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fit(x, y, w, p0)
        }

        fn eval(&self, x: &[f64], params: &[f64]) -> Vec<f64> {
            self.inner.eval(x, params)
        }
    }

    fn counting_line() -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let f = Counting {
            inner: Polynomial::new(1, Basis::Power),
            calls: calls.clone(),
        };
        (f, calls)
    }

    /// Selects every point and converges at once.
    struct SelectAll;

    impl ContinuumFinder for SelectAll {
        fn name(&self) -> &'static str {
            "select-all"
        }

        fn find(
            &mut self,
            _iter: usize,
            _x: &[f64],
            y: &[f64],
            _w: Option<&[f64]>,
            _mask: &[bool],
            _model: &[f64],
        ) -> (Vec<bool>, bool) {
            (vec![true; y.len()], false)
        }
    }

    /// Drops the first `drop` active points and reports `more` on every call.
    struct Scripted {
        drop: usize,
        more: bool,
        calls: usize,
    }

    impl ContinuumFinder for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn find(
            &mut self,
            _iter: usize,
            _x: &[f64],
            _y: &[f64],
            _w: Option<&[f64]>,
            mask: &[bool],
            _model: &[f64],
        ) -> (Vec<bool>, bool) {
            self.calls += 1;
            let mut out = mask.to_vec();
            let mut left = self.drop;
            for m in out.iter_mut() {
                if left == 0 {
                    break;
                }
                if *m {
                    *m = false;
                    left -= 1;
                }
            }
            (out, self.more)
        }
    }

    fn line_data() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..=30).map(|i| 4000.0 + 100.0 * i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&w| 2.0 + 1e-3 * w).collect();
        (x, y)
    }

    #[test]
    fn without_finder_fits_exactly_once() {
        let (x, y) = line_data();
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::default();
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();
        assert!(fit.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fit.fit_calls, 1);
        assert_eq!(fit.iterations, 0);
        assert!((fit.params[0] - 2.0).abs() < 1e-9);
        assert!((fit.params[1] - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn converged_finder_refits_once_on_updated_mask() {
        let (x, y) = line_data();
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::default().with_finder(Box::new(Scripted {
            drop: 3,
            more: false,
            calls: 0,
        }));
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();
        assert!(fit.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fit.iterations, 1);
        assert_eq!(fit.point_count(), 28);
    }

    #[test]
    fn converged_finder_refits_even_on_an_unchanged_mask() {
        let (x, y) = line_data();
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::default().with_finder(Box::new(Scripted {
            drop: 0,
            more: false,
            calls: 0,
        }));
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fit.fit_calls, 2);
        assert_eq!(fit.point_count(), 31);
    }

    #[test]
    fn converged_finder_without_refit_policy_fits_once() {
        let (x, y) = line_data();
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::default().with_finder(Box::new(Scripted {
            drop: 3,
            more: false,
            calls: 0,
        }));
        fitter.refit_on_convergence = false;
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fit.point_count(), 31);
    }

    #[test]
    fn initial_estimate_is_reused_only_with_finder_and_policy() {
        let (x, y) = line_data();
        let p0 = [2.0, 1e-3];

        // Reuse: first round takes p0, the refit on the converged mask is the only fit.
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::default().with_finder(Box::new(Scripted {
            drop: 2,
            more: false,
            calls: 0,
        }));
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, Some(&p0), None, None)
            .unwrap();
        assert!(fit.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Always fit: initial fit plus the refit.
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::default().with_finder(Box::new(Scripted {
            drop: 2,
            more: false,
            calls: 0,
        }));
        fitter.initial_params = InitialParams::AlwaysFit;
        fitter
            .fit_function("line", &f, &x, &y, None, Some(&p0), None, None)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // No finder: p0 is only a seed, a fit always runs.
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::default();
        fitter
            .fit_function("line", &f, &x, &y, None, Some(&p0), None, None)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn minimum_point_floor_keeps_last_fit() {
        // Five points, a line needs two; the finder drops two per round.
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [3.0, 5.0, 7.0, 9.0, 11.0];
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::new(10).with_finder(Box::new(Scripted {
            drop: 2,
            more: true,
            calls: 0,
        }));
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();
        // Rounds: 5 points (fit), 3 points (fit), 1 point -> stop.
        assert!(fit.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fit.iterations, 2);
        assert!(fit.params.iter().all(|p| p.is_finite()));
        assert!((fit.params[1] - 2.0).abs() < 1e-9);
        assert_eq!(fit.point_count(), 3);
    }

    #[test]
    fn max_iter_bounds_the_loop() {
        let x: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.0 + v).collect();
        let (f, calls) = counting_line();
        let mut fitter = IterativeFitter::new(3).with_finder(Box::new(Scripted {
            drop: 1,
            more: true,
            calls: 0,
        }));
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();
        assert_eq!(fit.iterations, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn never_fitted_returns_nan_failure() {
        let x = [1.0];
        let y = [2.0];
        let (f, _) = counting_line();
        let mut fitter = IterativeFitter::default();
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();
        assert!(!fit.success);
        assert_eq!(fit.params.len(), 2);
        assert!(fit.params.iter().all(|p| p.is_nan()));
    }

    #[test]
    fn nan_samples_and_masked_points_are_skipped() {
        let (x, mut y) = line_data();
        y[4] = f64::NAN;
        y[10] = 1e6;
        let mut mask = vec![true; x.len()];
        mask[10] = false;
        let f = Polynomial::new(1, Basis::Power);
        let fit = IterativeFitter::default()
            .fit_function("line", &f, &x, &y, None, None, Some(&mask), None)
            .unwrap();
        assert!(fit.success);
        assert!((fit.params[1] - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn finder_cannot_readmit_points_outside_the_input_mask() {
        let (x, mut y) = line_data();
        y[5] = 1e6;
        let mut mask = vec![true; x.len()];
        mask[5] = false;
        mask[20..25].iter_mut().for_each(|m| *m = false);

        let f = Polynomial::new(1, Basis::Power);
        let fit = IterativeFitter::default()
            .with_finder(Box::new(SelectAll))
            .fit_function("line", &f, &x, &y, None, None, Some(&mask), None)
            .unwrap();
        assert!(fit.success);
        assert_eq!(fit.mask, mask);
        assert!((fit.params[1] - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn sigma_clipping_stays_inside_the_input_mask() {
        let x: Vec<f64> = (0..200).map(|i| 5000.0 + 2.0 * i as f64).collect();
        let mut y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &w)| 1.0 + 1e-4 * (w - 5000.0) + if i % 2 == 0 { 0.002 } else { -0.002 })
            .collect();
        // A bad pixel that would sit within the clip bounds.
        y[150] += 0.001;
        let mut mask: Vec<bool> = x.iter().map(|w| (5000.0..=5300.0).contains(w)).collect();
        for (m, w) in mask.iter_mut().zip(x.iter()) {
            if (5100.0..=5200.0).contains(w) {
                *m = false;
            }
        }
        mask[150] = false;

        let f = Polynomial::new(1, Basis::Legendre).with_domain(x[0], x[199]);
        let mut fitter = IterativeFitter::new(10).with_finder(Box::new(SigmaClipping::new(3.0, 3.0)));
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, Some(&mask), None)
            .unwrap();
        assert!(fit.success);
        assert!(fit.mask.iter().zip(mask.iter()).all(|(f, m)| !f || *m));
        assert!(!fit.mask[150]);
        assert!(fit.point_count() > 0);
    }

    #[test]
    fn sigma_clipping_rejects_absorption_line() {
        let x: Vec<f64> = (0..200).map(|i| 5000.0 + i as f64).collect();
        let mut y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &w)| 1.0 + 1e-4 * (w - 5000.0) + if i % 2 == 0 { 0.002 } else { -0.002 })
            .collect();
        for v in &mut y[90..110] {
            *v -= 0.4;
        }
        let f = Polynomial::new(1, Basis::Legendre).with_domain(x[0], x[199]);
        let mut fitter = IterativeFitter::new(10).with_finder(Box::new(SigmaClipping::new(3.0, 3.0)));
        let fit = fitter
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();
        assert!(fit.success);
        assert!(fit.mask[90..110].iter().all(|m| !m));
        let model = f.eval(&x, &fit.params);
        for (i, m) in model.iter().enumerate() {
            let truth = 1.0 + 1e-4 * (x[i] - 5000.0);
            assert!((m - truth).abs() < 1e-3, "pixel {i}: {m} vs {truth}");
        }
    }

    #[test]
    fn trace_sees_every_round_without_changing_results() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 1.0 + 0.5 * v).collect();
        let f = Polynomial::new(1, Basis::Power);

        let make = || {
            IterativeFitter::new(3).with_finder(Box::new(Scripted {
                drop: 1,
                more: true,
                calls: 0,
            }))
        };

        let plain = make()
            .fit_function("line", &f, &x, &y, None, None, None, None)
            .unwrap();

        let recorder = RecordingTrace::new();
        let mut sink = recorder.clone();
        let traced = make()
            .fit_function("line", &f, &x, &y, None, None, None, Some(&mut sink))
            .unwrap();

        assert_eq!(plain, traced);
        let log = recorder.snapshot();
        assert_eq!(log.iterations.len(), 3);
        assert_eq!(
            log.iterations.iter().map(|s| s.iter).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(log.iterations.iter().all(|s| s.mask.len() == x.len()));
    }

    #[test]
    fn inconsistent_inputs_are_errors() {
        let f = Polynomial::new(1, Basis::Power);
        let mut fitter = IterativeFitter::default();
        assert!(fitter
            .fit_function("bad", &f, &[1.0, 2.0], &[1.0], None, None, None, None)
            .is_err());
        assert!(fitter
            .fit_function("bad", &f, &[1.0, 2.0], &[1.0, 2.0], None, Some(&[1.0]), None, None)
            .is_err());
        assert!(fitter
            .fit_function("bad", &f, &[1.0, 2.0], &[1.0, 2.0], None, None, Some(&[true]), None)
            .is_err());
    }
}
