//! Order statistics used by the continuum finders.

/// Median of `values` (sorted in place). `None` for an empty slice.
pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Robust scale of residuals around zero: `median(|r|) / 0.6745`.
///
/// Equals the standard deviation for Gaussian residuals.
pub fn mad_scale(residuals: &[f64]) -> Option<f64> {
    let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).filter(|v| v.is_finite()).collect();
    median_mut(&mut abs).map(|mad| mad / 0.6745)
}

/// Linearly interpolated quantile `q ∈ [0, 1]` of the finite values.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q.clamp(0.0, 1.0) * (v.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = (i + 1).min(v.len() - 1);
    let frac = pos - i as f64;
    Some(v[i] + (v[j] - v[i]) * frac)
}
