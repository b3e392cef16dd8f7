//! Equal-frequency binning.
//!
//! ```text
//! values ──► sort ──► edges at p = 0, 1/Q, ..., 1 (linear interpolation)
//!                        │
//!                        ▼
//!              drop duplicate edges ──► k = edges - 1 groups (k <= Q)
//!                        │
//!                        ▼
//!      group 1 = [e0, e1], group g = (e[g-1], e[g]] for g > 1
//! ```
//!
//! Low-variance days with many identical values collapse edges, so fewer than
//! Q groups come back. Callers treat that as normal.

/// Linear-interpolated quantile of an ascending slice, `p` in `[0, 1]`.
pub fn linear_quantile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Unique ascending bin edges for `q` equal-frequency groups.
pub fn quantile_edges(values: &[f64], q: usize) -> Vec<f64> {
    if values.is_empty() || q == 0 {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    if sorted.is_empty() {
        return Vec::new();
    }

    let mut edges: Vec<f64> = (0..=q)
        .map(|i| linear_quantile(&sorted, i as f64 / q as f64))
        .collect();
    edges.dedup();
    edges
}

/// Assign each value a group in `1..=k`.
///
/// Returns `None` when the edges collapse to a single point (no group can
/// be formed). NaN values get group 0.
pub fn qcut(values: &[f64], q: usize) -> Option<Vec<usize>> {
    let edges = quantile_edges(values, q);
    if edges.len() < 2 {
        return None;
    }
    let upper = &edges[1..];
    let groups = values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                0
            } else {
                // first upper edge >= v; values equal to e0 fall in group 1
                upper.partition_point(|&e| e < v).min(upper.len() - 1) + 1
            }
        })
        .collect();
    Some(groups)
}
