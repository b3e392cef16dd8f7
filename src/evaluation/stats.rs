//! Numerically stable descriptive statistics and significance tests.
//!
//! All functions are NaN-aware in the same way: an input too short to define
//! the statistic yields NaN (or `None` for correlations) instead of panicking.
//! Moments are computed two-pass (mean first, then centred sums), which keeps
//! the large-mean / small-variance OFI series well conditioned.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (ddof = 1); NaN for fewer than 2 values.
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Pearson correlation, or `None` when it is undefined (length mismatch,
/// fewer than 2 points, or zero variance in either series).
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }
    let mx = mean(x);
    let my = mean(y);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if !(sxx > 0.0 && syy > 0.0) {
        return None;
    }
    let r = sxy / (sxx * syy).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// 1-based ranks with ties given their average rank.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i + 1;
        while j < n && values[order[j]] == values[order[i]] {
            j += 1;
        }
        // positions i..j share rank (i+1 + j) / 2
        let rank = (i + 1 + j) as f64 / 2.0;
        for &idx in &order[i..j] {
            ranks[idx] = rank;
        }
        i = j;
    }
    ranks
}

/// Spearman rank correlation (Pearson on average ranks).
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Two-sided p-value for a correlation `r` over `n` observations using the
/// t approximation with `n - 2` degrees of freedom.
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if !r.is_finite() || n < 3 {
        return f64::NAN;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();
    two_sided_t_p_value(t, df)
}

/// One-sample t-test of `mean == 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TTest {
    pub n: usize,
    pub mean: f64,
    pub std: f64,
    pub t_stat: f64,
    pub p_value: f64,
}

/// `t = mean / (std / sqrt(n))`, two-sided p-value with `n - 1` degrees of
/// freedom. NaN statistic for fewer than 2 values. A zero standard
/// deviation with a non-zero mean gives an infinite t and a zero p-value.
pub fn one_sample_t_test(values: &[f64]) -> TTest {
    let n = values.len();
    let m = mean(values);
    let s = sample_std(values);

    let (t_stat, p_value) = if n < 2 {
        (f64::NAN, f64::NAN)
    } else if s == 0.0 {
        if m == 0.0 {
            (f64::NAN, f64::NAN)
        } else {
            (m.signum() * f64::INFINITY, 0.0)
        }
    } else {
        let t = m / (s / (n as f64).sqrt());
        (t, two_sided_t_p_value(t, (n - 1) as f64))
    };

    TTest {
        n,
        mean: m,
        std: s,
        t_stat,
        p_value,
    }
}

fn two_sided_t_p_value(t: f64, df: f64) -> f64 {
    if t.is_nan() || df <= 0.0 {
        return f64::NAN;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.cdf(-t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}
