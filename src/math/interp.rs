//! Grid helpers: polynomial evaluation, nearest-sample lookup, and linear interpolation.
//!
//! All lookups assume `xs` is strictly increasing (the `Spectrum` invariant).

/// Evaluate `Σ c_k·x^k` (coefficients in ascending order) by Horner's rule.
pub fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc.mul_add(x, c))
}

/// Index of the sample in `xs` closest to `x`. `None` for an empty grid.
pub fn nearest_index(xs: &[f64], x: f64) -> Option<usize> {
    if xs.is_empty() {
        return None;
    }
    let upper = xs.partition_point(|&v| v < x);
    if upper == 0 {
        return Some(0);
    }
    if upper == xs.len() {
        return Some(xs.len() - 1);
    }
    let lower = upper - 1;
    if (x - xs[lower]) <= (xs[upper] - x) {
        Some(lower)
    } else {
        Some(upper)
    }
}

/// Linear interpolation of `(xs, ys)` at `x`.
///
/// Returns `None` outside `[xs[0], xs[n-1]]`; no extrapolation.
pub fn interp_linear(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    let (&first, &last) = (xs.first()?, xs.last()?);
    if !(x >= first && x <= last) {
        return None;
    }
    let upper = xs.partition_point(|&v| v < x);
    if upper == 0 {
        return ys.first().copied();
    }
    let lower = upper - 1;
    let (x0, x1) = (xs[lower], xs[upper]);
    let (y0, y1) = (ys[lower], ys[upper]);
    let u = (x - x0) / (x1 - x0);
    Some(y0 + u * (y1 - y0))
}

/// `n` evenly spaced points between `start` and `end` (inclusive).
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n as f64 - 1.0);
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
