//! Sample statistics over return series.

use std::cmp::Ordering;

/// Arithmetic mean; `None` for an empty series.
pub fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Sample covariance (n − 1 denominator); `None` with fewer than two paired observations.
pub fn covariance(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mx = mean(xs)?;
    let my = mean(ys)?;

    let acc: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| (x - mx) * (y - my))
        .sum();
    Some(acc / (n - 1) as f64)
}

/// Sample variance (n − 1 denominator).
pub fn sample_variance(xs: &[f64]) -> Option<f64> {
    covariance(xs, xs)
}

/// Sample standard deviation.
pub fn sample_std(xs: &[f64]) -> Option<f64> {
    sample_variance(xs).map(|v| v.max(0.0).sqrt())
}

/// Pearson correlation; `None` when either series has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let cov = covariance(xs, ys)?;
    let sx = sample_std(xs)?;
    let sy = sample_std(ys)?;
    if sx <= f64::EPSILON || sy <= f64::EPSILON {
        return None;
    }
    Some((cov / (sx * sy)).clamp(-1.0, 1.0))
}

/// Percentile with linear interpolation between closest ranks.
///
/// `q` is a fraction in `[0, 1]`; `None` for an empty series.
pub fn percentile(xs: &[f64], q: f64) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn mat_vec_mul(mat: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    mat.iter().map(|row| dot(row, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_and_variance() {
        let xs = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&xs), Some(5.0));
        assert_relative_eq!(sample_variance(&xs).unwrap(), 32.0 / 7.0, epsilon = 1e-12);
        assert!(mean(&[]).is_none());
        assert!(sample_variance(&[1.0]).is_none());
    }

    #[test]
    fn test_pearson() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        let zs = [8.0, 6.0, 4.0, 2.0];
        assert_relative_eq!(pearson(&xs, &ys).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(pearson(&xs, &zs).unwrap(), -1.0, epsilon = 1e-12);
        assert!(pearson(&xs, &[3.0, 3.0, 3.0, 3.0]).is_none());
    }

    #[test]
    fn test_percentile_interpolates() {
        let xs = [5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(percentile(&xs, 0.0), Some(1.0));
        assert_eq!(percentile(&xs, 1.0), Some(5.0));
        assert_eq!(percentile(&xs, 0.5), Some(3.0));
        assert_relative_eq!(percentile(&xs, 0.05).unwrap(), 1.2, epsilon = 1e-12);
    }
}
