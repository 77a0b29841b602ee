//! Statistical utility functions shared across modules
//!
//! Robust location/scale summaries used by size factor estimation,
//! dispersion trend fitting, prior variance estimation and Cook's distance.

use std::cmp::Ordering;

/// Consistency constant that makes the MAD estimate the normal SD
const MAD_SCALE: f64 = 1.4826;

fn sort_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Median of the finite values, NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    median_of_sorted(&sort_finite(values))
}

/// Squared median absolute deviation, scaled for normal consistency
pub fn mad_squared(values: &[f64]) -> f64 {
    let sorted = sort_finite(values);
    if sorted.is_empty() {
        return 0.0;
    }
    let center = median_of_sorted(&sorted);
    let deviations: Vec<f64> = sorted.iter().map(|&x| (x - center).abs()).collect();
    let mad = median(&deviations) * MAD_SCALE;
    mad * mad
}

/// Mean after dropping `floor(n * trim)` values from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let sorted = sort_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let k = ((n as f64) * trim).floor() as usize;
    let kept = if 2 * k < n { &sorted[k..n - k] } else { &sorted[..] };
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Trimmed variance: squared deviations from the trimmed mean, themselves
/// trimmed-averaged and multiplied by `scale` to recover the normal variance.
pub fn trimmed_variance(values: &[f64], trim: f64, scale: f64) -> f64 {
    let center = trimmed_mean(values, trim);
    let squared: Vec<f64> = values.iter().map(|&x| (x - center).powi(2)).collect();
    scale * trimmed_mean(&squared, trim)
}

/// Trigamma function (derivative of digamma)
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }

    if x >= 8.0 {
        let x2 = x * x;
        return 1.0 / x + 0.5 / x2 + 1.0 / (6.0 * x2 * x) - 1.0 / (30.0 * x2 * x2 * x)
            + 1.0 / (42.0 * x2 * x2 * x2 * x);
    }

    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result += 1.0 / (z * z);
        z += 1.0;
    }
    result + trigamma(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_ignores_nan() {
        assert_eq!(median(&[3.0, f64::NAN, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_mad_squared() {
        // deviations from median 3: 2,1,0,1,2 -> MAD 1
        let v = mad_squared(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((v - MAD_SCALE * MAD_SCALE).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean_drops_tails() {
        let mut v: Vec<f64> = (1..=8).map(|i| i as f64).collect();
        v.push(1000.0);
        v.push(-1000.0);
        // trim 0.1 of 10 values removes one from each end
        assert!((trimmed_mean(&v, 0.1) - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_trigamma_known_values() {
        // trigamma(1) = pi^2 / 6
        let expected = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - expected).abs() < 1e-8);
        // trigamma(0.5) = pi^2 / 2
        let expected_half = std::f64::consts::PI.powi(2) / 2.0;
        assert!((trigamma(0.5) - expected_half).abs() < 1e-8);
    }
}
