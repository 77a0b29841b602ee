//! Cook's distance outlier detection
//!
//! Cook's distance measures how much one sample moves a gene's fit:
//! `cooks = PearsonResSq / p * h / (1 - h)^2`, where the Pearson residual uses
//! a robust method-of-moments dispersion rather than the fitted one, so a
//! single extreme count cannot hide itself by inflating the dispersion.

use ndarray::Array2;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::data::TwoGroupDataSet;
use crate::error::{AnalysisError, Result};
use crate::glm::nb_variance;
use crate::stats::trimmed_variance;

const MIN_ROBUST_DISP: f64 = 0.04;
/// Samples with a larger count than the outlier needed to keep the gene
const EXEMPTION_COUNT: usize = 3;

/// Cook's distances, genes x samples, from the GLM fit on `ds`
pub fn calculate_cooks_distance(ds: &TwoGroupDataSet) -> Result<Array2<f64>> {
    let mu = ds.mu().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "fitted means required for Cook's distance".to_string(),
    })?;
    let hat = ds.hat_diagonals().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "hat diagonals required for Cook's distance".to_string(),
    })?;
    let dispersions = robust_method_of_moments_disp(ds)?;

    let counts = ds.counts().counts();
    let n_samples = ds.n_samples();
    let p = ds.n_coefs() as f64;

    let rows: Vec<Vec<f64>> = (0..ds.n_genes())
        .into_par_iter()
        .map(|i| {
            let alpha = dispersions[i];
            (0..n_samples)
                .map(|j| {
                    let m = mu[[i, j]];
                    let h = hat[[i, j]];
                    let v = nb_variance(m, alpha);
                    let pearson_sq = (counts[[i, j]] - m).powi(2) / v;
                    if h.is_finite() && h < 1.0 && pearson_sq.is_finite() && v > 0.0 {
                        pearson_sq / p * h / (1.0 - h).powi(2)
                    } else {
                        f64::NAN
                    }
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::from_elem((ds.n_genes(), n_samples), f64::NAN);
    for (i, row) in rows.into_iter().enumerate() {
        for (j, c) in row.into_iter().enumerate() {
            cooks[[i, j]] = c;
        }
    }
    Ok(cooks)
}

/// Trim ratio and scale constant for a cell of `n` samples
fn trim_for_cell(n: usize) -> (f64, f64) {
    if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

/// Per-gene dispersion `(variance - mean) / mean^2` on normalized counts,
/// floored at 0.04.
///
/// The variance is the largest trimmed within-group variance over groups of
/// at least 3 samples; when neither group is that large, a trimmed variance
/// across all samples is used.
pub fn robust_method_of_moments_disp(ds: &TwoGroupDataSet) -> Result<Vec<f64>> {
    let normalized = ds.normalized_counts().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "normalized counts required for robust dispersion".to_string(),
    })?;

    let cells: Vec<Vec<usize>> = [false, true]
        .iter()
        .map(|&g2| {
            ds.in_group2()
                .iter()
                .enumerate()
                .filter(|(_, &b)| b == g2)
                .map(|(j, _)| j)
                .collect::<Vec<usize>>()
        })
        .filter(|cell| cell.len() >= 3)
        .collect();

    let disp = normalized
        .rows()
        .into_iter()
        .map(|row| {
            let values: Vec<f64> = row.to_vec();
            let variance = if cells.is_empty() {
                trimmed_variance(&values, 1.0 / 8.0, 1.51)
            } else {
                cells
                    .iter()
                    .map(|cell| {
                        let (trim, scale) = trim_for_cell(cell.len());
                        let cell_values: Vec<f64> = cell.iter().map(|&j| values[j]).collect();
                        trimmed_variance(&cell_values, trim, scale)
                    })
                    .fold(0.0, f64::max)
            };
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            if mean > 0.0 {
                ((variance - mean) / (mean * mean)).max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect();
    Ok(disp)
}

/// 0.99 quantile of F(p, m - p); `None` when m <= p, in which case no gene
/// is filtered
pub fn default_cooks_cutoff(n_samples: usize, n_coefs: usize) -> Option<f64> {
    if n_samples <= n_coefs {
        return None;
    }
    FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64)
        .ok()
        .map(|f| f.inverse_cdf(0.99))
}

/// Flag genes whose largest Cook's distance exceeds `cutoff`.
///
/// A gene is exempt when at least 3 samples have a raw count strictly
/// greater than the count of the sample with the largest Cook's distance.
pub fn cooks_outliers(ds: &TwoGroupDataSet, cooks: &Array2<f64>, cutoff: f64) -> Vec<bool> {
    let counts = ds.counts().counts();
    cooks
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let worst = row
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_finite())
                .max_by(|a, b| a.1.total_cmp(b.1));
            match worst {
                Some((j, &c)) if c > cutoff => {
                    let outlier_count = counts[[i, j]];
                    let larger = counts.row(i).iter().filter(|&&y| y > outlier_count).count();
                    larger < EXEMPTION_COUNT
                }
                _ => false,
            }
        })
        .collect()
}

/// Largest finite Cook's distance per gene, NaN when there is none
pub fn max_cooks_per_gene(cooks: &Array2<f64>) -> Vec<f64> {
    cooks
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .copied()
                .filter(|c| c.is_finite())
                .fold(f64::NAN, f64::max)
        })
        .collect()
}
