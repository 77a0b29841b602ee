//! Gene-wise dispersion estimation using Cox-Reid adjusted profile likelihood

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use super::posterior::GeneLikelihood;
use super::DispersionParams;
use crate::cancel::CancellationToken;
use crate::data::TwoGroupDataSet;
use crate::error::{AnalysisError, Result};
use crate::linalg::{linear_predictor, ols};

/// Lower bound applied to fitted means before they enter the likelihood
const MINMU: f64 = 0.5;

/// Estimate gene-wise dispersions for every testable gene.
///
/// Genes that cannot enter the model (all zero, or with missing counts) get
/// a NaN dispersion and a NaN row in the mu matrix.
pub fn estimate_gene_dispersions(
    ds: &mut TwoGroupDataSet,
    params: &DispersionParams,
    token: &CancellationToken,
) -> Result<()> {
    let size_factors = ds
        .size_factors()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "size factors must be estimated before dispersions".to_string(),
        })?
        .to_vec();

    let counts = ds.counts().counts();
    let design = ds.design_matrix();
    let testable = ds.testable_genes();
    let n_genes = ds.n_genes();
    let n_samples = ds.n_samples();

    if n_samples <= design.ncols() {
        return Err(AnalysisError::InsufficientReplicates {
            group: format!("{} + {}", ds.group1_name(), ds.group2_name()),
            n: n_samples,
        });
    }

    // mean of 1/sizeFactors, used by the moments estimate
    let xim: f64 = size_factors.iter().map(|&s| 1.0 / s).sum::<f64>() / n_samples as f64;

    let results: Vec<(f64, Vec<f64>)> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            if !testable[i] || token.is_cancelled() {
                return (f64::NAN, vec![f64::NAN; n_samples]);
            }
            let gene_counts: Vec<f64> = counts.row(i).to_vec();
            estimate_dispersion_gene(&gene_counts, &size_factors, design, xim, params)
        })
        .collect();

    token.check("gene-wise dispersion estimation")?;

    let mut mu_matrix = Array2::zeros((n_genes, n_samples));
    for (i, (_, mu)) in results.iter().enumerate() {
        for (j, &m) in mu.iter().enumerate() {
            mu_matrix[[i, j]] = m;
        }
    }
    let dispersions: Array1<f64> = results.iter().map(|(d, _)| *d).collect();

    log::debug!(
        "Gene-wise dispersions estimated for {} of {} genes",
        dispersions.iter().filter(|d| d.is_finite()).count(),
        n_genes
    );

    ds.set_gene_dispersions(dispersions)?;
    ds.set_mu(mu_matrix)?;
    Ok(())
}

/// Fitted values of the linear model on normalized counts (group means for
/// a group design), scaled back by the size factors and floored at MINMU.
fn linear_model_mu(normalized: &[f64], size_factors: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let n = normalized.len();
    let beta = ols(design, normalized).unwrap_or_else(|| {
        let mut fallback = vec![0.0; design.ncols()];
        fallback[0] = normalized.iter().sum::<f64>() / n as f64;
        fallback
    });
    (0..n)
        .map(|i| (linear_predictor(design, i, &beta) * size_factors[i]).max(MINMU))
        .collect()
}

/// Moment estimate sum(((y - mu)^2 - mu) / mu^2) / (m - p) on normalized
/// counts, with the linear-model fit floored at 1
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let n = normalized.len();
    let p = design.ncols();
    let ones = vec![1.0; n];
    let mu = linear_model_mu(normalized, &ones, design);

    let sum: f64 = normalized
        .iter()
        .zip(&mu)
        .map(|(&y, &m)| {
            let m = m.max(1.0);
            ((y - m).powi(2) - m) / (m * m)
        })
        .sum();

    (sum / (n - p) as f64).max(0.0)
}

/// (variance - xim * mean) / mean^2 on normalized counts
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let base_mean = normalized.iter().sum::<f64>() / n;
    let base_var = if n > 1.0 {
        normalized.iter().map(|&x| (x - base_mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };

    if base_mean > 1e-10 {
        (base_var - xim * base_mean) / (base_mean * base_mean)
    } else {
        f64::INFINITY
    }
}

/// Estimate one gene's dispersion.
///
/// 1. Start from min(rough, moments), clamped to [min_disp, max_disp].
/// 2. Optimize the Cox-Reid profile likelihood with mu held fixed.
/// 3. If the optimizer did not improve on the start, keep the start.
/// 4. If it did not converge (or stopped after one step) and the estimate
///    is away from the lower bound, take the grid search result instead.
///
/// Returns (dispersion, mu), mu being reused by the MAP step.
pub(crate) fn estimate_dispersion_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    xim: f64,
    params: &DispersionParams,
) -> (f64, Vec<f64>) {
    let n_samples = counts.len();
    let min_disp = params.min_disp;
    let max_disp = params.max_disp(n_samples);

    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| c / s)
        .collect();

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(min_disp, max_disp);

    let mu = linear_model_mu(&normalized, size_factors, design);

    let likelihood = GeneLikelihood {
        counts,
        mu: &mu,
        design,
        prior: None,
    };
    let outcome = likelihood.line_search(alpha_init.ln(), params);

    let no_increase = outcome.last_lp < outcome.initial_lp + outcome.initial_lp.abs() / 1e6;
    let mut estimate = if no_increase {
        alpha_init
    } else {
        outcome.log_alpha.exp()
    };

    let converged = outcome.iterations < params.maxit && outcome.iterations != 1;
    if !converged && estimate > min_disp * 10.0 {
        estimate = likelihood.grid_search(min_disp, max_disp);
    }

    (estimate.clamp(min_disp, max_disp), mu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;
    use crate::normalization::estimate_size_factors;
    use ndarray::array;

    fn two_group_design(n1: usize, n2: usize) -> Array2<f64> {
        let mut design = Array2::zeros((n1 + n2, 2));
        for i in 0..n1 + n2 {
            design[[i, 0]] = 1.0;
            if i >= n1 {
                design[[i, 1]] = 1.0;
            }
        }
        design
    }

    #[test]
    fn test_gene_wise_dispersion() {
        let counts = CountMatrix::new(
            array![
                [100.0, 120.0, 90.0, 110.0, 95.0, 105.0],
                [500.0, 550.0, 480.0, 520.0, 490.0, 510.0],
                [50.0, 45.0, 55.0, 48.0, 52.0, 50.0],
                [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
            ],
            vec![
                "gene1".to_string(),
                "gene2".to_string(),
                "gene3".to_string(),
                "gene4".to_string(),
            ],
            (1..=6).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap();

        let mut ds = TwoGroupDataSet::new(counts, "A", "B", vec![false, false, false, true, true, true])
            .unwrap();
        estimate_size_factors(&mut ds).unwrap();
        estimate_gene_dispersions(&mut ds, &DispersionParams::default(), &CancellationToken::new())
            .unwrap();

        let dispersions = ds.gene_dispersions().unwrap();
        assert_eq!(dispersions.len(), 4);
        assert!(dispersions.iter().take(3).all(|&x| x > 0.0 && x <= 10.0));
        assert!(dispersions[3].is_nan());
        assert!(ds.mu().unwrap().row(3).iter().all(|m| m.is_nan()));
    }

    #[test]
    fn test_overdispersed_gene_has_larger_dispersion() {
        let design = two_group_design(3, 3);
        let sf = vec![1.0; 6];
        let params = DispersionParams::default();
        let (tight, _) =
            estimate_dispersion_gene(&[100.0, 102.0, 98.0, 200.0, 203.0, 197.0], &sf, &design, 1.0, &params);
        let (wide, _) =
            estimate_dispersion_gene(&[40.0, 180.0, 90.0, 90.0, 400.0, 150.0], &sf, &design, 1.0, &params);
        assert!(wide > tight, "wide {} tight {}", wide, tight);
        assert!(wide > 0.1);
    }

    #[test]
    fn test_max_disp_bound() {
        let design = two_group_design(3, 3);
        let params = DispersionParams::default();
        let sf = vec![1.0223, 1.0194, 1.052, 1.0169, 0.9944, 1.0543];
        let (disp, mu) =
            estimate_dispersion_gene(&[25.0, 24.0, 25.0, 10.0, 20.0, 11.0], &sf, &design, 1.0, &params);
        assert!(disp <= 10.0 && disp >= params.min_disp);
        assert!(mu.iter().all(|&m| m >= MINMU));

        let design_15 = two_group_design(8, 7);
        let (disp_15, _) = estimate_dispersion_gene(&[25.0; 15], &[1.0; 15], &design_15, 1.0, &params);
        assert!(disp_15 <= 15.0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let counts = CountMatrix::new(
            array![[10.0, 12.0, 30.0, 33.0], [5.0, 6.0, 5.0, 7.0]],
            vec!["g1".to_string(), "g2".to_string()],
            (1..=4).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap();
        let mut ds = TwoGroupDataSet::new(counts, "A", "B", vec![false, false, true, true]).unwrap();
        estimate_size_factors(&mut ds).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = estimate_gene_dispersions(&mut ds, &DispersionParams::default(), &token).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled { .. }));
        assert!(ds.gene_dispersions().is_none());
    }
}
