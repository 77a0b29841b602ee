//! Dispersion estimation for negative binomial models
//!
//! Three stages run in order on a [`TwoGroupDataSet`]:
//! gene-wise estimates, a mean-dispersion trend across genes, and
//! maximum a posteriori estimates shrunk toward that trend.

mod gene_wise;
mod map;
mod posterior;
mod trend;

pub use gene_wise::estimate_gene_dispersions;
pub use map::{estimate_map_dispersions, estimate_prior_variance};
pub use trend::fit_dispersion_trend;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::data::TwoGroupDataSet;
use crate::error::Result;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Lower bound on any dispersion estimate
    pub min_disp: f64,
    /// Convergence tolerance of the log posterior during line search
    pub disp_tol: f64,
    /// Initial line search step size
    pub kappa_0: f64,
    /// Maximum line search iterations
    pub maxit: usize,
    /// Genes whose log dispersion exceeds the trend by this many SDs keep
    /// their gene-wise estimate
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

impl DispersionParams {
    /// Upper bound on dispersion: max(number of samples, 10)
    pub fn max_disp(&self, n_samples: usize) -> f64 {
        (n_samples as f64).max(10.0)
    }
}

/// Estimate all dispersions (gene-wise, trended and MAP).
/// Size factors must already be set.
pub fn estimate_dispersions(
    ds: &mut TwoGroupDataSet,
    params: &DispersionParams,
    token: &CancellationToken,
) -> Result<()> {
    log::info!("Estimating gene-wise dispersions...");
    estimate_gene_dispersions(ds, params, token)?;
    token.check("dispersion trend fitting")?;

    log::info!("Fitting dispersion trend...");
    fit_dispersion_trend(ds, params)?;
    token.check("MAP dispersion estimation")?;

    log::info!("Estimating MAP dispersions...");
    estimate_map_dispersions(ds, params, token)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;
    use crate::normalization::estimate_size_factors;
    use ndarray::Array2;

    fn simulated_dataset() -> TwoGroupDataSet {
        // 40 genes across a range of means with modest, deterministic noise
        let n_genes = 40;
        let n_samples = 6;
        let mut counts = Array2::zeros((n_genes, n_samples));
        for i in 0..n_genes {
            let base = 5.0 * (i as f64 + 1.0).powf(1.6);
            for j in 0..n_samples {
                let wobble = 1.0 + 0.15 * (((i * 7 + j * 3) % 5) as f64 - 2.0) / 2.0;
                counts[[i, j]] = (base * wobble).round();
            }
        }
        let gene_ids = (0..n_genes).map(|i| format!("g{}", i)).collect();
        let sample_ids = (0..n_samples).map(|j| format!("s{}", j)).collect();
        let matrix = CountMatrix::new(counts, gene_ids, sample_ids).unwrap();
        TwoGroupDataSet::new(matrix, "A", "B", vec![false, false, false, true, true, true]).unwrap()
    }

    #[test]
    fn test_params_default_from_empty_json() {
        let params: DispersionParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.maxit, 100);
        assert_eq!(params.min_disp, 1e-8);
        assert_eq!(params.max_disp(4), 10.0);
        assert_eq!(params.max_disp(12), 12.0);
    }

    #[test]
    fn test_full_dispersion_pipeline() {
        let mut ds = simulated_dataset();
        estimate_size_factors(&mut ds).unwrap();
        estimate_dispersions(&mut ds, &DispersionParams::default(), &CancellationToken::new())
            .unwrap();

        assert!(ds.gene_dispersions().is_some());
        assert!(ds.trended_dispersions().is_some());
        assert!(ds.dispersion_prior_var().unwrap() >= 0.25);
        let final_disp = ds.dispersions().unwrap();
        assert!(final_disp.iter().all(|d| d.is_finite() && *d > 0.0));
    }
}
