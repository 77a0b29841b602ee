//! Maximum a posteriori dispersions shrunk toward the trend
//!
//! The prior on log(alpha) is normal, centred on the trended dispersion, with
//! a variance estimated from how far the gene-wise estimates scatter around
//! the trend beyond what sampling noise alone explains.

use ndarray::{Array1, Array2};
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use statrs::distribution::{ChiSquared, Normal};

use super::posterior::{GeneLikelihood, LogNormalPrior};
use super::DispersionParams;
use crate::cancel::CancellationToken;
use crate::data::TwoGroupDataSet;
use crate::error::{AnalysisError, Result};
use crate::linalg::{solve_spd, weighted_cross, weighted_gram};
use crate::stats::{mad_squared, trigamma};

const MIN_PRIOR_VAR: f64 = 0.25;
const SIMULATION_SEED: u64 = 2;
const SIMULATIONS_PER_CANDIDATE: usize = 10_000;
const CANDIDATE_VARIANCES: usize = 200;
const MAX_CANDIDATE_VARIANCE: f64 = 8.0;
const HISTOGRAM_HALF_WIDTH: f64 = 10.0;
const HISTOGRAM_BIN: f64 = 0.5;
const SMOOTHER_SPAN: f64 = 0.2;

/// Estimate MAP dispersions for every gene with a gene-wise estimate.
///
/// Stores the prior variance, the observed variance of log residuals and the
/// upper-outlier flags alongside the MAP values. Outliers keep their
/// gene-wise dispersion.
pub fn estimate_map_dispersions(
    ds: &mut TwoGroupDataSet,
    params: &DispersionParams,
    token: &CancellationToken,
) -> Result<()> {
    let missing = |what: &str| AnalysisError::InvalidInput {
        reason: format!("{} required for MAP dispersion estimation", what),
    };
    let gene_disp = ds.gene_dispersions().ok_or_else(|| missing("gene-wise dispersions"))?.clone();
    let trend_disp = ds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?.clone();
    let mu = ds.mu().ok_or_else(|| missing("fitted means"))?.clone();

    let counts = ds.counts().counts();
    let design = ds.design_matrix().clone();
    let n_samples = ds.n_samples();
    let n_coef = ds.n_coefs();
    let max_disp = params.max_disp(n_samples);

    let (prior_var, var_log_disp_ests) = estimate_prior_variance(
        gene_disp.as_slice().unwrap_or(&[]),
        trend_disp.as_slice().unwrap_or(&[]),
        n_samples,
        n_coef,
        params.min_disp,
    );
    log::debug!(
        "Dispersion prior variance {:.6} (log residual variance {:.6})",
        prior_var,
        var_log_disp_ests
    );

    let map: Vec<f64> = (0..ds.n_genes())
        .into_par_iter()
        .map(|i| {
            if token.is_cancelled() {
                return f64::NAN;
            }
            let gene_counts: Vec<f64> = counts.row(i).to_vec();
            let gene_mu: Vec<f64> = mu.row(i).to_vec();
            fit_map_dispersion(
                &gene_counts,
                &design,
                &gene_mu,
                gene_disp[i],
                trend_disp[i],
                prior_var,
                max_disp,
                params,
            )
        })
        .collect();
    token.check("MAP dispersion estimation")?;

    let threshold = params.outlier_sd * var_log_disp_ests.sqrt();
    let outliers: Vec<bool> = gene_disp
        .iter()
        .zip(trend_disp.iter())
        .map(|(&g, &t)| {
            g.is_finite() && t.is_finite() && g > 0.0 && t > 0.0 && g.ln() - t.ln() > threshold
        })
        .collect();
    let final_disp: Array1<f64> = map
        .iter()
        .zip(&outliers)
        .zip(gene_disp.iter())
        .map(|((&m, &outlier), &g)| if outlier { g } else { m })
        .collect();

    log::debug!(
        "{} dispersion outliers keep their gene-wise estimate",
        outliers.iter().filter(|&&o| o).count()
    );

    ds.set_dispersion_prior_var(prior_var);
    ds.set_var_log_disp_ests(var_log_disp_ests);
    ds.set_dispersion_outliers(outliers);
    ds.set_map_dispersions(final_disp)
}

/// Prior variance of log dispersion and the observed variance of log
/// residuals, returned as `(prior_var, var_log_disp_ests)`.
///
/// The observed variance is MAD² of `log(gene) - log(trend)` over genes whose
/// gene-wise estimate is at least `100 * min_disp`. With more than three
/// residual degrees of freedom the sampling variance `trigamma(df / 2)` is
/// subtracted; with three or fewer the prior variance is matched by
/// simulation instead. Either way the result is at least 0.25.
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended_dispersions: &[f64],
    n_samples: usize,
    n_coef: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended_dispersions)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= 100.0 * min_disp && t > 0.0)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp_ests = mad_squared(&residuals);
    if n_samples <= n_coef {
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }

    let df = (n_samples - n_coef) as f64;
    let prior_var = if df <= 3.0 {
        simulated_prior_variance(&residuals, df)
    } else {
        (var_log_disp_ests - trigamma(df / 2.0)).max(MIN_PRIOR_VAR)
    };

    (prior_var, var_log_disp_ests)
}

/// Bin densities over (-10, 10) with width 0.5; values outside are dropped
fn histogram_density(values: &[f64]) -> Vec<f64> {
    let n_bins = (2.0 * HISTOGRAM_HALF_WIDTH / HISTOGRAM_BIN) as usize;
    let mut bins = vec![0usize; n_bins];
    let mut total = 0usize;
    for &v in values {
        if v > -HISTOGRAM_HALF_WIDTH && v < HISTOGRAM_HALF_WIDTH {
            let idx = ((v + HISTOGRAM_HALF_WIDTH) / HISTOGRAM_BIN) as usize;
            bins[idx.min(n_bins - 1)] += 1;
            total += 1;
        }
    }
    if total == 0 {
        return vec![0.0; n_bins];
    }
    bins.iter()
        .map(|&c| c as f64 / (total as f64 * HISTOGRAM_BIN))
        .collect()
}

/// Choose the prior variance whose simulated residual distribution
/// (`log chisq(df) + N(0, var) - log df`) is closest in KL divergence to the
/// observed residuals. Seeded, so repeated runs give the same answer.
fn simulated_prior_variance(residuals: &[f64], df: f64) -> f64 {
    let observed = histogram_density(residuals);
    if observed.iter().all(|&d| d == 0.0) {
        return MIN_PRIOR_VAR;
    }
    let (chisq, standard_normal) = match (ChiSquared::new(df), Normal::new(0.0, 1.0)) {
        (Ok(c), Ok(n)) => (c, n),
        _ => return MIN_PRIOR_VAR,
    };

    let mut rng = ChaCha8Rng::seed_from_u64(SIMULATION_SEED);
    let grid: Vec<f64> = (0..CANDIDATE_VARIANCES)
        .map(|i| i as f64 * MAX_CANDIDATE_VARIANCE / (CANDIDATE_VARIANCES - 1) as f64)
        .collect();

    let divergences: Vec<f64> = grid
        .iter()
        .map(|&var| {
            let sd = var.sqrt();
            let simulated: Vec<f64> = (0..SIMULATIONS_PER_CANDIDATE)
                .map(|_| {
                    let c: f64 = chisq.sample(&mut rng);
                    let z: f64 = standard_normal.sample(&mut rng);
                    c.ln() + sd * z - df.ln()
                })
                .collect();
            let expected = histogram_density(&simulated);
            let small = observed
                .iter()
                .chain(&expected)
                .copied()
                .filter(|&d| d > 0.0)
                .fold(f64::INFINITY, f64::min);
            observed
                .iter()
                .zip(&expected)
                .filter(|(&o, _)| o > 0.0)
                .map(|(&o, &e)| o * ((o + small).ln() - (e + small).ln()))
                .sum()
        })
        .collect();

    let fine: Vec<f64> = (0..1000)
        .map(|i| i as f64 * MAX_CANDIDATE_VARIANCE / 999.0)
        .collect();
    let smoothed = local_quadratic_smooth(&grid, &divergences, &fine, SMOOTHER_SPAN);
    let best = smoothed
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| fine[i])
        .unwrap_or(MIN_PRIOR_VAR);

    log::debug!("Simulated prior variance for df={}: {:.4}", df, best);
    best.max(MIN_PRIOR_VAR)
}

/// Tricube-weighted local quadratic regression of `y` on `x`, evaluated at
/// each of `at`, using the nearest `span * n` points
fn local_quadratic_smooth(x: &[f64], y: &[f64], at: &[f64], span: f64) -> Vec<f64> {
    let usable: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(_, v)| v.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    let n = usable.len();
    if n == 0 {
        return vec![f64::NAN; at.len()];
    }
    let k = ((n as f64 * span).round() as usize).clamp(3.min(n), n);

    at.iter()
        .map(|&x0| {
            let mut by_distance: Vec<(f64, f64, f64)> = usable
                .iter()
                .map(|&(xi, yi)| ((xi - x0).abs(), xi - x0, yi))
                .collect();
            by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
            let neighbours = &by_distance[..k];
            let radius = neighbours[k - 1].0.max(1e-10) * 1.0001;

            let mut design = Array2::zeros((k, 3));
            let mut weights = Vec::with_capacity(k);
            let mut response = Vec::with_capacity(k);
            for (row, &(dist, dx, yi)) in neighbours.iter().enumerate() {
                design[[row, 0]] = 1.0;
                design[[row, 1]] = dx;
                design[[row, 2]] = dx * dx;
                let u = dist / radius;
                weights.push((1.0 - u.powi(3)).powi(3));
                response.push(yi);
            }

            let gram = weighted_gram(&design, &weights);
            let cross = weighted_cross(&design, &weights, &response);
            match solve_spd(&gram, &cross) {
                Some(beta) => beta[0],
                None => {
                    let w: f64 = weights.iter().sum();
                    weights.iter().zip(&response).map(|(a, b)| a * b).sum::<f64>() / w.max(1e-10)
                }
            }
        })
        .collect()
}

/// MAP dispersion for one gene.
///
/// Starts from the gene-wise estimate, or from the trend when the gene-wise
/// estimate is below a tenth of it. Falls back to a grid search over the
/// posterior when the line search does not converge. Genes without a finite
/// gene-wise or trended dispersion get NaN.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fit_map_dispersion(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    max_disp: f64,
    params: &DispersionParams,
) -> f64 {
    if !gene_disp.is_finite() || !trend_disp.is_finite() || trend_disp <= 0.0 {
        return f64::NAN;
    }

    let likelihood = GeneLikelihood {
        counts,
        mu,
        design,
        prior: Some(LogNormalPrior {
            mean: trend_disp.ln(),
            variance: prior_var,
        }),
    };

    let start = if gene_disp > 0.1 * trend_disp { gene_disp } else { trend_disp };
    let outcome = likelihood.line_search(start.ln(), params);

    let estimate = if outcome.converged {
        outcome.log_alpha.exp()
    } else {
        likelihood.grid_search(params.min_disp, max_disp)
    };
    estimate.clamp(params.min_disp, max_disp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_map_shrinks_toward_trend() {
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let counts = [60.0, 140.0, 95.0, 90.0, 210.0, 120.0];
        let mu = [98.3, 98.3, 98.3, 140.0, 140.0, 140.0];
        let params = DispersionParams::default();

        let gene_disp = 0.15;
        let trend_disp = 0.02;
        let map = fit_map_dispersion(&counts, &design, &mu, gene_disp, trend_disp, 0.5, 10.0, &params);
        assert!(map < gene_disp, "map {} should be below gene-wise {}", map, gene_disp);
        assert!(map > trend_disp, "map {} should be above trend {}", map, trend_disp);
    }

    #[test]
    fn test_map_nan_without_gene_estimate() {
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        let v = fit_map_dispersion(
            &[0.0; 4],
            &design,
            &[f64::NAN; 4],
            f64::NAN,
            0.1,
            1.0,
            10.0,
            &DispersionParams::default(),
        );
        assert!(v.is_nan());
    }

    #[test]
    fn test_prior_variance_moments_path() {
        // 10 samples, 2 coefficients: df = 8, trigamma(4) ~ 0.2838
        let trend = vec![0.1; 50];
        let genes: Vec<f64> = (0..50)
            .map(|i| 0.1 * (1.5 * ((i % 10) as f64 - 4.5) / 4.5).exp())
            .collect();
        let (prior, observed) = estimate_prior_variance(&genes, &trend, 10, 2, 1e-8);
        assert!(observed > 0.0);
        assert!((prior - (observed - trigamma(4.0)).max(0.25)).abs() < 1e-12);
    }

    #[test]
    fn test_prior_variance_floor_and_few_residuals() {
        let (prior, observed) = estimate_prior_variance(&[0.1, 0.1], &[0.1, 0.1], 10, 2, 1e-8);
        assert_eq!((prior, observed), (0.25, 0.25));

        // identical residuals: MAD is 0, prior floored
        let (prior, _) = estimate_prior_variance(&[0.2; 20], &[0.1; 20], 12, 2, 1e-8);
        assert_eq!(prior, 0.25);
    }

    #[test]
    fn test_simulated_prior_variance_is_reproducible() {
        let residuals: Vec<f64> = (0..300)
            .map(|i| 2.0 * ((i % 30) as f64 - 14.5) / 14.5)
            .collect();
        let a = simulated_prior_variance(&residuals, 2.0);
        let b = simulated_prior_variance(&residuals, 2.0);
        assert_eq!(a, b);
        assert!(a >= 0.25 && a <= MAX_CANDIDATE_VARIANCE);
    }

    #[test]
    fn test_local_quadratic_smooth_reproduces_parabola() {
        let x: Vec<f64> = (0..50).map(|i| i as f64 / 10.0).collect();
        let y: Vec<f64> = x.iter().map(|v| (v - 2.0).powi(2)).collect();
        let s = local_quadratic_smooth(&x, &y, &[1.0, 2.0, 3.05], 0.3);
        assert!((s[0] - 1.0).abs() < 1e-8);
        assert!(s[1].abs() < 1e-8);
        assert!((s[2] - 1.05f64.powi(2)).abs() < 1e-8);
    }
}
