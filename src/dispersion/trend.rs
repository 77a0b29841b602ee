//! Mean-dispersion trend across genes

use ndarray::Array1;

use super::DispersionParams;
use crate::data::TwoGroupDataSet;
use crate::error::{AnalysisError, Result};
use crate::stats::trimmed_mean;

/// Genes with a gene-wise dispersion at or below this are left out of the fit
const MIN_DISP_FOR_FIT: f64 = 1e-6;
const RESIDUAL_LOW: f64 = 1e-4;
const RESIDUAL_HIGH: f64 = 15.0;
const OUTER_ITERATIONS: usize = 11;
const COEF_TOL: f64 = 1e-6;
const GAMMA_MAX_ITER: usize = 25;
const GAMMA_TOL: f64 = 1e-8;

/// Fitted trend `disp(mean) = asymptotic + extra_poisson / mean`
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DispersionTrend {
    pub asymptotic: f64,
    pub extra_poisson: f64,
}

impl DispersionTrend {
    pub fn at(&self, mean: f64) -> f64 {
        self.asymptotic + self.extra_poisson / mean
    }
}

/// Fit the dispersion trend and store trended dispersions on the dataset.
///
/// Tries the parametric fit first. When it fails the trend is flat at the
/// trimmed mean of the usable gene-wise estimates.
pub fn fit_dispersion_trend(ds: &mut TwoGroupDataSet, params: &DispersionParams) -> Result<()> {
    let gene_dispersions = ds
        .gene_dispersions()
        .ok_or_else(|| AnalysisError::TrendFittingFailed {
            reason: "gene-wise dispersions must be estimated first".to_string(),
        })?
        .clone();
    let means = ds.base_means().ok_or_else(|| AnalysisError::TrendFittingFailed {
        reason: "normalized counts required for trend fitting".to_string(),
    })?;

    let points: Vec<(f64, f64)> = means
        .iter()
        .zip(gene_dispersions.iter())
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > MIN_DISP_FOR_FIT)
        .map(|(&m, &d)| (m, d))
        .collect();

    let trended: Array1<f64> = match fit_parametric_trend(&points) {
        Ok(trend) => {
            log::debug!(
                "Dispersion trend: asymptotic={:.6}, extra_poisson={:.6}",
                trend.asymptotic,
                trend.extra_poisson
            );
            ds.set_dispersion_function(trend.asymptotic, trend.extra_poisson);
            means
                .iter()
                .zip(gene_dispersions.iter())
                .map(|(&m, &d)| if d.is_finite() && m > 0.0 { trend.at(m) } else { f64::NAN })
                .collect()
        }
        Err(e) => {
            let mean_disp = mean_dispersion(gene_dispersions.as_slice().unwrap_or(&[]), params.min_disp)?;
            log::info!(
                "{}; using the mean dispersion {:.6} as the trend instead",
                e,
                mean_disp
            );
            ds.set_dispersion_function(mean_disp, 0.0);
            gene_dispersions
                .iter()
                .map(|&d| if d.is_finite() { mean_disp } else { f64::NAN })
                .collect()
        }
    };

    ds.set_trended_dispersions(trended)
}

/// Trimmed (0.001) mean of gene-wise dispersions above 10 * min_disp
fn mean_dispersion(dispersions: &[f64], min_disp: f64) -> Result<f64> {
    let usable: Vec<f64> = dispersions
        .iter()
        .copied()
        .filter(|&d| d.is_finite() && d > 10.0 * min_disp)
        .collect();
    if usable.is_empty() {
        // every gene sits at the lower bound: the data look Poisson
        let finite: Vec<f64> = dispersions.iter().copied().filter(|d| d.is_finite()).collect();
        if finite.is_empty() {
            return Err(AnalysisError::TrendFittingFailed {
                reason: "no finite gene-wise dispersion to build a trend from".to_string(),
            });
        }
        return Ok(trimmed_mean(&finite, 0.001).max(min_disp));
    }
    Ok(trimmed_mean(&usable, 0.001))
}

/// Parametric fit with iterative residual filtering.
///
/// Each round keeps genes with `1e-4 < disp / fitted < 15`, refits the gamma
/// GLM from the current coefficients and stops once the squared log change of
/// both coefficients sums below 1e-6. Both coefficients must stay positive.
pub(crate) fn fit_parametric_trend(points: &[(f64, f64)]) -> Result<DispersionTrend> {
    if points.len() < 3 {
        return Err(AnalysisError::TrendFittingFailed {
            reason: format!("only {} usable genes for the parametric trend", points.len()),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);

    for iter in 0..OUTER_ITERATIONS {
        let old = coefs;

        let kept: Vec<(f64, f64)> = points
            .iter()
            .copied()
            .filter(|&(mean, disp)| {
                let fitted = coefs.0 + coefs.1 / mean;
                if fitted <= 0.0 {
                    return false;
                }
                let residual = disp / fitted;
                residual > RESIDUAL_LOW && residual < RESIDUAL_HIGH
            })
            .collect();

        if kept.len() < 3 {
            return Err(AnalysisError::TrendFittingFailed {
                reason: "too few genes left after residual filtering".to_string(),
            });
        }

        let (next, glm_converged) = fit_gamma_identity(&kept, coefs);
        coefs = next;
        log::debug!(
            "Trend iteration {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            kept.len(),
            coefs.0,
            coefs.1
        );

        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return Err(AnalysisError::TrendFittingFailed {
                reason: format!(
                    "parametric coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < COEF_TOL && glm_converged {
            return Ok(DispersionTrend {
                asymptotic: coefs.0,
                extra_poisson: coefs.1,
            });
        }
    }

    Err(AnalysisError::TrendFittingFailed {
        reason: "parametric trend did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(mean, disp)| {
            let mu = (a0 + a1 / mean).max(1e-8);
            2.0 * (-(disp / mu).ln() + (disp - mu) / mu)
        })
        .sum()
}

/// Gamma GLM with identity link, `disp ~ 1 + 1/mean`, by IRLS from `start`.
/// Returns the coefficients and whether the deviance converged.
fn fit_gamma_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..GAMMA_MAX_ITER {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(mean, disp) in data {
            let x = 1.0 / mean;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * disp;
            swxx += w * x * x;
            swxz += w * x * disp;
        }

        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < GAMMA_TOL {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }

    ((a0, a1), false)
}
