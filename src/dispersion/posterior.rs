//! Cox-Reid adjusted log posterior of log(alpha) and its optimizers
//!
//! Shared by the gene-wise (no prior) and MAP (log-normal prior centred on
//! the trend) dispersion estimates. Optimization is a gradient line search
//! with the Armijo rule on log(alpha), with a coarse-then-fine grid search
//! as the fallback.

use ndarray::Array2;
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::linalg::{invert_spd, weighted_gram};

/// Hard bounds on log(alpha) for line search proposals
const MIN_LOG_ALPHA_HARD: f64 = -30.0;
const MAX_LOG_ALPHA_HARD: f64 = 10.0;
/// Armijo sufficient-increase constant
const ARMIJO_EPSILON: f64 = 1.0e-4;
const GRID_POINTS: usize = 20;

/// Normal prior on log(alpha)
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogNormalPrior {
    pub mean: f64,
    pub variance: f64,
}

/// Per-gene inputs that stay fixed while alpha is optimized
pub(crate) struct GeneLikelihood<'a> {
    pub counts: &'a [f64],
    pub mu: &'a [f64],
    pub design: &'a Array2<f64>,
    pub prior: Option<LogNormalPrior>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LineSearchOutcome {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
    pub converged: bool,
}

fn cox_reid_weights(mu: &[f64], alpha: f64) -> Vec<f64> {
    mu.iter()
        .map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha))
        .collect()
}

impl GeneLikelihood<'_> {
    /// Log posterior at `log_alpha`: NB log likelihood, minus half the log
    /// determinant of X'WX, plus the prior when present.
    pub fn log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;

        let mut ll_part = 0.0;
        for (&y, &m) in self.counts.iter().zip(self.mu) {
            let mu_i = m.max(1e-10);
            ll_part += ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv);
            ll_part -= y * (mu_i + alpha_inv).ln();
            ll_part -= alpha_inv * (1.0 + mu_i * alpha).ln();
        }

        let weights = cox_reid_weights(self.mu, alpha);
        let det = weighted_gram(self.design, &weights).determinant();
        let cr_term = if det > 1e-10 { -0.5 * det.ln() } else { 0.0 };

        let prior_part = match self.prior {
            Some(prior) => -0.5 * (log_alpha - prior.mean).powi(2) / prior.variance,
            None => 0.0,
        };

        ll_part + cr_term + prior_part
    }

    /// Analytic derivative of the log posterior with respect to log(alpha)
    pub fn d_log_posterior(&self, log_alpha: f64) -> f64 {
        let alpha = log_alpha.exp();
        let alpha_inv = 1.0 / alpha;

        let mut ll_sum = 0.0;
        for (&y, &m) in self.counts.iter().zip(self.mu) {
            let mu_i = m.max(1e-10);
            ll_sum += digamma(alpha_inv);
            ll_sum += (1.0 + mu_i * alpha).ln();
            ll_sum -= mu_i * alpha / (1.0 + mu_i * alpha);
            ll_sum -= digamma(y + alpha_inv);
            ll_sum += y / (mu_i + alpha_inv);
        }
        let ll_part = alpha_inv * alpha_inv * ll_sum;

        // d/dalpha of -0.5 log|B| = -0.5 tr(B^-1 dB), with dw/dalpha = -w^2
        let weights = cox_reid_weights(self.mu, alpha);
        let dweights: Vec<f64> = weights.iter().map(|w| -w * w).collect();
        let b = weighted_gram(self.design, &weights);
        let db = weighted_gram(self.design, &dweights);
        let cr_term = match invert_spd(&b) {
            Some(b_inv) => -0.5 * (b_inv * db).trace(),
            None => 0.0,
        };

        let prior_part = match self.prior {
            Some(prior) => -(log_alpha - prior.mean) / prior.variance,
            None => 0.0,
        };

        (ll_part + cr_term) * alpha + prior_part
    }

    /// Armijo line search from `log_alpha_init`.
    ///
    /// Converges when an accepted step improves the posterior by less than
    /// `disp_tol`, or when log(alpha) falls below log(min_disp / 10).
    pub fn line_search(&self, log_alpha_init: f64, params: &DispersionParams) -> LineSearchOutcome {
        let min_log_alpha = (params.min_disp / 10.0).ln();
        let kappa_0 = params.kappa_0;

        let mut log_alpha = log_alpha_init.clamp(MIN_LOG_ALPHA_HARD, MAX_LOG_ALPHA_HARD);
        let initial_lp = self.log_posterior(log_alpha);
        let mut lp = initial_lp;
        let mut dlp = self.d_log_posterior(log_alpha);
        let mut kappa = kappa_0;
        let mut accepted = 0usize;

        for iter in 0..params.maxit {
            let raw = log_alpha + kappa * dlp;
            if raw < MIN_LOG_ALPHA_HARD {
                kappa = (MIN_LOG_ALPHA_HARD - log_alpha) / dlp;
            }
            if raw > MAX_LOG_ALPHA_HARD {
                kappa = (MAX_LOG_ALPHA_HARD - log_alpha) / dlp;
            }
            let proposal = log_alpha + kappa * dlp;

            let lp_proposal = self.log_posterior(proposal);
            // theta = -lp is minimized
            let theta_kappa = -lp_proposal;
            let theta_hat_kappa = -lp - kappa * ARMIJO_EPSILON * dlp * dlp;

            if theta_kappa <= theta_hat_kappa {
                accepted += 1;
                log_alpha = proposal;
                let change = lp_proposal - lp;
                lp = lp_proposal;

                if change < params.disp_tol || log_alpha < min_log_alpha {
                    return LineSearchOutcome {
                        log_alpha,
                        initial_lp,
                        last_lp: lp,
                        iterations: iter + 1,
                        converged: true,
                    };
                }

                dlp = self.d_log_posterior(log_alpha);
                kappa = (kappa * 1.1).min(kappa_0);
                if accepted % 5 == 0 {
                    kappa /= 2.0;
                }
            } else {
                kappa /= 2.0;
            }
        }

        LineSearchOutcome {
            log_alpha,
            initial_lp,
            last_lp: lp,
            iterations: params.maxit,
            converged: false,
        }
    }

    /// Coarse grid over [log(min_disp), log(max_disp)], then a fine grid
    /// around the best coarse point. Returns alpha.
    pub fn grid_search(&self, min_disp: f64, max_disp: f64) -> f64 {
        let lo = min_disp.ln();
        let hi = max_disp.ln();
        let delta = (hi - lo) / (GRID_POINTS - 1) as f64;

        let best_coarse = self.argmax_on_grid(lo, delta);
        let fine_lo = best_coarse - delta;
        let fine_delta = 2.0 * delta / (GRID_POINTS - 1) as f64;
        self.argmax_on_grid(fine_lo, fine_delta).exp()
    }

    fn argmax_on_grid(&self, start: f64, step: f64) -> f64 {
        (0..GRID_POINTS)
            .map(|i| start + i as f64 * step)
            .map(|la| (la, self.log_posterior(la)))
            .filter(|(_, lp)| lp.is_finite())
            .fold((start, f64::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            })
            .0
    }
}
