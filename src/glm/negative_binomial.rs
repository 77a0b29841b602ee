//! Negative binomial distribution helpers, parameterized by mean and
//! dispersion (Var = mu + alpha * mu^2)

use statrs::function::gamma::ln_gamma;

/// Floor on fitted means inside the GLM
pub const MIN_MU: f64 = 0.5;

/// Any |beta| above this stops IRLS; the gene goes to the fallback optimizer.
/// 30 in natural log is a fold change beyond anything a count table supports.
pub const MAX_LFC_BETA: f64 = 30.0;

/// Clamp on the linear predictor so exp() stays finite
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// IRLS weight mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// Log probability of count `y` given mean `mu` and dispersion `alpha`
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let prob = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * prob.ln() + y * (1.0 - prob).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nb_mean_and_variance() {
        assert!((nb_mean(2.0, 1.5) - 1.5 * 2.0_f64.exp()).abs() < 1e-10);
        assert!((nb_variance(10.0, 0.1) - 20.0).abs() < 1e-12);
        assert!(nb_mean(1e6, 1.0).is_finite());
    }

    #[test]
    fn test_nb_log_likelihood_poisson_limit() {
        // dpois(5, 5) = exp(-5) 5^5 / 5!
        let poisson = (-5.0f64).exp() * 5.0f64.powi(5) / 120.0;
        let ll = nb_log_likelihood(5.0, 5.0, 1e-8);
        assert!((ll - poisson.ln()).abs() < 1e-5);
        assert_eq!(nb_log_likelihood(1.0, 0.0, 0.1), f64::NEG_INFINITY);
    }

    #[test]
    fn test_nb_weight() {
        assert!((nb_weight(10.0, 0.1) - 5.0).abs() < 1e-10);
    }
}
