//! Negative binomial GLM fitting for the two-group design

mod fitting;
mod negative_binomial;

pub use fitting::{fit_glm, fit_single_gene, GlmFitParams, GlmFitResult};
pub use negative_binomial::{nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_LFC_BETA, MIN_MU};
