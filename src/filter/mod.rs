//! Gene filtering: low-expression filtering ahead of PCA, and Cook's
//! distance outlier detection inside differential expression

mod cooks;
mod expression;

pub use cooks::{
    calculate_cooks_distance, cooks_outliers, default_cooks_cutoff, max_cooks_per_gene,
    robust_method_of_moments_disp,
};
pub use expression::{filter_counts, FilterParams, FilteredMatrix};
