//! Wald test for the group2-versus-group1 coefficient

use super::pvalue::calculate_pvalue;
use crate::data::TwoGroupDataSet;
use crate::error::{AnalysisError, Result};

/// Index of the group indicator column in the two-group design
const GROUP_COEF: usize = 1;

/// Per-gene Wald results on the log2 scale, before any NA filtering
#[derive(Debug, Clone)]
pub struct WaldStatistics {
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
}

/// Wald statistic `beta / se` for the group coefficient and its two-sided
/// normal p-value. Fold changes and their standard errors are converted from
/// natural log to log2. A gene with a non-positive or non-finite standard
/// error gets NaN statistic and p-value.
pub fn wald_test(ds: &TwoGroupDataSet) -> Result<WaldStatistics> {
    let coefficients = ds.coefficients().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "GLM must be fitted before testing".to_string(),
    })?;
    let standard_errors = ds.standard_errors().ok_or_else(|| AnalysisError::InvalidInput {
        reason: "standard errors not available".to_string(),
    })?;
    if coefficients.ncols() <= GROUP_COEF {
        return Err(AnalysisError::DimensionMismatch {
            expected: format!("at least {} coefficients", GROUP_COEF + 1),
            got: coefficients.ncols().to_string(),
        });
    }

    let ln2 = std::f64::consts::LN_2;
    let n_genes = ds.n_genes();
    let mut out = WaldStatistics {
        log2_fold_changes: Vec::with_capacity(n_genes),
        lfc_se: Vec::with_capacity(n_genes),
        stat: Vec::with_capacity(n_genes),
        pvalues: Vec::with_capacity(n_genes),
    };

    for i in 0..n_genes {
        let beta = coefficients[[i, GROUP_COEF]];
        let se = standard_errors[[i, GROUP_COEF]];
        let stat = if se > 0.0 && se.is_finite() && beta.is_finite() {
            beta / se
        } else {
            f64::NAN
        };
        out.log2_fold_changes.push(beta / ln2);
        out.lfc_se.push(se / ln2);
        out.stat.push(stat);
        out.pvalues.push(calculate_pvalue(stat));
    }

    Ok(out)
}
