//! Prevalence filter applied to raw counts ahead of PCA

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{AnalysisError, Result};

/// Parameters of the expression filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// A sample counts toward a gene's prevalence when its count is strictly above this
    pub min_count: f64,
    /// Minimum number of samples that must exceed `min_count`
    pub min_samples: usize,
    /// Apply `ln(1 + x)` to retained values
    pub log_transform: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_count: 10.0,
            min_samples: 3,
            log_transform: true,
        }
    }
}

/// Genes retained by [`filter_counts`], values optionally log-transformed
#[derive(Debug, Clone)]
pub struct FilteredMatrix {
    values: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    log_transformed: bool,
}

impl FilteredMatrix {
    /// Values (genes x samples)
    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_log_transformed(&self) -> bool {
        self.log_transformed
    }
}

/// Number of samples in which a gene's observed count is strictly above `min_count`.
/// Missing cells never count.
fn prevalence(row: ndarray::ArrayView1<'_, f64>, min_count: f64) -> usize {
    row.iter().filter(|&&x| !x.is_nan() && x > min_count).count()
}

/// Keep genes whose count exceeds `min_count` in at least `min_samples`
/// samples, then optionally apply `log1p` to what is left.
///
/// The threshold always sees raw counts. A retained gene must not contain
/// missing values.
pub fn filter_counts(matrix: &CountMatrix, params: &FilterParams) -> Result<FilteredMatrix> {
    if matrix.n_samples() == 0 {
        return Err(AnalysisError::EmptyFilterResult {
            reason: "count matrix has no sample columns".to_string(),
        });
    }

    let counts = matrix.counts();
    let keep: Vec<usize> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| prevalence(*row, params.min_count) >= params.min_samples)
        .map(|(i, _)| i)
        .collect();

    if keep.is_empty() {
        return Err(AnalysisError::EmptyFilterResult {
            reason: format!(
                "no gene has counts above {} in at least {} of {} samples; lower the thresholds",
                params.min_count,
                params.min_samples,
                matrix.n_samples()
            ),
        });
    }

    if let Some(&bad) = keep.iter().find(|&&i| matrix.gene_has_missing(i)) {
        return Err(AnalysisError::MissingValues {
            gene_id: matrix.gene_ids()[bad].clone(),
        });
    }

    let mut values = counts.select(Axis(0), &keep);
    if params.log_transform {
        values.mapv_inplace(f64::ln_1p);
    }

    log::info!(
        "Expression filter kept {} of {} genes (count > {} in >= {} samples)",
        keep.len(),
        matrix.n_genes(),
        params.min_count,
        params.min_samples
    );

    Ok(FilteredMatrix {
        values,
        gene_ids: keep.iter().map(|&i| matrix.gene_ids()[i].clone()).collect(),
        sample_ids: matrix.sample_ids().to_vec(),
        log_transformed: params.log_transform,
    })
}
