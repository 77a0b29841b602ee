//! Sample PCA via eigen-decomposition of the sample Gram matrix
//!
//! Samples are observations and genes are features. With far fewer samples
//! than genes, the `n x n` Gram matrix `Xc * Xc^T` of the gene-centered data
//! carries the same non-zero spectrum as the gene covariance matrix, so the
//! decomposition stays small regardless of how many genes survive filtering.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::data::SampleMetadata;
use crate::error::{AnalysisError, Result};
use crate::filter::FilteredMatrix;

/// PCA parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaParams {
    pub n_components: usize,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self { n_components: 2 }
    }
}

/// Low-dimensional embedding of the samples
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaResult {
    sample_ids: Vec<String>,
    /// Scores (samples x components)
    scores: Array2<f64>,
    /// Variance explained by each axis
    explained_variance: Vec<f64>,
    /// Percent of total variance per axis, unrounded
    variance_ratios: Vec<f64>,
}

impl PcaResult {
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_components(&self) -> usize {
        self.scores.ncols()
    }

    /// Scores (samples x components)
    pub fn scores(&self) -> &Array2<f64> {
        &self.scores
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// Percent of total variance captured by each axis
    pub fn variance_ratios(&self) -> &[f64] {
        &self.variance_ratios
    }

    /// Variance ratios rounded to two decimals, as shown on axis titles
    pub fn rounded_variance_ratios(&self) -> Vec<f64> {
        self.variance_ratios
            .iter()
            .map(|r| (r * 100.0).round() / 100.0)
            .collect()
    }

    /// Axis title such as `PC1 (45.67%)`; `axis` is zero-based
    pub fn axis_label(&self, axis: usize) -> Option<String> {
        self.variance_ratios
            .get(axis)
            .map(|r| format!("PC{} ({:.2}%)", axis + 1, r))
    }

    pub fn coordinates_of(&self, sample_id: &str) -> Option<ArrayView1<'_, f64>> {
        self.sample_ids
            .iter()
            .position(|s| s == sample_id)
            .map(|i| self.scores.row(i))
    }

    /// Left-join sample metadata onto the embedding by sample id.
    /// Samples absent from the metadata get empty cells.
    pub fn join_metadata(&self, metadata: &SampleMetadata) -> AnnotatedPca {
        let columns: Vec<String> = metadata.column_names().iter().map(|s| s.to_string()).collect();
        let rows = self
            .sample_ids
            .iter()
            .map(|id| match metadata.sample_index(id) {
                Some(idx) => metadata.row_display(idx),
                None => vec![String::new(); columns.len()],
            })
            .collect();
        AnnotatedPca {
            pca: self.clone(),
            columns,
            rows,
        }
    }
}

/// PCA scores with metadata columns attached for display
#[derive(Debug, Clone)]
pub struct AnnotatedPca {
    pub pca: PcaResult,
    /// Metadata column names, in metadata order
    pub columns: Vec<String>,
    /// One row of metadata cells per sample, aligned with `pca.sample_ids()`
    pub rows: Vec<Vec<String>>,
}

/// Eigenvalues closer than this, relative to the largest, count as tied
const TIE_TOL: f64 = 1e-10;

/// Index of the first entry of largest magnitude
fn pivot_index(values: impl Iterator<Item = f64>) -> usize {
    values
        .enumerate()
        .fold((0usize, 0.0f64), |best, (i, v)| if v.abs() > best.1 { (i, v.abs()) } else { best })
        .0
}

/// Solver indices sorted by decreasing eigenvalue.
///
/// Runs of tied eigenvalues are re-sorted by the pivot sample of each
/// eigenvector and then by solver index, so the order never depends on how
/// the solver happens to list a repeated eigenvalue.
fn component_order(eigenvalues: &[f64], eigenvectors: &DMatrix<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]).then(a.cmp(&b)));

    let largest = eigenvalues.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let tol = TIE_TOL * largest;

    let mut start = 0;
    while start < order.len() {
        let head = eigenvalues[order[start]];
        let mut end = start + 1;
        while end < order.len() && (head - eigenvalues[order[end]]).abs() <= tol {
            end += 1;
        }
        order[start..end].sort_by_key(|&idx| (pivot_index(eigenvectors.column(idx).iter().copied()), idx));
        start = end;
    }
    order
}

/// Run PCA on a filtered matrix, treating each sample as one observation.
///
/// Axes are ordered by decreasing explained variance. Eigenvalues equal up to
/// rounding are ordered by the first sample carrying the eigenvector's
/// largest-magnitude loading, then by solver position. Each axis is oriented
/// so that its score of largest magnitude is positive.
pub fn compute_pca(matrix: &FilteredMatrix, params: &PcaParams) -> Result<PcaResult> {
    let n_samples = matrix.n_samples();
    let n_genes = matrix.n_genes();
    let max = n_samples.min(n_genes);
    let k = params.n_components;

    if k == 0 || k > max {
        return Err(AnalysisError::InvalidComponentCount {
            requested: k,
            max,
            n_samples,
            n_genes,
        });
    }

    // samples x genes, centered per gene
    let mut x = matrix.values().t().to_owned();
    for mut column in x.axis_iter_mut(Axis(1)) {
        let mean = column.sum() / n_samples as f64;
        column.mapv_inplace(|v| v - mean);
    }

    let gram = x.dot(&x.t());
    let gram = DMatrix::from_fn(n_samples, n_samples, |i, j| gram[[i, j]]);
    let total: f64 = gram.trace();

    let eigen = SymmetricEigen::new(gram);

    let order = component_order(eigen.eigenvalues.as_slice(), &eigen.eigenvectors);

    let denom = (n_samples.max(2) - 1) as f64;
    let mut scores = Array2::zeros((n_samples, k));
    let mut explained_variance = Vec::with_capacity(k);
    let mut variance_ratios = Vec::with_capacity(k);

    for (axis, &idx) in order.iter().take(k).enumerate() {
        let lambda = eigen.eigenvalues[idx].max(0.0);
        let vector = eigen.eigenvectors.column(idx);
        let scale = lambda.sqrt();

        let mut axis_scores: Vec<f64> = vector.iter().map(|v| v * scale).collect();

        let pivot = pivot_index(axis_scores.iter().copied());
        if axis_scores[pivot] < 0.0 {
            axis_scores.iter_mut().for_each(|s| *s = -*s);
        }

        for (i, s) in axis_scores.into_iter().enumerate() {
            scores[[i, axis]] = s;
        }
        explained_variance.push(lambda / denom);
        variance_ratios.push(if total > 0.0 { lambda / total * 100.0 } else { 0.0 });
    }

    if total <= 0.0 {
        log::warn!("All samples are identical after filtering; every axis explains 0% of variance");
    }

    log::info!(
        "PCA on {} samples x {} genes: {}",
        n_samples,
        n_genes,
        variance_ratios
            .iter()
            .enumerate()
            .map(|(i, r)| format!("PC{} {:.2}%", i + 1, r))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(PcaResult {
        sample_ids: matrix.sample_ids().to_vec(),
        scores,
        explained_variance,
        variance_ratios,
    })
}
