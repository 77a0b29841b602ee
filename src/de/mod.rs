//! Two-group differential expression
//!
//! [`DifferentialExpressionProvider`] is the seam between the analysis
//! pipeline and whatever fits the model. [`NegativeBinomialProvider`] runs the
//! negative binomial workflow in-process: median-of-ratios size factors,
//! dispersion shrinkage toward a mean trend, an IRLS GLM fit, a Wald test on
//! the group coefficient, Cook's distance filtering and Benjamini-Hochberg
//! adjustment, in that order.

mod results;

pub use results::{DeResults, DeSummary};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::data::{CountMatrix, SampleMetadata, TwoGroupDataSet};
use crate::dispersion::{estimate_dispersions, DispersionParams};
use crate::error::{AnalysisError, Result};
use crate::filter::{calculate_cooks_distance, cooks_outliers, default_cooks_cutoff, max_cooks_per_gene};
use crate::glm::{fit_glm, GlmFitParams};
use crate::groups::GroupAssignment;
use crate::normalization::estimate_size_factors;
use crate::testing::{benjamini_hochberg, wald_test};

/// Minimum samples per group for the dispersion model to be estimable
pub const MIN_REPLICATES: usize = 2;

/// Parameters for a differential expression run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeParams {
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
    /// Cook's distance cutoff. `None` uses the 0.99 quantile of F(p, m - p).
    pub cooks_cutoff: Option<f64>,
    /// Significance level used for summaries
    pub alpha: f64,
}

impl Default for DeParams {
    fn default() -> Self {
        Self {
            dispersion: DispersionParams::default(),
            glm: GlmFitParams::default(),
            cooks_cutoff: None,
            alpha: 0.1,
        }
    }
}

/// Anything that can compare two sample groups on a count matrix.
///
/// Effects are reported as `group2` relative to `group1`. Implementations
/// must return one row per gene in `counts`, in its order, and must not
/// return a partial table when `token` fires.
pub trait DifferentialExpressionProvider {
    fn run(
        &self,
        counts: &CountMatrix,
        metadata: &SampleMetadata,
        group1: &GroupAssignment,
        group2: &GroupAssignment,
        token: &CancellationToken,
    ) -> Result<DeResults>;
}

/// In-process negative binomial GLM provider
#[derive(Debug, Clone, Default)]
pub struct NegativeBinomialProvider {
    pub params: DeParams,
}

impl NegativeBinomialProvider {
    pub fn new(params: DeParams) -> Self {
        Self { params }
    }
}

/// Reject group pairs that cannot form a contrast
fn validate_groups(group1: &GroupAssignment, group2: &GroupAssignment) -> Result<()> {
    for g in [group1, group2] {
        if g.len() < MIN_REPLICATES {
            return Err(AnalysisError::InsufficientReplicates {
                group: g.name.clone(),
                n: g.len(),
            });
        }
    }

    let set1: HashSet<&str> = group1.sample_ids.iter().map(String::as_str).collect();
    let set2: HashSet<&str> = group2.sample_ids.iter().map(String::as_str).collect();
    if set1 == set2 {
        return Err(AnalysisError::EmptyGroupOverlap {
            group1: group1.name.clone(),
            group2: group2.name.clone(),
        });
    }

    let shared: Vec<&str> = group1
        .sample_ids
        .iter()
        .map(String::as_str)
        .filter(|s| set2.contains(s))
        .collect();
    if !shared.is_empty() {
        return Err(AnalysisError::OverlappingGroups {
            group1: group1.name.clone(),
            group2: group2.name.clone(),
            shared: shared.join(", "),
        });
    }
    Ok(())
}

impl DifferentialExpressionProvider for NegativeBinomialProvider {
    fn run(
        &self,
        counts: &CountMatrix,
        metadata: &SampleMetadata,
        group1: &GroupAssignment,
        group2: &GroupAssignment,
        token: &CancellationToken,
    ) -> Result<DeResults> {
        validate_groups(group1, group2)?;

        let ordered: Vec<String> = group1
            .sample_ids
            .iter()
            .chain(group2.sample_ids.iter())
            .cloned()
            .collect();
        metadata.select_samples(&ordered)?;
        let mut ds = TwoGroupDataSet::from_groups(counts, group1, group2)?;

        log::info!(
            "Differential expression: '{}' ({} samples) vs '{}' ({} samples), {} genes",
            group2.name,
            group2.len(),
            group1.name,
            group1.len(),
            ds.n_genes()
        );

        token.check("size factor estimation")?;
        log::info!("Estimating size factors...");
        estimate_size_factors(&mut ds)?;
        token.check("dispersion estimation")?;

        estimate_dispersions(&mut ds, &self.params.dispersion, token)?;
        token.check("GLM fitting")?;

        log::info!("Fitting negative binomial GLM...");
        fit_glm(&mut ds, &self.params.glm, token)?;
        token.check("Wald test")?;

        collect_results(&ds, self.params.cooks_cutoff, token)
    }
}

/// Build the results table from a fitted dataset.
///
/// Test columns stay NA for genes that are untestable, have no finite
/// dispersion, did not converge or are flagged by Cook's distance. Every
/// gene keeps its `baseMean`.
fn collect_results(ds: &TwoGroupDataSet, cooks_cutoff: Option<f64>, token: &CancellationToken) -> Result<DeResults> {
    if !ds.has_glm_fit() {
        return Err(AnalysisError::InvalidInput {
            reason: "GLM must be fitted before results are collected".to_string(),
        });
    }
    let wald = wald_test(ds)?;

    let cooks = calculate_cooks_distance(ds)?;
    let cutoff = cooks_cutoff.or_else(|| default_cooks_cutoff(ds.n_samples(), ds.n_coefs()));
    let outliers = match cutoff {
        Some(c) => {
            log::debug!("Cook's distance cutoff: {:.4}", c);
            cooks_outliers(ds, &cooks, c)
        }
        None => vec![false; ds.n_genes()],
    };
    token.check("multiple testing correction")?;

    let testable = ds.testable_genes();
    let dispersions = ds
        .dispersions()
        .ok_or_else(|| AnalysisError::InvalidInput {
            reason: "dispersions missing after estimation".to_string(),
        })?
        .to_vec();
    let converged = ds.converged().cloned().unwrap_or_else(|| vec![false; ds.n_genes()]);
    let gene_ids = ds.counts().gene_ids().to_vec();

    let mut results = DeResults::new(gene_ids.clone(), ds.group1_name(), ds.group2_name());
    let mut non_converged = Vec::new();
    let mut n_outliers = 0;

    for i in 0..ds.n_genes() {
        let fitted = testable[i] && dispersions[i].is_finite();
        if fitted && !converged[i] {
            non_converged.push(gene_ids[i].clone());
        }
        if outliers[i] && testable[i] {
            n_outliers += 1;
        }
        if fitted && converged[i] && !outliers[i] {
            results.log2_fold_changes[i] = wald.log2_fold_changes[i];
            results.lfc_se[i] = wald.lfc_se[i];
            results.stat[i] = wald.stat[i];
            results.pvalues[i] = wald.pvalues[i];
        }
    }
    results.padj = benjamini_hochberg(&results.pvalues);

    if let Some(bm) = ds.base_means() {
        results.base_means = bm.to_vec();
    }
    results.dispersions = dispersions;
    if let Some(d) = ds.gene_dispersions() {
        results.gene_wise_dispersions = d.to_vec();
    }
    if let Some(d) = ds.trended_dispersions() {
        results.trended_dispersions = d.to_vec();
    }
    results.max_cooks = max_cooks_per_gene(&cooks);
    if let Some(sf) = ds.size_factors() {
        results.size_factors = sf.to_vec();
    }

    if !non_converged.is_empty() {
        log::warn!(
            "{} gene(s) did not converge and are reported as NA: {}",
            non_converged.len(),
            non_converged.iter().take(10).cloned().collect::<Vec<_>>().join(", ")
        );
    }
    if n_outliers > 0 {
        log::info!("{} gene(s) flagged as Cook's distance outliers", n_outliers);
    }
    results.non_converged = non_converged;

    log::info!(
        "Tested {} of {} genes",
        results.pvalues.iter().filter(|p| p.is_finite()).count(),
        results.n_genes()
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn group(name: &str, ids: &[&str]) -> GroupAssignment {
        GroupAssignment {
            name: name.to_string(),
            sample_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn example_inputs() -> (CountMatrix, SampleMetadata) {
        let counts = CountMatrix::new(
            array![
                [1000.0, 1100.0, 50.0, 60.0],
                [40.0, 50.0, 900.0, 1000.0],
                [500.0, 560.0, 530.0, 520.0],
                [300.0, 340.0, 320.0, 310.0],
                [800.0, 880.0, 850.0, 820.0]
            ],
            ["gene_a", "gene_b", "nc1", "nc2", "nc3"].iter().map(|s| s.to_string()).collect(),
            ["a1", "a2", "b1", "b2"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let mut metadata = SampleMetadata::new(counts.sample_ids().to_vec()).unwrap();
        metadata
            .add_condition("condition", vec!["A".into(), "A".into(), "B".into(), "B".into()])
            .unwrap();
        (counts, metadata)
    }

    #[test]
    fn test_two_genes_differ() {
        let (counts, metadata) = example_inputs();
        let res = NegativeBinomialProvider::default()
            .run(
                &counts,
                &metadata,
                &group("A", &["a1", "a2"]),
                &group("B", &["b1", "b2"]),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(res.gene_ids, counts.gene_ids());
        assert!(res.log2_fold_changes[0] < -1.0);
        assert!(res.log2_fold_changes[1] > 1.0);
        for i in 2..5 {
            assert!(res.log2_fold_changes[i].abs() < 0.5, "gene {} lfc {}", i, res.log2_fold_changes[i]);
            assert!(res.padj[i] > 0.1, "gene {} padj {}", i, res.padj[i]);
        }
        assert!(res.base_means.iter().all(|b| b.is_finite() && *b > 0.0));
        assert_eq!(res.size_factors.len(), 4);
        assert_eq!(res.group2_name, "B");
    }

    #[test]
    fn test_swapping_groups_negates_fold_change() {
        let (counts, metadata) = example_inputs();
        let provider = NegativeBinomialProvider::default();
        let token = CancellationToken::new();
        let a = group("A", &["a1", "a2"]);
        let b = group("B", &["b1", "b2"]);

        let forward = provider.run(&counts, &metadata, &a, &b, &token).unwrap();
        let reverse = provider.run(&counts, &metadata, &b, &a, &token).unwrap();

        for i in 0..forward.n_genes() {
            assert!((forward.log2_fold_changes[i] + reverse.log2_fold_changes[i]).abs() < 1e-3);
            assert!((forward.pvalues[i] - reverse.pvalues[i]).abs() < 1e-3);
            assert!((forward.padj[i] - reverse.padj[i]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_all_zero_gene_is_na_with_base_mean() {
        let counts = CountMatrix::new(
            array![
                [10.0, 12.0, 40.0, 44.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 7.0],
                [30.0, 28.0, 33.0, 31.0, 29.0],
                [50.0, 55.0, 52.0, 49.0, 51.0]
            ],
            ["g1", "zero", "g3", "g4"].iter().map(|s| s.to_string()).collect(),
            ["s1", "s2", "s3", "s4", "s5"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let metadata = SampleMetadata::new(counts.sample_ids().to_vec()).unwrap();
        let res = NegativeBinomialProvider::default()
            .run(
                &counts,
                &metadata,
                &group("x", &["s1", "s2"]),
                &group("y", &["s3", "s4"]),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(res.n_genes(), 4);
        assert_eq!(res.base_means[1], 0.0);
        assert!(res.log2_fold_changes[1].is_nan());
        assert!(res.pvalues[1].is_nan());
        assert!(res.padj[1].is_nan());
        assert!(res.pvalues[0].is_finite());
    }

    #[test]
    fn test_insufficient_replicates() {
        let (counts, metadata) = example_inputs();
        let err = NegativeBinomialProvider::default()
            .run(
                &counts,
                &metadata,
                &group("A", &["a1"]),
                &group("B", &["b1", "b2"]),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientReplicates { n: 1, .. }));
    }

    #[test]
    fn test_identical_groups() {
        let (counts, metadata) = example_inputs();
        let err = NegativeBinomialProvider::default()
            .run(
                &counts,
                &metadata,
                &group("A", &["a1", "a2"]),
                &group("B", &["a2", "a1"]),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyGroupOverlap { .. }));
    }

    #[test]
    fn test_partially_overlapping_groups() {
        let (counts, metadata) = example_inputs();
        let err = NegativeBinomialProvider::default()
            .run(
                &counts,
                &metadata,
                &group("A", &["a1", "a2"]),
                &group("B", &["a2", "b1"]),
                &CancellationToken::new(),
            )
            .unwrap_err();
        match err {
            AnalysisError::OverlappingGroups { shared, .. } => assert_eq!(shared, "a2"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unknown_sample() {
        let (counts, metadata) = example_inputs();
        let err = NegativeBinomialProvider::default()
            .run(
                &counts,
                &metadata,
                &group("A", &["a1", "a2"]),
                &group("B", &["b1", "zz"]),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownSample { .. }));
    }

    #[test]
    fn test_cancelled_run_returns_no_table() {
        let (counts, metadata) = example_inputs();
        let token = CancellationToken::new();
        token.cancel();
        let err = NegativeBinomialProvider::default()
            .run(
                &counts,
                &metadata,
                &group("A", &["a1", "a2"]),
                &group("B", &["b1", "b2"]),
                &token,
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled { .. }));
    }

    #[test]
    fn test_non_converged_gene_is_na_and_run_succeeds() {
        let (counts, _) = example_inputs();
        let token = CancellationToken::new();
        let mut ds = TwoGroupDataSet::from_groups(&counts, &group("A", &["a1", "a2"]), &group("B", &["b1", "b2"]))
            .unwrap();
        estimate_size_factors(&mut ds).unwrap();
        estimate_dispersions(&mut ds, &DispersionParams::default(), &token).unwrap();
        fit_glm(&mut ds, &GlmFitParams::default(), &token).unwrap();

        let mut converged = ds.converged().unwrap().clone();
        assert!(converged.iter().all(|&c| c));
        converged[1] = false;
        ds.set_converged(converged);

        let res = collect_results(&ds, None, &token).unwrap();
        assert_eq!(res.non_converged, vec!["gene_b"]);
        assert!(res.log2_fold_changes[1].is_nan());
        assert!(res.lfc_se[1].is_nan());
        assert!(res.stat[1].is_nan());
        assert!(res.pvalues[1].is_nan());
        assert!(res.padj[1].is_nan());
        assert!(res.base_means[1].is_finite() && res.base_means[1] > 0.0);
        for i in [0, 2, 3, 4] {
            assert!(res.log2_fold_changes[i].is_finite(), "gene {}", i);
            assert!(res.pvalues[i].is_finite(), "gene {}", i);
            assert!(res.padj[i].is_finite(), "gene {}", i);
        }
        assert!(res.summary(0.1).to_string().contains("not converged"));
    }

    #[test]
    fn test_results_need_a_fitted_model() {
        let (counts, _) = example_inputs();
        let ds = TwoGroupDataSet::from_groups(&counts, &group("A", &["a1", "a2"]), &group("B", &["b1", "b2"]))
            .unwrap();
        let err = collect_results(&ds, None, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput { .. }));
    }

    #[test]
    fn test_params_defaults() {
        let params: DeParams = serde_json::from_str(r#"{"alpha": 0.05}"#).unwrap();
        assert_eq!(params.alpha, 0.05);
        assert!(params.cooks_cutoff.is_none());
        assert_eq!(params.glm.maxit, 100);
    }
}
