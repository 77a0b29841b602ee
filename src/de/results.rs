//! Differential expression result table

use serde::{Deserialize, Serialize};

/// One row per input gene, in input order. Untestable or filtered genes
/// carry NaN (written as `NA`) in every test-dependent column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeResults {
    pub gene_ids: Vec<String>,
    /// Mean normalized count over the two-group subset
    pub base_means: Vec<f64>,
    /// Effect of group2 relative to group1
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    /// Wald statistic
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    /// Benjamini-Hochberg adjusted p-values
    pub padj: Vec<f64>,
    /// Dispersion used in the final fit
    pub dispersions: Vec<f64>,
    pub gene_wise_dispersions: Vec<f64>,
    pub trended_dispersions: Vec<f64>,
    /// Largest Cook's distance per gene
    pub max_cooks: Vec<f64>,
    /// One per sample of the two-group subset, group1 first
    pub size_factors: Vec<f64>,
    /// Genes whose GLM fit did not converge
    pub non_converged: Vec<String>,
    pub group1_name: String,
    pub group2_name: String,
}

impl DeResults {
    /// Empty table with every numeric column NaN
    pub fn new(gene_ids: Vec<String>, group1_name: &str, group2_name: &str) -> Self {
        let n = gene_ids.len();
        Self {
            gene_ids,
            base_means: vec![f64::NAN; n],
            log2_fold_changes: vec![f64::NAN; n],
            lfc_se: vec![f64::NAN; n],
            stat: vec![f64::NAN; n],
            pvalues: vec![f64::NAN; n],
            padj: vec![f64::NAN; n],
            dispersions: vec![f64::NAN; n],
            gene_wise_dispersions: vec![f64::NAN; n],
            trended_dispersions: vec![f64::NAN; n],
            max_cooks: vec![f64::NAN; n],
            size_factors: Vec::new(),
            non_converged: Vec::new(),
            group1_name: group1_name.to_string(),
            group2_name: group2_name.to_string(),
        }
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Index of a gene by id
    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }

    /// Genes with `padj < alpha`
    pub fn significant_genes(&self, alpha: f64) -> Vec<&str> {
        self.gene_ids
            .iter()
            .zip(&self.padj)
            .filter(|(_, &p)| p.is_finite() && p < alpha)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Significant genes higher in group2 by at least `min_lfc`
    pub fn upregulated_genes(&self, alpha: f64, min_lfc: f64) -> Vec<&str> {
        self.gene_ids
            .iter()
            .zip(self.padj.iter().zip(&self.log2_fold_changes))
            .filter(|(_, (&p, &lfc))| p.is_finite() && p < alpha && lfc > 0.0 && lfc >= min_lfc)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Significant genes lower in group2 by at least `min_lfc`
    pub fn downregulated_genes(&self, alpha: f64, min_lfc: f64) -> Vec<&str> {
        self.gene_ids
            .iter()
            .zip(self.padj.iter().zip(&self.log2_fold_changes))
            .filter(|(_, (&p, &lfc))| p.is_finite() && p < alpha && lfc < 0.0 && lfc <= -min_lfc)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn summary(&self, alpha: f64) -> DeSummary {
        DeSummary {
            group1_name: self.group1_name.clone(),
            group2_name: self.group2_name.clone(),
            total_genes: self.n_genes(),
            genes_tested: self.pvalues.iter().filter(|p| p.is_finite()).count(),
            significant: self.significant_genes(alpha).len(),
            upregulated: self.upregulated_genes(alpha, 0.0).len(),
            downregulated: self.downregulated_genes(alpha, 0.0).len(),
            non_converged: self.non_converged.len(),
            alpha,
        }
    }
}

/// Counts of tested and significant genes at one alpha
#[derive(Debug, Clone)]
pub struct DeSummary {
    pub group1_name: String,
    pub group2_name: String,
    pub total_genes: usize,
    pub genes_tested: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub non_converged: usize,
    pub alpha: f64,
}

impl std::fmt::Display for DeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} vs {}", self.group2_name, self.group1_name)?;
        writeln!(f, "Total genes: {}", self.total_genes)?;
        writeln!(f, "Genes tested: {}", self.genes_tested)?;
        writeln!(f, "Significant (padj < {}): {}", self.alpha, self.significant)?;
        writeln!(f, "  Up in {}: {}", self.group2_name, self.upregulated)?;
        writeln!(f, "  Down in {}: {}", self.group2_name, self.downregulated)?;
        if self.non_converged > 0 {
            writeln!(f, "Fits not converged: {}", self.non_converged)?;
        }
        Ok(())
    }
}
