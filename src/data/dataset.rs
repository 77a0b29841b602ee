//! TwoGroupDataSet - state carried through the differential expression stages

use ndarray::{Array1, Array2};

use super::CountMatrix;
use crate::error::{AnalysisError, Result};
use crate::groups::GroupAssignment;

/// Count data restricted to two sample groups plus every intermediate
/// estimate produced while fitting the negative binomial model.
///
/// Columns are the group1 samples followed by the group2 samples. The
/// design has an intercept and one indicator column that is 1 for group2,
/// so the second coefficient is the group2-vs-group1 effect.
#[derive(Debug, Clone)]
pub struct TwoGroupDataSet {
    counts: CountMatrix,
    group1_name: String,
    group2_name: String,
    in_group2: Vec<bool>,
    design: Array2<f64>,

    // Normalization results
    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    // Dispersion estimation results
    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    map_dispersions: Option<Array1<f64>>,
    /// Expected counts from gene-wise estimation, reused by the MAP step
    mu: Option<Array2<f64>>,
    /// (asymptotic, extra-Poisson) trend coefficients; extra-Poisson is 0 for the mean fallback
    dispersion_function: Option<(f64, f64)>,
    dispersion_prior_var: Option<f64>,
    var_log_disp_ests: Option<f64>,
    dispersion_outliers: Option<Vec<bool>>,

    // GLM results
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    hat_diagonals: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,
}

impl TwoGroupDataSet {
    /// Restrict `counts` to `group1 ∪ group2`, group1 columns first, each in
    /// the order given by its assignment.
    pub fn from_groups(
        counts: &CountMatrix,
        group1: &GroupAssignment,
        group2: &GroupAssignment,
    ) -> Result<Self> {
        let ordered: Vec<String> = group1
            .sample_ids
            .iter()
            .chain(group2.sample_ids.iter())
            .cloned()
            .collect();
        let subset = counts.select_samples(&ordered)?;

        let in_group2: Vec<bool> = (0..ordered.len())
            .map(|j| j >= group1.sample_ids.len())
            .collect();

        Self::new(subset, &group1.name, &group2.name, in_group2)
    }

    pub fn new(
        counts: CountMatrix,
        group1_name: &str,
        group2_name: &str,
        in_group2: Vec<bool>,
    ) -> Result<Self> {
        if in_group2.len() != counts.n_samples() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} group labels", counts.n_samples()),
                got: format!("{}", in_group2.len()),
            });
        }

        let n1 = in_group2.iter().filter(|&&g| !g).count();
        let n2 = in_group2.len() - n1;
        if n1 == 0 || n2 == 0 {
            return Err(AnalysisError::InvalidInput {
                reason: "both groups need at least one sample".to_string(),
            });
        }

        let mut design = Array2::zeros((in_group2.len(), 2));
        for (i, &g2) in in_group2.iter().enumerate() {
            design[[i, 0]] = 1.0;
            if g2 {
                design[[i, 1]] = 1.0;
            }
        }

        Ok(Self {
            counts,
            group1_name: group1_name.to_string(),
            group2_name: group2_name.to_string(),
            in_group2,
            design,
            size_factors: None,
            normalized_counts: None,
            gene_dispersions: None,
            trended_dispersions: None,
            map_dispersions: None,
            mu: None,
            dispersion_function: None,
            dispersion_prior_var: None,
            var_log_disp_ests: None,
            dispersion_outliers: None,
            coefficients: None,
            standard_errors: None,
            hat_diagonals: None,
            converged: None,
        })
    }

    // Getters
    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn group1_name(&self) -> &str {
        &self.group1_name
    }

    pub fn group2_name(&self) -> &str {
        &self.group2_name
    }

    pub fn in_group2(&self) -> &[bool] {
        &self.in_group2
    }

    pub fn design_matrix(&self) -> &Array2<f64> {
        &self.design
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn n_coefs(&self) -> usize {
        self.design.ncols()
    }

    /// Genes that can enter the model: no missing values and at least one
    /// non-zero count within the two-group subset.
    pub fn testable_genes(&self) -> Vec<bool> {
        let counts = self.counts.counts();
        counts
            .rows()
            .into_iter()
            .map(|row| row.iter().all(|c| !c.is_nan()) && row.iter().any(|&c| c > 0.0))
            .collect()
    }

    /// Mean normalized count per gene, ignoring missing cells
    pub fn base_means(&self) -> Option<Array1<f64>> {
        let normalized = self.normalized_counts.as_ref()?;
        Some(
            normalized
                .rows()
                .into_iter()
                .map(|row| {
                    let (sum, n) = row
                        .iter()
                        .filter(|v| !v.is_nan())
                        .fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
                    if n == 0 {
                        f64::NAN
                    } else {
                        sum / n as f64
                    }
                })
                .collect(),
        )
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    pub fn map_dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    /// Final dispersions: MAP when available, otherwise gene-wise
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions
            .as_ref()
            .or(self.gene_dispersions.as_ref())
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn dispersion_function(&self) -> Option<(f64, f64)> {
        self.dispersion_function
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn var_log_disp_ests(&self) -> Option<f64> {
        self.var_log_disp_ests
    }

    pub fn dispersion_outliers(&self) -> Option<&Vec<bool>> {
        self.dispersion_outliers.as_ref()
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn hat_diagonals(&self) -> Option<&Array2<f64>> {
        self.hat_diagonals.as_ref()
    }

    pub fn converged(&self) -> Option<&Vec<bool>> {
        self.converged.as_ref()
    }

    pub fn has_glm_fit(&self) -> bool {
        self.coefficients.is_some()
    }

    // Setters (for internal use during analysis)
    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{}", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&x| !x.is_finite() || x <= 0.0) {
            return Err(AnalysisError::InvalidInput {
                reason: "size factors must be positive finite values".to_string(),
            });
        }
        let mut normalized = self.counts.counts().to_owned();
        for (j, &s) in size_factors.iter().enumerate() {
            normalized.column_mut(j).mapv_inplace(|c| c / s);
        }
        self.size_factors = Some(size_factors);
        self.normalized_counts = Some(normalized);
        Ok(())
    }

    fn check_gene_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.n_genes() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{}", len),
            });
        }
        Ok(())
    }

    fn check_gene_by_sample(&self, m: &Array2<f64>, what: &str) -> Result<()> {
        if m.nrows() != self.n_genes() || m.ncols() != self.n_samples() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{}x{} {}", self.n_genes(), self.n_samples(), what),
                got: format!("{}x{}", m.nrows(), m.ncols()),
            });
        }
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "dispersions")?;
        self.gene_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_trended_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "dispersions")?;
        self.trended_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_map_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "dispersions")?;
        self.map_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_mu(&mut self, mu: Array2<f64>) -> Result<()> {
        self.check_gene_by_sample(&mu, "mu matrix")?;
        self.mu = Some(mu);
        Ok(())
    }

    pub fn set_dispersion_function(&mut self, asympt_disp: f64, extra_pois: f64) {
        self.dispersion_function = Some((asympt_disp, extra_pois));
    }

    pub fn set_dispersion_prior_var(&mut self, var: f64) {
        self.dispersion_prior_var = Some(var);
    }

    pub fn set_var_log_disp_ests(&mut self, var: f64) {
        self.var_log_disp_ests = Some(var);
    }

    pub fn set_dispersion_outliers(&mut self, outliers: Vec<bool>) {
        self.dispersion_outliers = Some(outliers);
    }

    pub fn set_coefficients(&mut self, coefficients: Array2<f64>) -> Result<()> {
        self.check_gene_len(coefficients.nrows(), "genes")?;
        self.coefficients = Some(coefficients);
        Ok(())
    }

    pub fn set_standard_errors(&mut self, se: Array2<f64>) -> Result<()> {
        self.check_gene_len(se.nrows(), "genes")?;
        self.standard_errors = Some(se);
        Ok(())
    }

    pub fn set_hat_diagonals(&mut self, h: Array2<f64>) -> Result<()> {
        self.check_gene_by_sample(&h, "hat diagonals")?;
        self.hat_diagonals = Some(h);
        Ok(())
    }

    pub fn set_converged(&mut self, converged: Vec<bool>) {
        self.converged = Some(converged);
    }
}
