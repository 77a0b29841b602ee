//! Count matrix representation for RNA-seq data

use std::collections::HashMap;

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{AnalysisError, Result};

/// Deduplicate gene names by appending _1, _2, etc. to repeated names
fn deduplicate_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for name in &names {
        *seen.entry(name.clone()).or_insert(0) += 1;
    }
    if !seen.values().any(|&c| c > 1) {
        return names;
    }
    seen.clear();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let count = seen.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            result.push(name);
        } else {
            let new_name = format!("{}_{}", name, *count - 1);
            log::warn!("Duplicate gene name '{}' renamed to '{}'", name, new_name);
            result.push(new_name);
        }
    }
    result
}

/// Genes-by-samples table of raw read counts.
///
/// Missing cells are stored as `NaN`; everything else must be a
/// non-negative finite number.
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if let Some(((g, s), v)) = counts
            .indexed_iter()
            .find(|(_, &x)| x < 0.0 || x.is_infinite())
        {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: format!(
                    "count for gene '{}' in sample '{}' is {}; counts must be non-negative and finite",
                    gene_ids[g], sample_ids[s], v
                ),
            });
        }

        {
            let mut seen = std::collections::HashSet::new();
            for id in &sample_ids {
                if !seen.insert(id) {
                    return Err(AnalysisError::InvalidCountMatrix {
                        reason: format!("sample ID '{}' appears more than once", id),
                    });
                }
            }
        }

        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0 || x.is_nan()) {
            return Err(AnalysisError::InvalidCountMatrix {
                reason: "all samples have 0 counts for all genes".to_string(),
            });
        }

        if counts.iter().any(|&x| !x.is_nan() && x != x.round()) {
            log::warn!(
                "Some count values are not integers; the negative-binomial model expects raw integer counts"
            );
        }

        let n_missing = counts.iter().filter(|x| x.is_nan()).count();
        if n_missing > 0 {
            log::warn!("Count matrix contains {} missing value(s)", n_missing);
        }

        let gene_ids = deduplicate_names(gene_ids);

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Raw counts as a view (genes x samples)
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// True if any cell of the gene's row is missing
    pub fn gene_has_missing(&self, gene_idx: usize) -> bool {
        self.counts.row(gene_idx).iter().any(|x| x.is_nan())
    }

    /// Sum of observed counts per sample (library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts
            .axis_iter(Axis(1))
            .map(|col| col.iter().filter(|x| !x.is_nan()).sum())
            .collect()
    }

    /// Subset to the named samples, in the order given
    pub fn select_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let indices = sample_ids
            .iter()
            .map(|id| {
                self.sample_index(id).ok_or_else(|| AnalysisError::UnknownSample {
                    sample_id: id.clone(),
                    source_name: "count matrix".to_string(),
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        Ok(Self {
            counts: self.counts.select(Axis(1), &indices),
            gene_ids: self.gene_ids.clone(),
            sample_ids: sample_ids.to_vec(),
        })
    }
}
