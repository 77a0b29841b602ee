//! expression_explorer: sample-level exploration and two-group differential
//! expression for RNA-seq count tables
//!
//! The crate covers four steps of an interactive analysis:
//! filtering a count matrix, projecting samples with PCA, assigning samples
//! to two comparison groups from a scatter selection, and testing every gene
//! for a difference between those groups with a negative binomial GLM.
//!
//! # Example
//!
//! ```ignore
//! use expression_explorer::prelude::*;
//!
//! let counts = read_count_matrix("counts.csv")?;
//! let metadata = read_metadata("metadata.csv")?;
//!
//! let pca = run_pca(&counts, &FilterParams::default(), &PcaParams::default())?;
//!
//! let mut store = GroupAssignmentStore::new();
//! store.define_group(GroupSlot::Group1, Some(&selection1), &hidden, &labels, "control");
//! store.define_group(GroupSlot::Group2, Some(&selection2), &hidden, &labels, "treated");
//!
//! let provider = NegativeBinomialProvider::default();
//! let results = run_differential_expression(&store, &counts, &metadata, &provider, &CancellationToken::new())?;
//! ```

pub mod cancel;
pub mod cli;
pub mod config;
pub mod data;
pub mod de;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod groups;
pub mod io;
pub mod linalg;
pub mod normalization;
pub mod pca;
pub mod stats;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::config::AnalysisConfig;
    pub use crate::data::{ColumnValues, CountMatrix, SampleMetadata, TwoGroupDataSet};
    pub use crate::de::{DeParams, DeResults, DeSummary, DifferentialExpressionProvider, NegativeBinomialProvider};
    pub use crate::dispersion::{estimate_dispersions, DispersionParams};
    pub use crate::error::{AnalysisError, Result};
    pub use crate::filter::{filter_counts, FilterParams, FilteredMatrix};
    pub use crate::glm::{fit_glm, GlmFitParams};
    pub use crate::groups::{GroupAssignment, GroupAssignmentStore, GroupSlot, SelectedPoint, TraceLabels};
    pub use crate::io::{
        export_file_stem, read_count_matrix, read_de_results, read_metadata, write_de_results,
        write_group_metadata, write_pca, ExportKind,
    };
    pub use crate::normalization::estimate_size_factors;
    pub use crate::pca::{compute_pca, AnnotatedPca, PcaParams, PcaResult};
    pub use crate::testing::{benjamini_hochberg, wald_test};
}

use prelude::*;

/// Filter the count matrix and project its samples
pub fn run_pca(counts: &CountMatrix, filter: &FilterParams, params: &PcaParams) -> Result<PcaResult> {
    let filtered = filter_counts(counts, filter)?;
    log::info!(
        "Filter kept {} of {} genes",
        filtered.n_genes(),
        counts.n_genes()
    );
    compute_pca(&filtered, params)
}

/// Compare the two groups held in `store`.
///
/// Fails with `MissingGroupDefinition` unless both slots are defined. The
/// store is only read.
pub fn run_differential_expression<P: DifferentialExpressionProvider + ?Sized>(
    store: &GroupAssignmentStore,
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    provider: &P,
    token: &CancellationToken,
) -> Result<DeResults> {
    let (group1, group2) = store.require_both()?;
    provider.run(counts, metadata, group1, group2, token)
}
