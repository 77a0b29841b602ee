//! Error types for expression_explorer

use thiserror::Error;

/// Main error type for filtering, PCA, group assignment and DE operations
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid file format: {reason}")]
    InvalidFileFormat { reason: String },

    #[error("Filter retained no genes: {reason}")]
    EmptyFilterResult { reason: String },

    #[error("Invalid component count: requested {requested}, at most {max} available ({n_samples} samples x {n_genes} genes)")]
    InvalidComponentCount {
        requested: usize,
        max: usize,
        n_samples: usize,
        n_genes: usize,
    },

    #[error("Insufficient replicates: group '{group}' has {n} sample(s), at least 2 are required")]
    InsufficientReplicates { group: String, n: usize },

    #[error("Groups '{group1}' and '{group2}' contain exactly the same samples; no contrast is possible")]
    EmptyGroupOverlap { group1: String, group2: String },

    #[error("Groups '{group1}' and '{group2}' share samples: {shared}")]
    OverlappingGroups {
        group1: String,
        group2: String,
        shared: String,
    },

    #[error("Model did not converge for gene {gene_id}: {reason}")]
    ModelNonConvergence { gene_id: String, reason: String },

    #[error("Missing group definition: {missing} must be defined before running differential expression")]
    MissingGroupDefinition { missing: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Unknown sample '{sample_id}': not present in {source_name}")]
    UnknownSample {
        sample_id: String,
        source_name: String,
    },

    #[error("Missing values in gene {gene_id}")]
    MissingValues { gene_id: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Analysis cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
