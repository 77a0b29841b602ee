//! Principal component analysis of samples in gene-expression space

mod engine;

pub use engine::{compute_pca, AnnotatedPca, PcaParams, PcaResult};
