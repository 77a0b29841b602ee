//! Core data structures for count data, sample annotations and model state

mod count_matrix;
mod dataset;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::TwoGroupDataSet;
pub use metadata::{ColumnValues, SampleMetadata};
