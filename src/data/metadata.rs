//! Per-sample metadata table

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Values of one metadata column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValues {
    /// Categorical factor; empty string marks a missing value
    Categorical(Vec<String>),
    /// Continuous variable; `NaN` marks a missing value
    Continuous(Vec<f64>),
}

impl ColumnValues {
    fn len(&self) -> usize {
        match self {
            ColumnValues::Categorical(v) => v.len(),
            ColumnValues::Continuous(v) => v.len(),
        }
    }

    /// Render one cell as text; missing values render as an empty string
    pub fn display(&self, idx: usize) -> String {
        match self {
            ColumnValues::Categorical(v) => v[idx].clone(),
            ColumnValues::Continuous(v) if v[idx].is_nan() => String::new(),
            ColumnValues::Continuous(v) => v[idx].to_string(),
        }
    }

    fn select(&self, indices: &[usize]) -> Self {
        match self {
            ColumnValues::Categorical(v) => {
                ColumnValues::Categorical(indices.iter().map(|&i| v[i].clone()).collect())
            }
            ColumnValues::Continuous(v) => ColumnValues::Continuous(indices.iter().map(|&i| v[i]).collect()),
        }
    }
}

/// Sample metadata: sample identifiers as the index and arbitrary
/// columns kept in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    columns: Vec<(String, ColumnValues)>,
}

impl SampleMetadata {
    /// Create new sample metadata with no columns
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                return Err(AnalysisError::InvalidMetadata {
                    reason: format!("sample ID '{}' appears more than once", id),
                });
            }
        }
        Ok(Self {
            sample_ids,
            columns: Vec::new(),
        })
    }

    fn add_column(&mut self, name: &str, values: ColumnValues) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(AnalysisError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        if self.column(name).is_some() {
            return Err(AnalysisError::InvalidMetadata {
                reason: format!("column '{}' already exists", name),
            });
        }
        self.columns.push((name.to_string(), values));
        Ok(())
    }

    /// Add a categorical column
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        self.add_column(name, ColumnValues::Categorical(values))
    }

    /// Add a continuous column
    pub fn add_continuous(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        self.add_column(name, ColumnValues::Continuous(values))
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnValues> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn columns(&self) -> &[(String, ColumnValues)] {
        &self.columns
    }

    /// Cells of one sample rendered as text, in column order
    pub fn row_display(&self, sample_idx: usize) -> Vec<String> {
        self.columns.iter().map(|(_, v)| v.display(sample_idx)).collect()
    }

    /// Subset to the named samples, in the order given
    pub fn select_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let indices = sample_ids
            .iter()
            .map(|id| {
                self.sample_index(id).ok_or_else(|| AnalysisError::UnknownSample {
                    sample_id: id.clone(),
                    source_name: "sample metadata".to_string(),
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(n, v)| (n.clone(), v.select(&indices)))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SampleMetadata {
        let mut meta = SampleMetadata::new(vec![
            "s1".to_string(),
            "s2".to_string(),
            "s3".to_string(),
        ])
        .unwrap();
        meta.add_condition(
            "treatment",
            vec!["control".to_string(), "control".to_string(), "treated".to_string()],
        )
        .unwrap();
        meta.add_continuous("age", vec![3.0, f64::NAN, 5.5]).unwrap();
        meta
    }

    #[test]
    fn test_columns_keep_order() {
        let meta = meta();
        assert_eq!(meta.column_names(), vec!["treatment", "age"]);
        assert_eq!(meta.row_display(1), vec!["control".to_string(), String::new()]);
        assert_eq!(meta.row_display(2), vec!["treated".to_string(), "5.5".to_string()]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut meta = meta();
        assert!(meta.add_condition("batch", vec!["a".to_string()]).is_err());
    }

    #[test]
    fn test_select_samples() {
        let sub = meta()
            .select_samples(&["s3".to_string(), "s1".to_string()])
            .unwrap();
        assert_eq!(sub.sample_ids(), &["s3", "s1"]);
        assert_eq!(
            sub.column("treatment"),
            Some(&ColumnValues::Categorical(vec!["treated".to_string(), "control".to_string()]))
        );
        assert!(meta().select_samples(&["s9".to_string()]).is_err());
    }

    #[test]
    fn test_duplicate_sample_ids_rejected() {
        assert!(SampleMetadata::new(vec!["a".to_string(), "a".to_string()]).is_err());
    }
}
