//! Selection events emitted by the rendering layer

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// One point picked in the scatter plot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedPoint {
    pub sample_id: String,
    /// Index of the visual category (trace) the point belongs to
    pub trace_index: usize,
}

impl SelectedPoint {
    pub fn new(sample_id: impl Into<String>, trace_index: usize) -> Self {
        Self {
            sample_id: sample_id.into(),
            trace_index,
        }
    }
}

/// Mapping from trace index to category label, as drawn by the renderer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceLabels {
    labels: HashMap<usize, String>,
}

impl TraceLabels {
    /// Labels for traces `0..labels.len()`
    pub fn from_ordered<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).enumerate().collect(),
        }
    }

    pub fn insert(&mut self, trace_index: usize, label: impl Into<String>) {
        self.labels.insert(trace_index, label.into());
    }

    pub fn label_of(&self, trace_index: usize) -> Option<&str> {
        self.labels.get(&trace_index).map(String::as_str)
    }
}

/// Sample ids of the points whose category is not hidden, first occurrence
/// order, duplicates removed.
///
/// A point whose trace has no known label cannot be matched against the
/// hidden set and is kept.
pub(crate) fn visible_samples(
    points: &[SelectedPoint],
    hidden: &HashSet<String>,
    trace_labels: &TraceLabels,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for point in points {
        match trace_labels.label_of(point.trace_index) {
            Some(label) if hidden.contains(label) => continue,
            Some(_) => {}
            None => log::warn!(
                "Selected sample '{}' has unknown trace index {}; keeping it",
                point.sample_id,
                point.trace_index
            ),
        }
        if seen.insert(point.sample_id.as_str()) {
            kept.push(point.sample_id.clone());
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_categories_are_dropped() {
        let labels = TraceLabels::from_ordered(["liver", "lung"]);
        let hidden: HashSet<String> = ["lung".to_string()].into_iter().collect();
        let points = vec![
            SelectedPoint::new("s1", 0),
            SelectedPoint::new("s2", 1),
            SelectedPoint::new("s1", 0),
            SelectedPoint::new("s3", 7),
        ];
        assert_eq!(visible_samples(&points, &hidden, &labels), vec!["s1", "s3"]);
    }
}
