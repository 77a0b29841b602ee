//! Session-scoped store of the two comparison groups

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::selection::{visible_samples, SelectedPoint, TraceLabels};
use crate::error::{AnalysisError, Result};

/// The two comparison slots. Effects are reported as `Group2` relative to `Group1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupSlot {
    Group1,
    Group2,
}

impl GroupSlot {
    pub fn other(self) -> Self {
        match self {
            GroupSlot::Group1 => GroupSlot::Group2,
            GroupSlot::Group2 => GroupSlot::Group1,
        }
    }
}

impl fmt::Display for GroupSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupSlot::Group1 => write!(f, "group1"),
            GroupSlot::Group2 => write!(f, "group2"),
        }
    }
}

/// A named, non-empty set of samples
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAssignment {
    pub name: String,
    /// Sample ids in selection order, no duplicates
    pub sample_ids: Vec<String>,
}

impl GroupAssignment {
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }
}

/// Holds at most one assignment per slot. Plain data, so a host can keep it
/// in per-session storage and serialize it between requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAssignmentStore {
    group1: Option<GroupAssignment>,
    group2: Option<GroupAssignment>,
}

impl GroupAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, slot: GroupSlot) -> &mut Option<GroupAssignment> {
        match slot {
            GroupSlot::Group1 => &mut self.group1,
            GroupSlot::Group2 => &mut self.group2,
        }
    }

    pub fn get(&self, slot: GroupSlot) -> Option<&GroupAssignment> {
        match slot {
            GroupSlot::Group1 => self.group1.as_ref(),
            GroupSlot::Group2 => self.group2.as_ref(),
        }
    }

    pub fn clear(&mut self, slot: GroupSlot) {
        *self.slot_mut(slot) = None;
    }

    /// Define the group held in `slot` from a scatter selection.
    ///
    /// - `selection == None` means no selection event happened: the call is a
    ///   no-op and the slot keeps its previous value.
    /// - Points whose category label is in `hidden` are dropped.
    /// - If nothing survives, or `name` is blank, the slot is cleared and
    ///   `None` is returned.
    /// - Otherwise the new assignment replaces the slot's value.
    ///
    /// The other slot is never touched.
    pub fn define_group(
        &mut self,
        slot: GroupSlot,
        selection: Option<&[SelectedPoint]>,
        hidden: &HashSet<String>,
        trace_labels: &TraceLabels,
        name: &str,
    ) -> Option<GroupAssignment> {
        let points = match selection {
            Some(points) => points,
            None => {
                log::debug!("No selection event for {}; keeping current assignment", slot);
                return None;
            }
        };

        let samples = visible_samples(points, hidden, trace_labels);
        let name = name.trim();

        if samples.is_empty() || name.is_empty() {
            log::info!(
                "Cleared {} ({} visible sample(s), name {:?})",
                slot,
                samples.len(),
                name
            );
            self.clear(slot);
            return None;
        }

        let assignment = GroupAssignment {
            name: name.to_string(),
            sample_ids: samples,
        };

        if let Some(other) = self.get(slot.other()) {
            let shared = shared_samples(&assignment, other);
            if !shared.is_empty() {
                log::warn!(
                    "{} '{}' shares {} sample(s) with {} '{}'; differential expression will refuse overlapping groups",
                    slot,
                    assignment.name,
                    shared.len(),
                    slot.other(),
                    other.name
                );
            }
        }

        log::info!("Defined {} '{}' with {} sample(s)", slot, assignment.name, assignment.len());
        *self.slot_mut(slot) = Some(assignment.clone());
        Some(assignment)
    }

    /// Both assignments, or `MissingGroupDefinition` naming every empty slot
    pub fn require_both(&self) -> Result<(&GroupAssignment, &GroupAssignment)> {
        match (self.group1.as_ref(), self.group2.as_ref()) {
            (Some(g1), Some(g2)) => Ok((g1, g2)),
            (None, None) => Err(AnalysisError::MissingGroupDefinition {
                missing: "group1 and group2".to_string(),
            }),
            (None, Some(_)) => Err(AnalysisError::MissingGroupDefinition {
                missing: "group1".to_string(),
            }),
            (Some(_), None) => Err(AnalysisError::MissingGroupDefinition {
                missing: "group2".to_string(),
            }),
        }
    }

    /// Samples assigned to both slots, in group1 order
    pub fn overlap(&self) -> Vec<String> {
        match (self.group1.as_ref(), self.group2.as_ref()) {
            (Some(g1), Some(g2)) => shared_samples(g1, g2),
            _ => Vec::new(),
        }
    }
}

fn shared_samples(a: &GroupAssignment, b: &GroupAssignment) -> Vec<String> {
    let other: HashSet<&str> = b.sample_ids.iter().map(String::as_str).collect();
    a.sample_ids
        .iter()
        .filter(|s| other.contains(s.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> TraceLabels {
        TraceLabels::from_ordered(["control", "treated", "outlier"])
    }

    fn points(ids: &[(&str, usize)]) -> Vec<SelectedPoint> {
        ids.iter().map(|(s, t)| SelectedPoint::new(*s, *t)).collect()
    }

    #[test]
    fn test_define_group_materializes() {
        let mut store = GroupAssignmentStore::new();
        let sel = points(&[("s1", 0), ("s2", 0)]);
        let g = store
            .define_group(GroupSlot::Group1, Some(&sel), &HashSet::new(), &labels(), "  ctrl ")
            .unwrap();
        assert_eq!(g.name, "ctrl");
        assert_eq!(g.sample_ids, vec!["s1", "s2"]);
        assert_eq!(store.get(GroupSlot::Group1), Some(&g));
        assert!(store.get(GroupSlot::Group2).is_none());
    }

    #[test]
    fn test_hidden_category_point_is_excluded() {
        let mut store = GroupAssignmentStore::new();
        let hidden: HashSet<String> = ["outlier".to_string()].into_iter().collect();
        let sel = points(&[("s1", 1), ("s9", 2), ("s2", 1)]);
        let g = store
            .define_group(GroupSlot::Group2, Some(&sel), &hidden, &labels(), "treated")
            .unwrap();
        assert_eq!(g.sample_ids, vec!["s1", "s2"]);
        assert!(!g.sample_ids.contains(&"s9".to_string()));
    }

    #[test]
    fn test_no_event_keeps_previous_value() {
        let mut store = GroupAssignmentStore::new();
        let sel = points(&[("s1", 0), ("s2", 0)]);
        store.define_group(GroupSlot::Group1, Some(&sel), &HashSet::new(), &labels(), "ctrl");
        let out = store.define_group(GroupSlot::Group1, None, &HashSet::new(), &labels(), "ctrl");
        assert!(out.is_none());
        assert_eq!(store.get(GroupSlot::Group1).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_selection_clears_slot() {
        let mut store = GroupAssignmentStore::new();
        let sel = points(&[("s1", 0), ("s2", 0)]);
        store.define_group(GroupSlot::Group1, Some(&sel), &HashSet::new(), &labels(), "ctrl");
        let out = store.define_group(GroupSlot::Group1, Some(&[]), &HashSet::new(), &labels(), "ctrl");
        assert!(out.is_none());
        assert!(store.get(GroupSlot::Group1).is_none());
    }

    #[test]
    fn test_all_hidden_clears_slot() {
        let mut store = GroupAssignmentStore::new();
        let hidden: HashSet<String> = ["control".to_string()].into_iter().collect();
        let sel = points(&[("s1", 0)]);
        assert!(store
            .define_group(GroupSlot::Group1, Some(&sel), &hidden, &labels(), "ctrl")
            .is_none());
        assert!(store.get(GroupSlot::Group1).is_none());
    }

    #[test]
    fn test_blank_name_clears_slot() {
        let mut store = GroupAssignmentStore::new();
        let sel = points(&[("s1", 0)]);
        store.define_group(GroupSlot::Group2, Some(&sel), &HashSet::new(), &labels(), "x");
        assert!(store
            .define_group(GroupSlot::Group2, Some(&sel), &HashSet::new(), &labels(), "   ")
            .is_none());
        assert!(store.get(GroupSlot::Group2).is_none());
    }

    #[test]
    fn test_slots_are_independent() {
        let mut store = GroupAssignmentStore::new();
        let a = points(&[("s1", 0), ("s2", 0)]);
        let b = points(&[("s3", 1), ("s4", 1)]);
        store.define_group(GroupSlot::Group1, Some(&a), &HashSet::new(), &labels(), "A");
        store.define_group(GroupSlot::Group2, Some(&b), &HashSet::new(), &labels(), "B");
        store.define_group(GroupSlot::Group2, Some(&[]), &HashSet::new(), &labels(), "B");
        assert_eq!(store.get(GroupSlot::Group1).unwrap().name, "A");
        assert!(store.get(GroupSlot::Group2).is_none());
    }

    #[test]
    fn test_require_both() {
        let mut store = GroupAssignmentStore::new();
        let err = store.require_both().unwrap_err();
        assert!(err.to_string().contains("group1 and group2"));

        let a = points(&[("s1", 0), ("s2", 0)]);
        store.define_group(GroupSlot::Group1, Some(&a), &HashSet::new(), &labels(), "A");
        assert!(matches!(
            store.require_both(),
            Err(AnalysisError::MissingGroupDefinition { ref missing }) if missing == "group2"
        ));
    }

    #[test]
    fn test_overlap_is_reported() {
        let mut store = GroupAssignmentStore::new();
        let a = points(&[("s1", 0), ("s2", 0)]);
        let b = points(&[("s2", 1), ("s3", 1)]);
        store.define_group(GroupSlot::Group1, Some(&a), &HashSet::new(), &labels(), "A");
        store.define_group(GroupSlot::Group2, Some(&b), &HashSet::new(), &labels(), "B");
        assert_eq!(store.overlap(), vec!["s2"]);
    }

    #[test]
    fn test_store_serde_round_trip() {
        let mut store = GroupAssignmentStore::new();
        let a = points(&[("s1", 0), ("s2", 0)]);
        store.define_group(GroupSlot::Group1, Some(&a), &HashSet::new(), &labels(), "A");
        let json = serde_json::to_string(&store).unwrap();
        let back: GroupAssignmentStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
