//! Two-slot group assignment built from interactive scatter selections

mod selection;
mod store;

pub use selection::{SelectedPoint, TraceLabels};
pub use store::{GroupAssignment, GroupAssignmentStore, GroupSlot};
