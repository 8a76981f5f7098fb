//! Drag-and-drop resolution for categorized task lists.
//!
//! A drag gesture reports where a task was picked up and where it was
//! dropped. Indices follow list-splice semantics: the task is removed from
//! its source list first, and the destination index refers to the list as
//! it looks after that removal.

use todosync_proto::task::{Category, Snapshot};

use super::TaskError;

/// A position inside one category's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragLocation {
    /// The list.
    pub category: Category,
    /// Zero-based position in the list.
    pub index: usize,
}

impl DragLocation {
    /// Shorthand constructor.
    #[must_use]
    pub const fn new(category: Category, index: usize) -> Self {
        Self { category, index }
    }
}

/// The outcome of a drag gesture as reported by the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragResult {
    /// Where the task was picked up.
    pub source: DragLocation,
    /// Where it was dropped; `None` when the drop was cancelled or landed
    /// outside any list.
    pub destination: Option<DragLocation>,
}

impl DragResult {
    /// A drop onto `destination`.
    #[must_use]
    pub const fn new(source: DragLocation, destination: DragLocation) -> Self {
        Self {
            source,
            destination: Some(destination),
        }
    }

    /// A cancelled drag.
    #[must_use]
    pub const fn cancelled(source: DragLocation) -> Self {
        Self {
            source,
            destination: None,
        }
    }
}

/// What [`apply_drag`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragOutcome {
    /// Cancelled drop or dropped back onto its own slot.
    Ignored,
    /// Moved within one category.
    Reordered,
    /// Moved to another category.
    Moved,
}

/// Applies a drag gesture to `snapshot`.
///
/// A destination index past the end of the (post-removal) destination list
/// appends. The total task count is unchanged whatever the outcome.
///
/// # Errors
///
/// Returns [`TaskError::NoTaskAt`] if the source index is out of range; the
/// snapshot is left untouched.
pub fn apply_drag(snapshot: &mut Snapshot, drag: &DragResult) -> Result<DragOutcome, TaskError> {
    let Some(destination) = drag.destination else {
        return Ok(DragOutcome::Ignored);
    };
    let source = drag.source;
    if source == destination {
        return Ok(DragOutcome::Ignored);
    }

    let source_list = snapshot.tasks_mut(source.category);
    if source.index >= source_list.len() {
        return Err(TaskError::NoTaskAt {
            category: source.category,
            index: source.index,
        });
    }
    let task = source_list.remove(source.index);

    let destination_list = snapshot.tasks_mut(destination.category);
    let index = destination.index.min(destination_list.len());
    destination_list.insert(index, task);

    if source.category == destination.category {
        Ok(DragOutcome::Reordered)
    } else {
        Ok(DragOutcome::Moved)
    }
}
