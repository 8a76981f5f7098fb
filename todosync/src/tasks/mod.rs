//! The categorized task collection and the operations that mutate it.
//!
//! [`TaskBoard`] owns the in-memory collection; [`reorder`] resolves drag
//! gestures into splices on it. Both are synchronous and never touch I/O.

pub mod board;
pub mod reorder;

pub use board::{Change, TaskAction, TaskBoard};
pub use reorder::{DragLocation, DragOutcome, DragResult, apply_drag};

use thiserror::Error;
use todosync_proto::task::Category;

/// Reasons a task operation is rejected without changing the collection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Task text is empty after trimming.
    #[error("task text cannot be empty")]
    TextEmpty,
    /// A drag referenced a position that holds no task.
    #[error("no task at {category} #{index}")]
    NoTaskAt {
        /// Category the drag started from.
        category: Category,
        /// Index that was out of range.
        index: usize,
    },
}
