//! In-memory task collection.
//!
//! `TaskBoard` holds one ordered list per [`Category`] and is the only place
//! task state is mutated. User actions go through [`TaskBoard::apply`];
//! snapshots adopted from storage or the backend go through
//! [`TaskBoard::replace_all`].

use std::collections::HashSet;

use todosync_proto::task::{Category, Snapshot, Task, TaskId};

use super::TaskError;
use super::reorder::{DragOutcome, DragResult, apply_drag};

/// A user-initiated change to the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Add a task; `None` uses the currently selected category.
    Create {
        /// Raw input text, trimmed before use.
        text: String,
        /// Target category.
        category: Option<Category>,
    },
    /// Remove a task from a category.
    Delete {
        /// Category to remove from.
        category: Category,
        /// Task to remove.
        id: TaskId,
    },
    /// Flip a task's completed flag.
    Toggle {
        /// Task to toggle.
        id: TaskId,
    },
    /// Apply a drag-and-drop gesture.
    Drag(DragResult),
    /// Empty every category. Callers confirm with the user first.
    ClearAll,
}

/// Effect of an applied [`TaskAction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A task was created.
    Created(Task),
    /// The collection changed in some other way.
    Updated,
    /// Nothing changed (absent id, cancelled drag, already empty).
    Unchanged,
}

impl Change {
    /// Returns `true` if the collection was modified.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// The categorized, ordered task collection.
#[derive(Debug, Clone, Default)]
pub struct TaskBoard {
    snapshot: Snapshot,
    selected: Category,
}

impl TaskBoard {
    /// Creates an empty board with all three categories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a board holding `snapshot`, normalized as by
    /// [`replace_all`](Self::replace_all).
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut board = Self::new();
        board.replace_all(snapshot);
        board
    }

    /// Category used when a create request names none.
    #[must_use]
    pub const fn selected_category(&self) -> Category {
        self.selected
    }

    /// Remembers `category` as the default for subsequent creates.
    pub const fn select_category(&mut self, category: Category) {
        self.selected = category;
    }

    /// Appends a new task with the trimmed `text` to `category`.
    ///
    /// The category also becomes the selected one.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TextEmpty`] if `text` is empty or whitespace.
    pub fn create_task(&mut self, text: &str, category: Category) -> Result<Task, TaskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaskError::TextEmpty);
        }
        let task = Task::new(text);
        self.snapshot.tasks_mut(category).push(task.clone());
        self.selected = category;
        Ok(task)
    }

    /// Removes the task with `id` from `category`. Returns `false` if no
    /// such task was there.
    pub fn delete_task(&mut self, category: Category, id: &TaskId) -> bool {
        let list = self.snapshot.tasks_mut(category);
        let before = list.len();
        list.retain(|t| &t.id != id);
        list.len() != before
    }

    /// Flips the completed flag of the task with `id`, wherever it is.
    /// Returns `false` if the id is unknown.
    pub fn toggle_completed(&mut self, id: &TaskId) -> bool {
        let Some((category, index)) = self.snapshot.position(id) else {
            return false;
        };
        let task = &mut self.snapshot.tasks_mut(category)[index];
        task.completed = !task.completed;
        true
    }

    /// Empties every category. Irreversible; returns `false` if the board
    /// was already empty.
    pub fn clear_all(&mut self) -> bool {
        if self.snapshot.is_empty() {
            return false;
        }
        self.snapshot = Snapshot::new();
        true
    }

    /// Adopts `snapshot` wholesale.
    ///
    /// Tasks with blank text and every repeat of an id already seen are
    /// dropped so each task sits in exactly one category.
    pub fn replace_all(&mut self, snapshot: Snapshot) {
        let mut seen = HashSet::new();
        let mut normalized = Snapshot::new();
        let mut dropped = 0usize;
        for category in Category::ALL {
            let list = normalized.tasks_mut(category);
            for task in snapshot.tasks(category) {
                if task.text.trim().is_empty() || !seen.insert(task.id.clone()) {
                    dropped += 1;
                    continue;
                }
                list.push(task.clone());
            }
        }
        if dropped > 0 {
            tracing::warn!(dropped, "dropped invalid or duplicate tasks from snapshot");
        }
        self.snapshot = normalized;
    }

    /// Applies a user action.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] for rejected input; the board is unchanged.
    pub fn apply(&mut self, action: TaskAction) -> Result<Change, TaskError> {
        match action {
            TaskAction::Create { text, category } => {
                let category = category.unwrap_or(self.selected);
                self.create_task(&text, category).map(Change::Created)
            }
            TaskAction::Delete { category, id } => Ok(changed(self.delete_task(category, &id))),
            TaskAction::Toggle { id } => Ok(changed(self.toggle_completed(&id))),
            TaskAction::Drag(drag) => match apply_drag(&mut self.snapshot, &drag)? {
                DragOutcome::Ignored => Ok(Change::Unchanged),
                DragOutcome::Reordered | DragOutcome::Moved => Ok(Change::Updated),
            },
            TaskAction::ClearAll => Ok(changed(self.clear_all())),
        }
    }

    /// Ordered tasks of one category.
    #[must_use]
    pub fn tasks(&self, category: Category) -> &[Task] {
        self.snapshot.tasks(category)
    }

    /// The whole collection.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Looks a task up by id.
    #[must_use]
    pub fn find(&self, id: &TaskId) -> Option<(Category, &Task)> {
        let (category, index) = self.snapshot.position(id)?;
        Some((category, &self.snapshot.tasks(category)[index]))
    }

    /// Total number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    /// Returns `true` if there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}

const fn changed(yes: bool) -> Change {
    if yes { Change::Updated } else { Change::Unchanged }
}
