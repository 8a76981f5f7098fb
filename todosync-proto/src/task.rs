//! Task data types shared by the client, the local cache and the relay.
//!
//! The persisted layout is a JSON object keyed by the three fixed category
//! names, each holding an ordered list of tasks:
//!
//! ```json
//! { "non-urgent": [{"id": "...", "text": "...", "completed": false}],
//!   "school": [],
//!   "club/work": [] }
//! ```
//!
//! Missing or `null` category keys decode as empty lists so a partial or
//! malformed remote document never yields a board with absent categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// One of the three fixed task groupings.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Category {
    /// Anything without a deadline.
    #[default]
    #[serde(rename = "non-urgent")]
    NonUrgent,
    /// Coursework.
    #[serde(rename = "school")]
    School,
    /// Club or job responsibilities.
    #[serde(rename = "club/work")]
    ClubWork,
}

impl Category {
    /// All categories in display order.
    pub const ALL: [Self; 3] = [Self::NonUrgent, Self::School, Self::ClubWork];

    /// Returns the persisted key for this category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NonUrgent => "non-urgent",
            Self::School => "school",
            Self::ClubWork => "club/work",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "non-urgent" | "nonurgent" => Ok(Self::NonUrgent),
            "school" => Ok(Self::School),
            "club/work" | "club" | "work" => Ok(Self::ClubWork),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Opaque task identifier, stable for the task's lifetime.
///
/// New identifiers are UUID v7 strings, so they sort by creation time and
/// never collide within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new time-ordered task identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single to-do item. Its category is where it sits in a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier.
    pub id: TaskId,
    /// Display text, never empty after trimming.
    pub text: String,
    /// Whether the task has been checked off.
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    /// Creates an open task with a fresh identifier.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            text: text.into(),
            completed: false,
        }
    }
}

/// Complete serialized representation of the task collection at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "non-urgent", default, deserialize_with = "nullable_list")]
    non_urgent: Vec<Task>,
    #[serde(rename = "school", default, deserialize_with = "nullable_list")]
    school: Vec<Task>,
    #[serde(rename = "club/work", default, deserialize_with = "nullable_list")]
    club_work: Vec<Task>,
}

fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<Task>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Task>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Snapshot {
    /// Creates an empty snapshot with all three categories present.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ordered tasks of one category.
    #[must_use]
    pub fn tasks(&self, category: Category) -> &[Task] {
        match category {
            Category::NonUrgent => &self.non_urgent,
            Category::School => &self.school,
            Category::ClubWork => &self.club_work,
        }
    }

    /// Returns the ordered tasks of one category for mutation.
    pub fn tasks_mut(&mut self, category: Category) -> &mut Vec<Task> {
        match category {
            Category::NonUrgent => &mut self.non_urgent,
            Category::School => &mut self.school,
            Category::ClubWork => &mut self.club_work,
        }
    }

    /// Builder-style helper that replaces one category's list.
    #[must_use]
    pub fn with_tasks(mut self, category: Category, tasks: Vec<Task>) -> Self {
        *self.tasks_mut(category) = tasks;
        self
    }

    /// Total number of tasks across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.non_urgent.len() + self.school.len() + self.club_work.len()
    }

    /// Returns `true` if no category holds any task.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over every task together with its category, in display order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &Task)> {
        Category::ALL
            .into_iter()
            .flat_map(move |c| self.tasks(c).iter().map(move |t| (c, t)))
    }

    /// Finds a task by id, returning its category and position.
    #[must_use]
    pub fn position(&self, id: &TaskId) -> Option<(Category, usize)> {
        Category::ALL.into_iter().find_map(|c| {
            self.tasks(c)
                .iter()
                .position(|t| &t.id == id)
                .map(|index| (c, index))
        })
    }
}

/// Identifies one running client session, used to recognise its own pushes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a fresh random session identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the backend stores for one identity: a snapshot tagged with the
/// session and local revision that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Session that pushed this record, if known.
    #[serde(default)]
    pub origin: Option<SessionId>,
    /// Local revision of the pushing session at push time.
    #[serde(default)]
    pub revision: u64,
    /// The task collection itself.
    #[serde(default)]
    pub tasks: Snapshot,
}

impl RemoteRecord {
    /// Wraps a snapshot pushed by `origin` at `revision`.
    #[must_use]
    pub const fn new(origin: SessionId, revision: u64, tasks: Snapshot) -> Self {
        Self {
            origin: Some(origin),
            revision,
            tasks,
        }
    }

    /// Returns `true` if `session` pushed this record.
    #[must_use]
    pub fn is_from(&self, session: &SessionId) -> bool {
        self.origin.as_ref() == Some(session)
    }
}
