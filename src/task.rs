//! Task model: local/remote identifiers, mutable fields, and the
//! record shape returned by the remote service.
//!
//! # Invariants
//! - `Task::remote` is `Some` if and only if the remote insert for
//!   that task has completed successfully.
//! - A `TaskId` is never reused, even after the task is deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-assigned identifier for a task.
///
/// Assigned when the command is issued, before the remote service has
/// seen the task, and stable across the task's entire lifecycle
/// (including after deletion, so late-arriving responses can still be
/// correlated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a fresh identifier that has never been used before in
    /// this process.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the remote service upon successful creation.
///
/// Opaque to this crate; only ever echoed back in subsequent calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the task list that owns a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskListId(String);

impl TaskListId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskListId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partial update to a task's mutable fields.
///
/// Absent members leave the corresponding field untouched. Merging two
/// changesets is last-writer-wins per field, so a burst of rapid edits
/// collapses into the union of everything the user changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,

    /// Free-form metadata patch, shallow-merged key by key.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TaskFields {
    /// Changeset that only sets the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Changeset that only sets the notes.
    pub fn notes(notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Self::default()
        }
    }

    /// Changeset that only sets the completion flag.
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }

    /// Merge a later changeset into this one, last writer wins per
    /// field.
    ///
    /// # Postcondition
    /// Every field set in `later` overrides the corresponding field
    /// here; fields absent in `later` are preserved.
    pub fn merge(&mut self, later: TaskFields) {
        if later.title.is_some() {
            self.title = later.title;
        }
        if later.notes.is_some() {
            self.notes = later.notes;
        }
        if later.completed.is_some() {
            self.completed = later.completed;
        }
        for (key, value) in later.metadata {
            self.metadata.insert(key, value);
        }
    }

    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.notes.is_none()
            && self.completed.is_none()
            && self.metadata.is_empty()
    }
}

/// Completion state as the remote service represents it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteStatus {
    NeedsAction,
    Completed,
}

impl Default for RemoteStatus {
    fn default() -> Self {
        RemoteStatus::NeedsAction
    }
}

/// Task record as returned by the remote service.
///
/// `updated` and `position` are server-assigned and passed through
/// unchanged; this crate never interprets `position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTask {
    pub id: RemoteId,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub status: RemoteStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl RemoteTask {
    pub fn is_completed(&self) -> bool {
        self.status == RemoteStatus::Completed
    }
}

/// A task as known to the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable local identifier.
    pub id: TaskId,

    /// Remote identifier, present once creation has been acknowledged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteId>,

    /// Owning task list.
    pub list: TaskListId,

    pub title: String,

    pub notes: Option<String>,

    pub completed: bool,

    /// Local identifier of the task immediately before this one, or
    /// `None` for head position.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<TaskId>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// A brand-new, empty task with no remote identity yet.
    pub fn new(id: TaskId, list: TaskListId) -> Self {
        Self {
            id,
            remote: None,
            list,
            title: String::new(),
            notes: None,
            completed: false,
            predecessor: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Build a local task from a remote record, used when seeding the
    /// store from a full list download.
    pub fn from_remote(list: TaskListId, remote: &RemoteTask) -> Self {
        Self {
            id: TaskId::new(),
            remote: Some(remote.id.clone()),
            list,
            title: remote.title.clone(),
            notes: remote.notes.clone(),
            completed: remote.is_completed(),
            predecessor: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Apply a changeset to the mutable fields.
    pub fn apply(&mut self, fields: &TaskFields) {
        if let Some(title) = &fields.title {
            self.title = title.clone();
        }
        if let Some(notes) = &fields.notes {
            self.notes = Some(notes.clone());
        }
        if let Some(completed) = fields.completed {
            self.completed = completed;
        }
        for (key, value) in &fields.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }
}
