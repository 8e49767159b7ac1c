//! Core types for the task tree engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope of every read and write: the owning host and the project id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectKey {
    pub host: String,
    pub project: String,
}

impl ProjectKey {
    pub fn new(host: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            project: project.into(),
        }
    }

    /// The project root task shares its id with the project.
    pub fn is_root(&self, task_id: &str) -> bool {
        self.project == task_id
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.project)
    }
}

/// A node in a project's tree. The project root is itself a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub parent: Option<String>,
    pub first_child: Option<String>,
    pub next_sibling: Option<String>,
    pub user: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_on: i64,

    // Critical path through the subtree, own estimate included
    pub minimum_time: i64,

    // Own values
    pub estimated_time: i64,
    pub logged_time: i64,
    pub estimated_expense: i64,
    pub logged_expense: i64,
    pub file_count: i64,
    pub file_size: i64,

    // Rolled up over the subtree, self excluded
    pub estimated_sub_time: i64,
    pub logged_sub_time: i64,
    pub estimated_sub_expense: i64,
    pub logged_sub_expense: i64,
    pub file_sub_count: i64,
    pub file_sub_size: i64,
    pub child_count: i64,
    pub descendant_count: i64,

    pub is_parallel: bool,
}

/// Project membership role. Lower discriminant = more powerful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin = 0,
    Writer = 1,
    Reader = 2,
}

impl Role {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Role::Admin),
            1 => Some(Role::Writer),
            2 => Some(Role::Reader),
            _ => None,
        }
    }

    /// True if this role is at least as powerful as `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self.as_i64() <= required.as_i64()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "writer" => Some(Role::Writer),
            "reader" => Some(Role::Reader),
            _ => None,
        }
    }
}

/// A project as created by `create_project`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub host: String,
    pub id: String,
    pub name: String,
    pub is_public: bool,
    pub created_on: i64,
    pub root: Task,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTask {
    pub parent: String,
    /// Insert after this sibling; `None` inserts as the parent's first child.
    pub previous_sibling: Option<String>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_parallel: bool,
    pub user: Option<String>,
    #[serde(default)]
    pub estimated_time: i64,
    #[serde(default)]
    pub estimated_expense: i64,
}

/// Input for updating a task. `None` leaves a field untouched; for the
/// nullable fields `Some(None)` clears the value (or, for
/// `previous_sibling`, moves the task to the first-child position).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTask {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_sibling: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_parallel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_expense: Option<i64>,
}

impl UpdateTask {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_none()
            && self.previous_sibling.is_none()
            && self.name.is_none()
            && self.description.is_none()
            && self.is_parallel.is_none()
            && self.user.is_none()
            && self.estimated_time.is_none()
            && self.estimated_expense.is_none()
    }

    /// Whether the request touches anything that can change tree shape or
    /// aggregate values, and therefore needs the project lock.
    pub fn may_affect_tree(&self) -> bool {
        self.parent.is_some()
            || self.previous_sibling.is_some()
            || self.is_parallel.is_some()
            || self.estimated_time.is_some()
            || self.estimated_expense.is_some()
    }
}

/// A page of results with a continuation flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub set: Vec<T>,
    pub more: bool,
}

/// Kind of item an activity refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Project,
    Task,
    Time,
    Expense,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Project => "project",
            ItemType::Task => "task",
            ItemType::Time => "time",
            ItemType::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(ItemType::Project),
            "task" => Some(ItemType::Task),
            "time" => Some(ItemType::Time),
            "expense" => Some(ItemType::Expense),
            _ => None,
        }
    }
}

/// What happened to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Action::Created),
            "updated" => Some(Action::Updated),
            "deleted" => Some(Action::Deleted),
            _ => None,
        }
    }
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub seq: i64,
    pub project: String,
    pub occurred_on: i64,
    pub actor: String,
    pub item: String,
    pub item_type: ItemType,
    pub item_has_been_deleted: bool,
    pub action: Action,
    pub item_name: Option<String>,
    pub extra_info: Option<serde_json::Value>,
}

/// Filter for activity queries.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub item: Option<String>,
    pub actor: Option<String>,
    pub occurred_after: Option<i64>,
    pub occurred_before: Option<i64>,
    pub limit: Option<usize>,
}

/// A logged time entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: String,
    pub task: String,
    pub created_by: String,
    pub created_on: i64,
    pub duration: i64,
    pub note: Option<String>,
}

/// A logged expense entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseEntry {
    pub id: String,
    pub task: String,
    pub created_by: String,
    pub created_on: i64,
    pub value: i64,
    pub note: Option<String>,
}
