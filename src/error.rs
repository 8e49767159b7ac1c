//! Structured error types for tree operations.

use serde::Serialize;
use std::fmt;

/// Broad error classes callers map onto their own transport status codes.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Internal,
}

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (4xx-like)
    MissingRequiredField,
    InvalidFieldValue,
    AncestorLoop,
    SiblingParentMismatch,
    RestrictedRootField,

    // Not found errors
    TaskNotFound,
    ParentNotFound,
    PreviousSiblingNotFound,
    ProjectNotFound,

    // Authorization errors
    Forbidden,
    AdminRequired,
    AssigneeLacksAccess,

    // Internal errors
    LockTimeout,
    DeadlineExceeded,
    TraversalLimitExceeded,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFieldValue
            | ErrorCode::AncestorLoop
            | ErrorCode::SiblingParentMismatch
            | ErrorCode::RestrictedRootField => ErrorKind::Validation,
            ErrorCode::TaskNotFound
            | ErrorCode::ParentNotFound
            | ErrorCode::PreviousSiblingNotFound
            | ErrorCode::ProjectNotFound => ErrorKind::NotFound,
            ErrorCode::Forbidden | ErrorCode::AdminRequired | ErrorCode::AssigneeLacksAccess => {
                ErrorKind::Forbidden
            }
            ErrorCode::LockTimeout
            | ErrorCode::DeadlineExceeded
            | ErrorCode::TraversalLimitExceeded
            | ErrorCode::DatabaseError
            | ErrorCode::InternalError => ErrorKind::Internal,
        }
    }
}

/// Structured error returned by every tree operation.
#[derive(Debug, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct TreeError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl TreeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task not found: {}", task_id),
        )
    }

    pub fn parent_not_found(parent_id: &str) -> Self {
        Self::new(
            ErrorCode::ParentNotFound,
            format!("parent not found: {}", parent_id),
        )
        .with_field("parent")
    }

    pub fn previous_sibling_not_found(sibling_id: &str) -> Self {
        Self::new(
            ErrorCode::PreviousSiblingNotFound,
            format!("previousSibling not found: {}", sibling_id),
        )
        .with_field("previous_sibling")
    }

    pub fn project_not_found(project: &str) -> Self {
        Self::new(
            ErrorCode::ProjectNotFound,
            format!("no such project: {}", project),
        )
    }

    pub fn ancestor_loop(task_id: &str, parent_id: &str) -> Self {
        Self::new(
            ErrorCode::AncestorLoop,
            format!(
                "ancestor loop detected, {} cannot become a child of its descendant {}",
                task_id, parent_id
            ),
        )
        .with_field("parent")
    }

    pub fn sibling_parent_mismatch(sibling_id: &str, parent_id: &str) -> Self {
        Self::new(
            ErrorCode::SiblingParentMismatch,
            format!(
                "previousSibling {} is not a child of {}",
                sibling_id, parent_id
            ),
        )
        .with_field("previous_sibling")
    }

    pub fn restricted_root_field(field: &str) -> Self {
        Self::new(
            ErrorCode::RestrictedRootField,
            format!("{} is not settable on the project root node", field),
        )
        .with_field(field)
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, reason)
    }

    pub fn admin_required(task_id: &str) -> Self {
        Self::new(
            ErrorCode::AdminRequired,
            format!("an admin must delete task {}", task_id),
        )
    }

    pub fn assignee_lacks_access(user: &str) -> Self {
        Self::new(
            ErrorCode::AssigneeLacksAccess,
            format!("user {} does not have write access to this project", user),
        )
        .with_field("user")
    }

    pub fn lock_timeout(project: &str) -> Self {
        Self::new(
            ErrorCode::LockTimeout,
            format!("timed out waiting for the lock on project {}", project),
        )
    }

    pub fn deadline_exceeded(budget_ms: u64) -> Self {
        Self::new(
            ErrorCode::DeadlineExceeded,
            format!("operation exceeded its {}ms time budget", budget_ms),
        )
    }

    pub fn traversal_limit(task_id: &str, limit: usize) -> Self {
        Self::new(
            ErrorCode::TraversalLimitExceeded,
            format!(
                "ancestor walk from {} exceeded {} steps, tree data is corrupt",
                task_id, limit
            ),
        )
    }

    pub fn database(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::DatabaseError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl From<rusqlite::Error> for TreeError {
    fn from(err: rusqlite::Error) -> Self {
        TreeError::database(err)
    }
}

impl From<serde_json::Error> for TreeError {
    fn from(err: serde_json::Error) -> Self {
        TreeError::internal(err)
    }
}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for TreeError {
    fn from(err: anyhow::Error) -> Self {
        // Try to downcast to TreeError first
        match err.downcast::<TreeError>() {
            Ok(tree_err) => tree_err,
            Err(err) => TreeError::internal(err),
        }
    }
}

/// Result type for tree operations.
pub type TreeResult<T> = std::result::Result<T, TreeError>;
