//! Error types for taskweave
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, invalid configuration, unknown task)
//! - 3: Rejected mutation (self-reference, cycle, duplicate edge, dangling link)
//! - 4: Operation failed (I/O, serialization, lock contention)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the tw CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const REJECTED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for taskweave operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid recurrence: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task store not initialized at {0}")]
    NotInitialized(PathBuf),

    // Rejected mutations (exit code 3)
    #[error("Task {0} cannot reference itself")]
    SelfReference(String),

    #[error("Setting {parent} as parent of {task} would create a circular hierarchy")]
    CircularHierarchy { task: String, parent: String },

    #[error("{task} depending on {depends_on} would create a circular dependency")]
    CircularDependency { task: String, depends_on: String },

    #[error("{task} already depends on {depends_on}")]
    DuplicateDependency { task: String, depends_on: String },

    #[error("{task} does not depend on {depends_on}")]
    DependencyNotFound { task: String, depends_on: String },

    #[error("Template {template} already has an open instance {instance}")]
    OpenInstanceExists { template: String, instance: String },

    #[error("Task {task} references missing {relation} {target}")]
    MissingReference {
        task: String,
        relation: &'static str,
        target: String,
    },

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::Validation(_)
            | Error::TaskNotFound(_)
            | Error::NotInitialized(_) => exit_codes::USER_ERROR,

            Error::SelfReference(_)
            | Error::CircularHierarchy { .. }
            | Error::CircularDependency { .. }
            | Error::DuplicateDependency { .. }
            | Error::DependencyNotFound { .. }
            | Error::OpenInstanceExists { .. }
            | Error::MissingReference { .. } => exit_codes::REJECTED,

            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for rejected graph mutations.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::SelfReference(task) => Some(serde_json::json!({ "task": task })),
            Error::CircularHierarchy { task, parent } => {
                Some(serde_json::json!({ "task": task, "parent": parent }))
            }
            Error::CircularDependency { task, depends_on }
            | Error::DuplicateDependency { task, depends_on }
            | Error::DependencyNotFound { task, depends_on } => {
                Some(serde_json::json!({ "task": task, "depends_on": depends_on }))
            }
            Error::OpenInstanceExists { template, instance } => {
                Some(serde_json::json!({ "template": template, "instance": instance }))
            }
            Error::MissingReference {
                task,
                relation,
                target,
            } => Some(serde_json::json!({ "task": task, "relation": relation, "target": target })),
            _ => None,
        }
    }
}

/// Result type alias for taskweave operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
