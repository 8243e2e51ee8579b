//! Error types for task graph construction and execution.
//!
//! Errors are categorized so the executor can decide what to do with them:
//! retry transient failures, treat not-found as absence, and fail the task
//! (but not its independent siblings) on anything permanent.

use crate::types::TaskKey;
use thiserror::Error;

/// Categories of errors for retry and propagation logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or incomplete user input
    Validation,
    /// Programming error in a model builder (duplicate task, dangling reference, cycle)
    Builder,
    /// Cloud object is absent
    NotFound,
    /// Network timeout, rate limit, eventual-consistency window
    Transient,
    /// Anything else that will not fix itself
    Permanent,
    /// Caller requested cancellation
    Cancelled,
}

impl ErrorCategory {
    /// Whether this error category is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Whether the whole command must abort before anything is applied.
    pub fn is_fatal_before_execution(&self) -> bool {
        matches!(self, Self::Validation | Self::Builder)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid input",
            Self::Builder => "Model builder bug",
            Self::NotFound => "Not found",
            Self::Transient => "Transient cloud error",
            Self::Permanent => "Permanent error",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// Errors that can occur while building or executing a task graph.
#[derive(Debug, Error)]
pub enum Error {
    /// User input failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// The same (kind, name) was registered twice with different values
    #[error("duplicate task {key}: registered twice with different values")]
    DuplicateTask {
        /// Key registered twice
        key: TaskKey,
    },

    /// A reference field points at a task that is not in the graph
    #[error("task {from} references {to}, which is not in the graph")]
    DanglingReference {
        /// Task holding the reference
        from: TaskKey,
        /// Missing referent
        to: TaskKey,
    },

    /// The references form a cycle
    #[error("dependency cycle: {}", format_path(.path))]
    Cycle {
        /// Tasks on the cycle, first task repeated at the end
        path: Vec<TaskKey>,
    },

    /// Cloud object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Retryable cloud error
    #[error("transient error: {message}")]
    Transient {
        /// Detail from the cloud API
        message: String,
    },

    /// Non-retryable error
    #[error("{message}")]
    Permanent {
        /// Detail of what went wrong
        message: String,
    },

    /// A required field of the expected value is unset
    #[error("required field not set: {0}")]
    RequiredField(&'static str),

    /// Changes touch fields that cannot be changed on an existing object
    #[error("cannot change immutable field(s) of {key}: {}", .fields.join(", "))]
    Immutable {
        /// Task whose fields changed
        key: TaskKey,
        /// Changed fields
        fields: Vec<String>,
    },

    /// Execution was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_path(path: &[TaskKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl Error {
    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation(_) => ErrorCategory::Validation,
            Error::DuplicateTask { .. } | Error::DanglingReference { .. } | Error::Cycle { .. } => {
                ErrorCategory::Builder
            }
            Error::NotFound(_) => ErrorCategory::NotFound,
            Error::Transient { .. } => ErrorCategory::Transient,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::Permanent { .. }
            | Error::RequiredField(_)
            | Error::Immutable { .. }
            | Error::Json(_)
            | Error::Io(_) => ErrorCategory::Permanent,
        }
    }

    /// Whether this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether this error means the object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type for task graph operations.
pub type Result<T> = std::result::Result<T, Error>;
