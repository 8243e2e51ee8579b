//! Core types for task graph execution

use crate::retry::RetryConfig;
use serde::Serialize;
use std::fmt;

/// Identity of a task: resource kind plus name.
///
/// Keys are also the symbolic references that model builders put into
/// reference fields. The graph builder checks every one of them resolves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskKey {
    pub kind: &'static str,
    pub name: String,
}

impl TaskKey {
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Lifecycle state of a task during execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting on dependencies or on a retry deadline
    Pending,
    /// All dependencies done, waiting for a worker
    Ready,
    /// Owned by a worker
    Running,
    /// Actual state matches expected
    Done,
    /// Dry run computed the change without applying it
    Planned,
    /// Permanent error
    Failed,
    /// A dependency failed, never attempted
    Blocked,
    /// Caller cancelled before or during the task
    Cancelled,
}

impl TaskState {
    /// Whether the task will not change state again in this execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Planned | Self::Failed | Self::Blocked | Self::Cancelled
        )
    }

    /// Whether dependents may proceed
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done | Self::Planned)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Done => "done",
            Self::Planned => "planned",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What the executor did (or would do) for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Object absent, create it
    Create,
    /// Object present, change fields in place
    Update,
    /// Object present, delete and create again
    Replace,
    /// Object present and deleted (destroy mode)
    Delete,
    /// Nothing to do
    Noop,
    /// Task never got as far as deciding
    None,
}

impl Action {
    /// Whether this action mutates the cloud
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update | Self::Replace | Self::Delete
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Noop => "noop",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// What `Find` reported before any change was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Observed {
    Absent,
    Present,
    /// Find never succeeded
    Unknown,
}

impl fmt::Display for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Present => "present",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Direction of reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Converge the cloud to the expected state
    Apply,
    /// Remove every task's object, dependents first
    Destroy,
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of tasks running at once
    pub jobs: usize,
    /// Transient retry policy
    pub retry: RetryConfig,
    /// Skip `Find` and treat every object as absent (offline emission)
    pub assume_absent: bool,
    /// Apply or destroy
    pub mode: Mode,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            assume_absent: false,
            mode: Mode::Apply,
        }
    }
}
