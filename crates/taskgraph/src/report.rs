//! Structured execution report

use crate::types::{Action, Mode, Observed, TaskKey, TaskState};
use serde::Serialize;
use std::time::Duration;

/// What happened to one task
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub key: TaskKey,
    /// What `find` saw before any change
    pub initial: Observed,
    pub action: Action,
    pub state: TaskState,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub retries: u32,
    pub changed_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Counts per outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub no_change: usize,
    pub planned: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
}

impl ExecuteSummary {
    /// Number of cloud mutations applied (or planned)
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if every task succeeded
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.blocked == 0 && self.cancelled == 0
    }

    pub fn add_entry(&mut self, entry: &ReportEntry) {
        match entry.state {
            TaskState::Failed => self.failed += 1,
            TaskState::Blocked => self.blocked += 1,
            TaskState::Cancelled => self.cancelled += 1,
            TaskState::Planned | TaskState::Done => {
                if entry.state == TaskState::Planned {
                    self.planned += 1;
                }
                match entry.action {
                    Action::Create => self.created += 1,
                    Action::Update => self.updated += 1,
                    Action::Replace => self.replaced += 1,
                    Action::Delete => self.deleted += 1,
                    Action::Noop | Action::None => self.no_change += 1,
                }
            }
            TaskState::Pending | TaskState::Ready | TaskState::Running => {}
        }
    }
}

/// Result of one execution
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Entries in completion order
    pub entries: Vec<ReportEntry>,
    /// Deterministic topological order of the graph
    pub replay_order: Vec<TaskKey>,
    pub target: &'static str,
    pub mode: Mode,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl Report {
    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for entry in &self.entries {
            summary.add_entry(entry);
        }
        summary
    }

    pub fn entry(&self, key: &TaskKey) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    /// Entries sorted by key, for display
    pub fn sorted_entries(&self) -> Vec<&ReportEntry> {
        let mut entries: Vec<&ReportEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn is_success(&self) -> bool {
        self.summary().is_success()
    }

    /// 0 when every task succeeded, 2 on partial failure
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 2 }
    }

    /// e.g. `12 tasks in 3.2s: 10 created, 2 unchanged`
    pub fn summary_line(&self) -> String {
        let s = self.summary();
        let verb = if self.target == "dry-run" {
            "to create"
        } else {
            "created"
        };
        let mut parts = Vec::new();
        let counts = [
            (s.created, verb),
            (s.updated, "updated"),
            (s.replaced, "replaced"),
            (s.deleted, "deleted"),
            (s.no_change, "unchanged"),
            (s.failed, "failed"),
            (s.blocked, "blocked"),
            (s.cancelled, "cancelled"),
        ];
        for (count, label) in counts {
            if count > 0 {
                parts.push(format!("{count} {label}"));
            }
        }
        if parts.is_empty() {
            parts.push("nothing to do".to_string());
        }
        format!(
            "{} tasks in {:.1}s: {}",
            self.entries.len(),
            self.elapsed.as_secs_f64(),
            parts.join(", ")
        )
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, action: Action, state: TaskState) -> ReportEntry {
        ReportEntry {
            key: TaskKey::new("VPC", name),
            initial: Observed::Absent,
            action,
            state,
            duration: Duration::ZERO,
            retries: 0,
            changed_fields: Vec::new(),
            diagnostic: None,
        }
    }

    fn report(entries: Vec<ReportEntry>) -> Report {
        Report {
            entries,
            replay_order: Vec::new(),
            target: "direct",
            mode: Mode::Apply,
            elapsed: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_summary_counts() {
        let r = report(vec![
            entry("a", Action::Create, TaskState::Done),
            entry("b", Action::Noop, TaskState::Done),
            entry("c", Action::None, TaskState::Blocked),
        ]);
        let s = r.summary();
        assert_eq!(s.created, 1);
        assert_eq!(s.no_change, 1);
        assert_eq!(s.blocked, 1);
        assert_eq!(r.exit_code(), 2);
        assert_eq!(
            r.summary_line(),
            "3 tasks in 1.5s: 1 created, 1 unchanged, 1 blocked"
        );
    }

    #[test]
    fn test_success_exit_code() {
        let r = report(vec![entry("a", Action::Noop, TaskState::Done)]);
        assert_eq!(r.exit_code(), 0);
    }
}
