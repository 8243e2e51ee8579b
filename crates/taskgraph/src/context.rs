//! Contexts shared with model builders and running tasks
//!
//! [`ModelContext`] collects expected-state tasks while builders run.
//! [`ExecContext`] is what a task sees during execution: the cloud, the
//! cancellation token and the identifiers published by finished tasks.

use crate::cancel::CancelToken;
use crate::cloud::Cloud;
use crate::error::{Error, Result};
use crate::resource::{Resource, Task};
use crate::types::{Action, TaskKey, TaskState};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A builder that translates part of the cluster definition into tasks
///
/// Builders read the definition, add tasks and never remove them. They may run
/// in any order; cross-builder links are plain [`TaskKey`] references.
pub trait ModelBuilder {
    fn build(&self, ctx: &mut ModelContext) -> Result<()>;
}

struct Registered {
    task: Arc<dyn Task>,
    fingerprint: Value,
}

/// Registry of expected-state tasks, keyed by (kind, name)
#[derive(Default)]
pub struct ModelContext {
    tasks: BTreeMap<TaskKey, Registered>,
}

impl fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tasks.keys().map(ToString::to_string)).finish()
    }
}

impl ModelContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, returning its key for use as a reference.
    ///
    /// Registering an identical value twice is accepted; a different value
    /// under the same key is a builder error.
    pub fn add<R: Resource>(&mut self, resource: R) -> Result<TaskKey> {
        let key = TaskKey::new(R::KIND, resource.name());
        let fingerprint = Task::fingerprint(&resource)?;
        if let Some(existing) = self.tasks.get(&key) {
            if existing.fingerprint == fingerprint {
                return Ok(key);
            }
            return Err(Error::DuplicateTask { key });
        }
        log::trace!("registered {key}");
        self.tasks.insert(
            key.clone(),
            Registered {
                task: Arc::new(resource),
                fingerprint,
            },
        );
        Ok(key)
    }

    /// Look up a registered task by its concrete type
    pub fn get<R: Resource>(&self, name: &str) -> Option<&R> {
        self.tasks
            .get(&TaskKey::new(R::KIND, name))
            .and_then(|r| r.task.as_any().downcast_ref::<R>())
    }

    pub fn contains(&self, key: &TaskKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn keys(&self) -> Vec<TaskKey> {
        self.tasks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Consume the context, yielding tasks in key order
    pub fn into_tasks(self) -> Vec<Arc<dyn Task>> {
        self.tasks.into_values().map(|r| r.task).collect()
    }
}

/// Run every builder against one context
pub fn build_model(builders: &[&dyn ModelBuilder]) -> Result<ModelContext> {
    let mut ctx = ModelContext::new();
    for builder in builders {
        builder.build(&mut ctx)?;
    }
    Ok(ctx)
}

/// Execution-time context handed to every task
pub struct ExecContext {
    cloud: Arc<dyn Cloud>,
    cancel: CancelToken,
    ids: RwLock<HashMap<TaskKey, String>>,
}

impl ExecContext {
    pub fn new(cloud: Arc<dyn Cloud>, cancel: CancelToken) -> Self {
        Self {
            cloud,
            cancel,
            ids: RwLock::new(HashMap::new()),
        }
    }

    pub fn cloud(&self) -> &dyn Cloud {
        self.cloud.as_ref()
    }

    /// Downcast the cloud to its provider binding
    pub fn cloud_as<C: 'static>(&self) -> Result<&C> {
        self.cloud.as_any().downcast_ref::<C>().ok_or_else(|| {
            Error::permanent(format!(
                "task needs a different cloud than {}",
                self.cloud.provider_id()
            ))
        })
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Abort at an SDK boundary if the caller cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    /// Record the cloud identifier of a task's object
    pub fn publish(&self, key: &TaskKey, id: impl Into<String>) {
        let id = id.into();
        log::debug!("{key} is {id}");
        self.ids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), id);
    }

    /// Cloud identifier of a referenced task, if known yet
    pub fn id_of(&self, key: &TaskKey) -> Option<String> {
        self.ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Cloud identifier of a referenced task, which must exist by now
    pub fn require_id(&self, key: &TaskKey) -> Result<String> {
        self.id_of(key)
            .ok_or_else(|| Error::permanent(format!("{key} has no cloud id yet")))
    }

    /// Map a cloud identifier back to a reference.
    ///
    /// `find` uses this so that an actual object referring to the same
    /// cloud object as `expected` compares equal by key.
    pub fn reference_for(
        &self,
        expected: Option<&TaskKey>,
        kind: &'static str,
        cloud_id: Option<&str>,
    ) -> Option<TaskKey> {
        let cloud_id = cloud_id?;
        if let Some(key) = expected
            && self.id_of(key).as_deref() == Some(cloud_id)
        {
            return Some(key.clone());
        }
        Some(TaskKey::new(kind, format!("id:{cloud_id}")))
    }
}

/// Progress callback for execution
///
/// Called on the coordinator thread only.
pub trait ProgressCallback {
    /// Called once before any task starts
    fn on_start(&mut self, total: usize);

    /// Called when a worker picks up a task (including retries)
    fn on_task_start(&mut self, key: &TaskKey);

    /// Called when a task reaches a terminal state
    fn on_task_complete(&mut self, key: &TaskKey, state: TaskState, action: Action);

    fn on_finish(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize) {}
    fn on_task_start(&mut self, _key: &TaskKey) {}
    fn on_task_complete(&mut self, _key: &TaskKey, _state: TaskState, _action: Action) {}
    fn on_finish(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCloud, Widget};

    #[test]
    fn test_identical_registration_is_accepted() {
        let mut ctx = ModelContext::new();
        ctx.add(Widget::new("a").size(2)).unwrap();
        ctx.add(Widget::new("a").size(2)).unwrap();
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_conflicting_registration_is_rejected() {
        let mut ctx = ModelContext::new();
        ctx.add(Widget::new("a").size(2)).unwrap();
        let err = ctx.add(Widget::new("a").size(3)).unwrap_err();
        assert!(matches!(err, Error::DuplicateTask { .. }));
    }

    #[test]
    fn test_debug_lists_registered_keys() {
        let mut ctx = ModelContext::new();
        ctx.add(Widget::new("b").size(1)).unwrap();
        ctx.add(Widget::new("a").size(2)).unwrap();
        assert_eq!(format!("{ctx:?}"), r#"{"Widget/a", "Widget/b"}"#);
    }

    #[test]
    fn test_get_downcasts() {
        let mut ctx = ModelContext::new();
        ctx.add(Widget::new("a").size(2)).unwrap();
        assert_eq!(ctx.get::<Widget>("a").unwrap().size, Some(2));
        assert!(ctx.get::<Widget>("b").is_none());
    }

    #[test]
    fn test_reference_for_matches_published_id() {
        let ctx = ExecContext::new(Arc::new(FakeCloud::default()), CancelToken::new());
        let vpc = TaskKey::new("Widget", "vpc");
        ctx.publish(&vpc, "w-1");

        assert_eq!(
            ctx.reference_for(Some(&vpc), "Widget", Some("w-1")),
            Some(vpc.clone())
        );
        assert_eq!(
            ctx.reference_for(Some(&vpc), "Widget", Some("w-2")),
            Some(TaskKey::new("Widget", "id:w-2"))
        );
        assert_eq!(ctx.reference_for(Some(&vpc), "Widget", None), None);
    }

    #[test]
    fn test_cloud_as_wrong_type_errors() {
        let ctx = ExecContext::new(Arc::new(FakeCloud::default()), CancelToken::new());
        assert!(ctx.cloud_as::<FakeCloud>().is_ok());
        assert!(ctx.cloud_as::<String>().is_err());
    }
}
