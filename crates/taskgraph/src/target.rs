//! Execution targets
//!
//! Exactly one target is active per execution. Direct mutates the cloud,
//! Terraform writes a declarative description, DryRun only records.

use crate::cloud::Cloud;
use crate::diff::Changes;
use crate::error::{Error, Result};
use crate::types::{Action, TaskKey};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

pub use crate::terraform::TerraformTarget;

/// The active sink for rendered tasks
pub enum Target {
    Direct(DirectTarget),
    Terraform(TerraformTarget),
    DryRun(DryRunTarget),
}

impl Target {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Terraform(_) => "terraform",
            Self::DryRun(_) => "dry-run",
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun(_))
    }

    /// Declarative targets re-emit tasks that need no change
    pub fn is_declarative(&self) -> bool {
        matches!(self, Self::Terraform(_))
    }
}

/// Applies changes through the provider facade
pub struct DirectTarget {
    cloud: Arc<dyn Cloud>,
}

impl DirectTarget {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }

    pub fn cloud(&self) -> &dyn Cloud {
        self.cloud.as_ref()
    }

    /// Downcast to the provider binding, as tasks of one catalog expect
    pub fn cloud_as<C: 'static>(&self) -> Result<&C> {
        self.cloud.as_any().downcast_ref::<C>().ok_or_else(|| {
            Error::permanent(format!(
                "direct target is bound to {}, not the cloud this task needs",
                self.cloud.provider_id()
            ))
        })
    }
}

/// One line of a dry-run plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedChange {
    pub key: TaskKey,
    pub action: Action,
    /// Changed field names
    pub fields: Vec<String>,
}

/// Records the plan without touching the cloud or the filesystem
#[derive(Default)]
pub struct DryRunTarget {
    planned: Mutex<Vec<PlannedChange>>,
}

impl DryRunTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: TaskKey, action: Action, changes: &Changes) {
        log::debug!("would {action} {key}");
        self.planned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PlannedChange {
                key,
                action,
                fields: changes.field_names(),
            });
    }

    /// Planned changes sorted by key
    pub fn planned(&self) -> Vec<PlannedChange> {
        let mut planned = self
            .planned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        planned.sort_by(|a, b| a.key.cmp(&b.key));
        planned
    }
}
