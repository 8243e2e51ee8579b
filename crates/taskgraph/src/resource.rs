//! Resource trait for reconciled cloud objects
//!
//! A [`Resource`] is a typed description of one cloud object. The same
//! struct is used for the expected value (built by a model builder), the
//! actual value (returned by `find`) and, through [`Changes`], the delta.
//!
//! The executor never sees concrete resource types: every `Resource` is
//! also a [`Task`], the object-safe view stored in the graph.

use crate::context::ExecContext;
use crate::diff::{Changes, FieldPolicy};
use crate::error::{Error, Result};
use crate::target::{DirectTarget, Target, TerraformTarget};
use crate::types::{Action, TaskKey};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;

/// Core trait for reconciled resources
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Clone, Serialize)]
/// struct Bucket {
///     name: String,
///     #[serde(skip_serializing_if = "Option::is_none")]
///     region: Option<String>,
/// }
///
/// impl Resource for Bucket {
///     const KIND: &'static str = "Bucket";
///
///     fn name(&self) -> &str { &self.name }
///     fn links(&self) -> Vec<TaskKey> { Vec::new() }
///
///     fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
///         let api = ctx.cloud_as::<MyCloud>()?.storage();
///         Ok(api.get_bucket(&self.name)?.map(|b| Bucket { name: b.name, region: Some(b.region) }))
///     }
///
///     fn render_direct(&self, t: &DirectTarget, _ctx: &ExecContext, actual: Option<&Self>, _changes: &Changes) -> Result<Option<String>> {
///         if actual.is_none() {
///             t.cloud_as::<MyCloud>()?.storage().create_bucket(&self.name)?;
///         }
///         Ok(Some(self.name.clone()))
///     }
/// }
/// ```
pub trait Resource: Serialize + Clone + fmt::Debug + Send + Sync + 'static {
    /// Resource kind, the first half of the task key
    const KIND: &'static str;

    /// Task name, unique per kind
    fn name(&self) -> &str;

    /// Stable external identifier used to match cloud objects
    fn compare_id(&self) -> String {
        self.name().to_string()
    }

    /// Keys of every task this one references
    fn links(&self) -> Vec<TaskKey>;

    /// How a changed field may be applied to an existing object
    fn field_policy(_field: &str) -> FieldPolicy {
        FieldPolicy::Immutable
    }

    /// Read the current cloud object, `None` if absent.
    ///
    /// Must be side-effect free. Cloud not-found errors map to `Ok(None)`.
    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>>;

    /// Static validation before rendering
    ///
    /// Immutable-field violations are checked by the caller; resources
    /// only add their own rules (required fields, forbidden transitions).
    fn check_changes(
        _actual: Option<&Self>,
        _expected: &Self,
        _changes: &Changes,
    ) -> Result<()> {
        Ok(())
    }

    /// Cloud identifier of an existing object, published for dependents
    fn cloud_id(_actual: &Self) -> Option<String> {
        None
    }

    /// Create or update through the cloud API, returning the cloud identifier
    fn render_direct(
        &self,
        target: &DirectTarget,
        ctx: &ExecContext,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<Option<String>>;

    /// Emit the declarative description of this object
    fn render_terraform(
        &self,
        _target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        Err(Error::permanent(format!(
            "{} has no terraform rendering",
            Self::KIND
        )))
    }

    /// Delete an existing object
    fn delete_direct(&self, _target: &DirectTarget, _ctx: &ExecContext, _actual: &Self) -> Result<()> {
        Err(Error::permanent(format!("{} cannot be deleted", Self::KIND)))
    }
}

/// Type-erased actual value returned by [`Task::find`]
pub struct Actual(Box<dyn Any + Send + Sync>);

impl Actual {
    pub fn new<R: Resource>(value: R) -> Self {
        Self(Box::new(value))
    }

    pub fn downcast<R: Resource>(&self) -> Result<&R> {
        self.0.downcast_ref::<R>().ok_or_else(|| {
            Error::permanent(format!("actual state is not a {}", R::KIND))
        })
    }
}

impl fmt::Debug for Actual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Actual(..)")
    }
}

/// Object-safe view of a resource, as stored in the graph
pub trait Task: Send + Sync + fmt::Debug {
    fn key(&self) -> TaskKey;

    /// Keys of referenced tasks
    fn dependencies(&self) -> Vec<TaskKey>;

    /// Serialized expected value, used to detect conflicting registrations
    fn fingerprint(&self) -> Result<Value>;

    fn find(&self, ctx: &ExecContext) -> Result<Option<Actual>>;

    fn changes(&self, actual: Option<&Actual>) -> Result<Changes>;

    /// Decide the action for a computed change set
    fn plan(&self, actual: Option<&Actual>, changes: &Changes) -> Action;

    fn check_changes(&self, actual: Option<&Actual>, changes: &Changes) -> Result<()>;

    fn cloud_id(&self, actual: &Actual) -> Option<String>;

    /// Dispatch to the target, returning a newly known cloud identifier
    fn render(
        &self,
        target: &Target,
        ctx: &ExecContext,
        actual: Option<&Actual>,
        changes: &Changes,
    ) -> Result<Option<String>>;

    fn delete(&self, target: &Target, ctx: &ExecContext, actual: &Actual) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

fn typed<R: Resource>(actual: Option<&Actual>) -> Result<Option<&R>> {
    actual.map(Actual::downcast::<R>).transpose()
}

impl<R: Resource> Task for R {
    fn key(&self) -> TaskKey {
        TaskKey::new(R::KIND, self.name())
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut links = self.links();
        links.sort();
        links.dedup();
        links
    }

    fn fingerprint(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Actual>> {
        Ok(Resource::find(self, ctx)?.map(Actual::new))
    }

    fn changes(&self, actual: Option<&Actual>) -> Result<Changes> {
        Changes::compute(self, typed::<R>(actual)?)
    }

    fn plan(&self, actual: Option<&Actual>, changes: &Changes) -> Action {
        if actual.is_none() {
            Action::Create
        } else if changes.is_empty() {
            Action::Noop
        } else if !changes.fields_with(FieldPolicy::Replace, R::field_policy).is_empty() {
            Action::Replace
        } else {
            Action::Update
        }
    }

    fn check_changes(&self, actual: Option<&Actual>, changes: &Changes) -> Result<()> {
        let actual = typed::<R>(actual)?;
        <R as Resource>::check_changes(actual, self, changes)?;
        if actual.is_some() {
            let fields = changes.fields_with(FieldPolicy::Immutable, R::field_policy);
            if !fields.is_empty() {
                return Err(Error::Immutable {
                    key: Task::key(self),
                    fields,
                });
            }
        }
        Ok(())
    }

    fn cloud_id(&self, actual: &Actual) -> Option<String> {
        actual.downcast::<R>().ok().and_then(<R as Resource>::cloud_id)
    }

    fn render(
        &self,
        target: &Target,
        ctx: &ExecContext,
        actual: Option<&Actual>,
        changes: &Changes,
    ) -> Result<Option<String>> {
        let action = Task::plan(self, actual, changes);
        let actual = typed::<R>(actual)?;
        match target {
            Target::Direct(direct) => match (action, actual) {
                (Action::Replace, Some(existing)) => {
                    log::info!("replacing {}", Task::key(self));
                    self.delete_direct(direct, ctx, existing)?;
                    let fresh = Changes::compute(self, None)?;
                    self.render_direct(direct, ctx, None, &fresh)
                }
                _ => self.render_direct(direct, ctx, actual, changes),
            },
            Target::Terraform(tf) => {
                self.render_terraform(tf, actual, changes)?;
                Ok(None)
            }
            Target::DryRun(dry) => {
                dry.record(Task::key(self), action, changes);
                Ok(None)
            }
        }
    }

    fn delete(&self, target: &Target, ctx: &ExecContext, actual: &Actual) -> Result<()> {
        let actual = actual.downcast::<R>()?;
        match target {
            Target::Direct(direct) => self.delete_direct(direct, ctx, actual),
            Target::DryRun(dry) => {
                dry.record(Task::key(self), Action::Delete, &Changes::default());
                Ok(())
            }
            Target::Terraform(_) => Err(Error::permanent(
                "the terraform target cannot delete; run `terraform destroy` on the output",
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
