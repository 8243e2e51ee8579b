//! In-memory resource and cloud used by the engine's own tests

use crate::cloud::{Cloud, DnsProvider, ProviderId, VpcInfo};
use crate::context::ExecContext;
use crate::diff::{Changes, FieldPolicy};
use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::target::{DirectTarget, TerraformTarget};
use crate::terraform::Literal;
use crate::types::TaskKey;
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Transient,
    Permanent,
    Panic,
    /// Fire the run's cancel token, then fail transiently
    CancelThenTransient,
}

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    size: Option<u32>,
    label: Option<String>,
    parent_id: Option<String>,
}

/// Cloud holding widgets in a map, with scripted failures
#[derive(Default)]
pub struct FakeCloud {
    objects: Mutex<BTreeMap<String, Stored>>,
    faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeCloud {
    /// Fail the next calls touching `name`, one fault per call
    pub fn inject(&self, name: &str, faults: &[Fault]) {
        self.faults
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(faults.iter().copied());
    }

    fn call(&self, ctx: &ExecContext, name: &str) -> Result<()> {
        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        match fault {
            None => Ok(()),
            Some(Fault::Transient) => Err(Error::transient(format!("throttled on {name}"))),
            Some(Fault::Permanent) => Err(Error::permanent(format!("access denied on {name}"))),
            Some(Fault::Panic) => panic!("widget {name} exploded"),
            Some(Fault::CancelThenTransient) => {
                ctx.cancel_token().cancel();
                Err(Error::transient(format!("read timed out on {name}")))
            }
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.lock().unwrap().contains_key(name)
    }

    pub fn label_of(&self, name: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .and_then(|s| s.label.clone())
    }

    pub fn id_of(&self, name: &str) -> Option<String> {
        self.objects.lock().unwrap().get(name).map(|s| s.id.clone())
    }
}

struct NoDns;

impl DnsProvider for NoDns {
    fn find_zone(&self, _domain: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

impl Cloud for FakeCloud {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Aws
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn dns(&self) -> Result<Arc<dyn DnsProvider>> {
        Ok(Arc::new(NoDns))
    }

    fn find_vpc_info(&self, _id: &str) -> Result<Option<VpcInfo>> {
        Ok(None)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A resource with a replace field, an in-place field and a reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Widget {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<TaskKey>,
    #[serde(skip)]
    pub id: Option<String>,
}

impl Widget {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: None,
            label: None,
            parent: None,
            id: None,
        }
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn parent(mut self, parent: &str) -> Self {
        self.parent = Some(TaskKey::new(Self::KIND, parent));
        self
    }
}

impl Resource for Widget {
    const KIND: &'static str = "Widget";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        self.parent.iter().cloned().collect()
    }

    fn field_policy(field: &str) -> FieldPolicy {
        match field {
            "label" => FieldPolicy::InPlace,
            "size" => FieldPolicy::Replace,
            _ => FieldPolicy::Immutable,
        }
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let cloud = ctx.cloud_as::<FakeCloud>()?;
        cloud.call(ctx, &self.name)?;
        cloud.reads.fetch_add(1, Ordering::SeqCst);
        let stored = cloud.objects.lock().unwrap().get(&self.name).cloned();
        Ok(stored.map(|s| Widget {
            name: self.name.clone(),
            size: s.size,
            label: s.label,
            parent: ctx.reference_for(self.parent.as_ref(), Self::KIND, s.parent_id.as_deref()),
            id: Some(s.id),
        }))
    }

    fn check_changes(_actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if expected.size.is_none() {
            return Err(Error::RequiredField("size"));
        }
        Ok(())
    }

    fn cloud_id(actual: &Self) -> Option<String> {
        actual.id.clone()
    }

    fn render_direct(
        &self,
        target: &DirectTarget,
        ctx: &ExecContext,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<Option<String>> {
        let cloud = target.cloud_as::<FakeCloud>()?;
        cloud.call(ctx, &self.name)?;
        let parent_id = self.parent.as_ref().map(|p| ctx.require_id(p)).transpose()?;
        let id = match actual.and_then(|a| a.id.clone()) {
            Some(id) => id,
            None => format!("w-{}", cloud.next_id.fetch_add(1, Ordering::SeqCst)),
        };
        cloud.writes.fetch_add(1, Ordering::SeqCst);
        cloud.objects.lock().unwrap().insert(
            self.name.clone(),
            Stored {
                id: id.clone(),
                size: self.size,
                label: self.label.clone(),
                parent_id,
            },
        );
        Ok(Some(id))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let parent = self
            .parent
            .as_ref()
            .map(|p| Literal::reference("fake_widget", &p.name, "id"));
        target.render_resource(
            "fake_widget",
            &self.name,
            json!({ "size": self.size, "label": self.label, "parent": parent }),
        )
    }

    fn delete_direct(&self, target: &DirectTarget, ctx: &ExecContext, _actual: &Self) -> Result<()> {
        let cloud = target.cloud_as::<FakeCloud>()?;
        cloud.call(ctx, &self.name)?;
        cloud.writes.fetch_add(1, Ordering::SeqCst);
        cloud.objects.lock().unwrap().remove(&self.name);
        Ok(())
    }
}
