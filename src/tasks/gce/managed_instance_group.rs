use crate::cloud::compute::InstanceGroupManager;
use crate::cloud::gce::GceCloud;
use serde::Serialize;
use serde_json::json;
use taskgraph::{
    Changes, DirectTarget, Error, ExecContext, FieldPolicy, Literal, Resource, Result, TaskKey,
    TerraformTarget,
};

/// Zonal instance group manager for one instance group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagedInstanceGroup {
    pub name: String,
    pub zone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_instance_name: Option<String>,
    pub instance_template: TaskKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_size: Option<u32>,
}

impl Resource for ManagedInstanceGroup {
    const KIND: &'static str = "ManagedInstanceGroup";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        vec![self.instance_template.clone()]
    }

    fn field_policy(field: &str) -> FieldPolicy {
        match field {
            "instance_template" | "target_size" => FieldPolicy::InPlace,
            _ => FieldPolicy::Immutable,
        }
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let cloud = ctx.cloud_as::<GceCloud>()?;
        let Some(m) = cloud
            .api()?
            .get_instance_group_manager(cloud.project(), &self.zone, &self.name)?
        else {
            return Ok(None);
        };
        let instance_template = ctx
            .reference_for(
                Some(&self.instance_template),
                "InstanceTemplate",
                Some(&m.instance_template),
            )
            .unwrap_or_else(|| self.instance_template.clone());
        Ok(Some(Self {
            name: m.name,
            zone: self.zone.clone(),
            base_instance_name: Some(m.base_instance_name),
            instance_template,
            target_size: Some(m.target_size),
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if actual.is_none() && expected.base_instance_name.is_none() {
            return Err(Error::RequiredField("base_instance_name"));
        }
        Ok(())
    }

    fn cloud_id(actual: &Self) -> Option<String> {
        Some(actual.name.clone())
    }

    fn render_direct(
        &self,
        target: &DirectTarget,
        ctx: &ExecContext,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<Option<String>> {
        let cloud = target.cloud_as::<GceCloud>()?;
        let api = cloud.api()?;
        let project = cloud.project();
        let template_url = ctx.require_id(&self.instance_template)?;

        if actual.is_none() {
            let manager = InstanceGroupManager {
                name: self.name.clone(),
                self_link: None,
                zone: None,
                base_instance_name: self
                    .base_instance_name
                    .clone()
                    .ok_or(Error::RequiredField("base_instance_name"))?,
                instance_template: template_url,
                target_size: self.target_size.unwrap_or(0),
            };
            let op = api.insert_instance_group_manager(project, &self.zone, &manager)?;
            cloud.wait_for_zone_op(&op, &self.zone, ctx.cancel_token())?;
            log::info!("created instance group manager {} in {}", self.name, self.zone);
            return Ok(Some(self.name.clone()));
        }

        if changes.contains("instance_template") {
            log::info!("switching {} to a new instance template", self.name);
            let op = api.set_instance_template(project, &self.zone, &self.name, &template_url)?;
            cloud.wait_for_zone_op(&op, &self.zone, ctx.cancel_token())?;
        }
        if changes.contains("target_size")
            && let Some(size) = self.target_size
        {
            log::info!("resizing {} to {size}", self.name);
            ctx.check_cancelled()?;
            let op = api.resize(project, &self.zone, &self.name, size)?;
            cloud.wait_for_zone_op(&op, &self.zone, ctx.cancel_token())?;
        }
        Ok(Some(self.name.clone()))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            "google_compute_instance_group_manager",
            &self.name,
            json!({
                "name": self.name,
                "zone": self.zone,
                "base_instance_name": self.base_instance_name,
                "instance_template": Literal::reference(
                    "google_compute_instance_template",
                    &self.instance_template.name,
                    "self_link",
                ),
                "target_size": self.target_size,
            }),
        )
    }

    fn delete_direct(&self, target: &DirectTarget, ctx: &ExecContext, _actual: &Self) -> Result<()> {
        let cloud = target.cloud_as::<GceCloud>()?;
        let op = cloud
            .api()?
            .delete_instance_group_manager(cloud.project(), &self.zone, &self.name)?;
        cloud.wait_for_zone_op(&op, &self.zone, ctx.cancel_token())
    }
}
