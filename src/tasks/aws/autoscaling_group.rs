use super::managed_tags;
use crate::cloud::aws::{self, AwsCloud, Tags};
use crate::tasks::{references_for, require_ids};
use serde::Serialize;
use serde_json::json;
use taskgraph::{
    Changes, DirectTarget, Error, ExecContext, FieldPolicy, Literal, Resource, Result, TaskKey,
    TerraformTarget,
};

/// Autoscaling group running one instance group across its zone subnets
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoscalingGroup {
    pub name: String,
    pub launch_configuration: TaskKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u32>,
    pub subnets: Vec<TaskKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Launch configuration a found group is running
    #[serde(skip)]
    pub launch_configuration_name: Option<String>,
}

impl Resource for AutoscalingGroup {
    const KIND: &'static str = "AutoscalingGroup";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        let mut links = self.subnets.clone();
        links.push(self.launch_configuration.clone());
        links
    }

    fn field_policy(field: &str) -> FieldPolicy {
        match field {
            "name" => FieldPolicy::Immutable,
            _ => FieldPolicy::InPlace,
        }
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let api = ctx.cloud_as::<AwsCloud>()?.api()?;
        let Some(group) = api.find_autoscaling_group(&self.name)? else {
            return Ok(None);
        };
        let launch_configuration = ctx
            .reference_for(
                Some(&self.launch_configuration),
                "LaunchConfiguration",
                Some(&group.launch_configuration_name),
            )
            .unwrap_or_else(|| self.launch_configuration.clone());
        Ok(Some(Self {
            name: group.name,
            launch_configuration,
            min_size: Some(group.min_size),
            max_size: Some(group.max_size),
            subnets: references_for(ctx, &self.subnets, "Subnet", &group.subnet_ids),
            tags: managed_tags(self.tags.as_ref(), &group.tags),
            launch_configuration_name: Some(group.launch_configuration_name),
        }))
    }

    fn check_changes(_actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if let (Some(min), Some(max)) = (expected.min_size, expected.max_size)
            && min > max
        {
            return Err(Error::permanent(format!(
                "autoscaling group {}: min size {min} exceeds max size {max}",
                expected.name
            )));
        }
        if expected.subnets.is_empty() {
            return Err(Error::RequiredField("subnets"));
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
        _changes: &Changes,
    ) -> Result<Option<String>> {
        let api = target.cloud_as::<AwsCloud>()?.api()?;
        let mut subnet_ids = require_ids(ctx, &self.subnets)?;
        subnet_ids.sort();
        let group = aws::AutoscalingGroup {
            name: self.name.clone(),
            launch_configuration_name: ctx.require_id(&self.launch_configuration)?,
            min_size: self.min_size.unwrap_or(1),
            max_size: self.max_size.or(self.min_size).unwrap_or(1),
            subnet_ids,
            tags: self.tags.clone().unwrap_or_default(),
        };

        if let Some(actual) = actual {
            log::info!("updating autoscaling group {}", self.name);
            api.update_autoscaling_group(&group)?;
            // The previous version is unused once the group has moved off it
            if let Some(previous) = &actual.launch_configuration_name
                && *previous != group.launch_configuration_name
            {
                match api.delete_launch_configuration(previous) {
                    Ok(()) => log::info!("deleted launch configuration {previous}"),
                    Err(e) => log::warn!("could not delete launch configuration {previous}: {e}"),
                }
            }
        } else {
            log::info!("creating autoscaling group {}", self.name);
            api.create_autoscaling_group(&group)?;
        }
        Ok(Some(self.name.clone()))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let subnets: Vec<Literal> = self
            .subnets
            .iter()
            .map(|s| Literal::reference("aws_subnet", &s.name, "id"))
            .collect();
        let tags: Vec<_> = self
            .tags
            .iter()
            .flatten()
            .map(|(key, value)| json!({ "key": key, "value": value, "propagate_at_launch": true }))
            .collect();

        target.render_resource(
            "aws_autoscaling_group",
            &self.name,
            json!({
                "name": self.name,
                "launch_configuration": Literal::reference(
                    "aws_launch_configuration",
                    &self.launch_configuration.name,
                    "id",
                ),
                "min_size": self.min_size,
                "max_size": self.max_size,
                "vpc_zone_identifier": subnets,
                "tag": tags,
            }),
        )
    }

    fn delete_direct(&self, target: &DirectTarget, _ctx: &ExecContext, actual: &Self) -> Result<()> {
        target
            .cloud_as::<AwsCloud>()?
            .api()?
            .delete_autoscaling_group(&actual.name)
    }
}
