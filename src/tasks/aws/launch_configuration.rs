use crate::cloud::aws::{self, AwsCloud};
use crate::tasks::{references_for, require_ids};
use serde::Serialize;
use serde_json::json;
use taskgraph::{
    Blob, Changes, DirectTarget, Error, ExecContext, FieldPolicy, Literal, Resource, Result,
    TaskKey, TerraformTarget, short_digest,
};

/// Instance launch template for one autoscaling group
///
/// Launch configurations are immutable in EC2. Each version is stored as
/// `<name>-<digest>`, where the digest covers the resolved content; a change
/// creates a new version and the autoscaling group moves over to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchConfiguration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    pub security_groups: Vec<TaskKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_volume_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associate_public_ip: Option<bool>,
    /// Versioned EC2 name of a found configuration
    #[serde(skip)]
    pub cloud_name: Option<String>,
}

impl LaunchConfiguration {
    fn version_prefix(&self) -> String {
        format!("{}-", self.name)
    }

    /// EC2 request for this content, with security groups resolved
    fn request(&self, ctx: &ExecContext) -> Result<aws::LaunchConfiguration> {
        let mut security_group_ids = require_ids(ctx, &self.security_groups)?;
        security_group_ids.sort();
        let user_data = self
            .user_data
            .as_ref()
            .map(|blob| blob.as_str().map(ToString::to_string))
            .transpose()?;
        let mut request = aws::LaunchConfiguration {
            name: String::new(),
            image_id: self.image_id.clone().ok_or(Error::RequiredField("image_id"))?,
            instance_type: self
                .instance_type
                .clone()
                .ok_or(Error::RequiredField("instance_type"))?,
            security_group_ids,
            user_data,
            root_volume_size: self.root_volume_size,
            root_volume_type: self.root_volume_type.clone(),
            associate_public_ip: self.associate_public_ip.unwrap_or(false),
        };
        let digest = json!({
            "image_id": request.image_id,
            "instance_type": request.instance_type,
            "security_group_ids": request.security_group_ids,
            "user_data": self.user_data,
            "root_volume_size": request.root_volume_size,
            "root_volume_type": request.root_volume_type,
            "associate_public_ip": request.associate_public_ip,
        });
        request.name = format!(
            "{}{}",
            self.version_prefix(),
            short_digest(&serde_json::to_vec(&digest)?)
        );
        Ok(request)
    }
}

impl Resource for LaunchConfiguration {
    const KIND: &'static str = "LaunchConfiguration";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        self.security_groups.clone()
    }

    fn field_policy(field: &str) -> FieldPolicy {
        match field {
            "name" => FieldPolicy::Immutable,
            _ => FieldPolicy::InPlace,
        }
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let api = ctx.cloud_as::<AwsCloud>()?.api()?;
        let mut versions = api.list_launch_configurations(&self.version_prefix())?;
        versions.sort_by(|a, b| a.name.cmp(&b.name));
        // Prefer the version matching the expected content; security groups
        // may not exist yet, in which case any version is a candidate
        let wanted = self.request(ctx).ok().map(|r| r.name);
        let pick = wanted
            .and_then(|w| versions.iter().position(|c| c.name == w))
            .or_else(|| versions.len().checked_sub(1));
        let Some(config) = pick.map(|i| versions.swap_remove(i)) else {
            return Ok(None);
        };

        Ok(Some(Self {
            name: self.name.clone(),
            image_id: Some(config.image_id),
            instance_type: Some(config.instance_type),
            security_groups: references_for(
                ctx,
                &self.security_groups,
                "SecurityGroup",
                &config.security_group_ids,
            ),
            user_data: config.user_data.map(Blob::text),
            root_volume_size: config.root_volume_size,
            root_volume_type: config.root_volume_type,
            associate_public_ip: Some(config.associate_public_ip),
            cloud_name: Some(config.name),
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if actual.is_none() {
            if expected.image_id.is_none() {
                return Err(Error::RequiredField("image_id"));
            }
            if expected.instance_type.is_none() {
                return Err(Error::RequiredField("instance_type"));
            }
        }
        Ok(())
    }

    fn cloud_id(actual: &Self) -> Option<String> {
        actual.cloud_name.clone()
    }

    fn render_direct(
        &self,
        target: &DirectTarget,
        ctx: &ExecContext,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<Option<String>> {
        let request = self.request(ctx)?;
        if changes.is_empty()
            && let Some(name) = actual.and_then(|a| a.cloud_name.clone())
        {
            return Ok(Some(name));
        }
        let api = target.cloud_as::<AwsCloud>()?.api()?;
        api.create_launch_configuration(&request)?;
        log::info!("created launch configuration {}", request.name);
        Ok(Some(request.name))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let security_groups: Vec<Literal> = self
            .security_groups
            .iter()
            .map(|g| Literal::reference("aws_security_group", &g.name, "id"))
            .collect();
        let user_data = self
            .user_data
            .as_ref()
            .map(|blob| blob.as_str().map(Literal::text))
            .transpose()?;

        target.render_resource(
            "aws_launch_configuration",
            &self.name,
            json!({
                "name_prefix": self.version_prefix(),
                "image_id": self.image_id,
                "instance_type": self.instance_type,
                "security_groups": security_groups,
                "associate_public_ip_address": self.associate_public_ip.unwrap_or(false),
                "user_data": user_data,
                "root_block_device": {
                    "volume_type": self.root_volume_type,
                    "volume_size": self.root_volume_size,
                    "delete_on_termination": true,
                },
                "lifecycle": { "create_before_destroy": true },
            }),
        )
    }

    /// Removes every stored version
    fn delete_direct(&self, target: &DirectTarget, _ctx: &ExecContext, _actual: &Self) -> Result<()> {
        let api = target.cloud_as::<AwsCloud>()?.api()?;
        for config in api.list_launch_configurations(&self.version_prefix())? {
            api.delete_launch_configuration(&config.name)?;
        }
        Ok(())
    }
}
