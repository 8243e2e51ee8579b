use super::managed_tags;
use crate::cloud::aws::{AwsCloud, Tags};
use serde::Serialize;
use serde_json::json;
use taskgraph::{
    Changes, DirectTarget, Error, ExecContext, FieldPolicy, Literal, Resource, Result, TaskKey,
    TerraformTarget,
};

/// A per-role security group; its rules are separate tasks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityGroup {
    pub name: String,
    pub vpc: TaskKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl SecurityGroup {
    pub fn new(name: &str, vpc: &TaskKey, description: &str, tags: Tags) -> Self {
        Self {
            name: name.to_string(),
            vpc: vpc.clone(),
            description: Some(description.to_string()),
            id: None,
            tags: Some(tags),
        }
    }
}

impl Resource for SecurityGroup {
    const KIND: &'static str = "SecurityGroup";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        vec![self.vpc.clone()]
    }

    fn field_policy(field: &str) -> FieldPolicy {
        match field {
            "tags" => FieldPolicy::InPlace,
            _ => FieldPolicy::Immutable,
        }
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let Some(vpc_id) = ctx.id_of(&self.vpc) else {
            return Ok(None);
        };
        let api = ctx.cloud_as::<AwsCloud>()?.api()?;
        Ok(api.find_security_group(&vpc_id, &self.name)?.map(|g| Self {
            name: g.name,
            vpc: self.vpc.clone(),
            description: Some(g.description),
            id: Some(g.id),
            tags: managed_tags(self.tags.as_ref(), &g.tags),
        }))
    }

    fn cloud_id(actual: &Self) -> Option<String> {
        actual.id.clone()
    }

    fn render_direct(
        &self,
        target: &DirectTarget,
        ctx: &ExecContext,
        actual: Option<&Self>,
        changes: &Changes,
    ) -> Result<Option<String>> {
        let api = target.cloud_as::<AwsCloud>()?.api()?;

        if let Some(existing) = actual {
            let id = existing.id.clone().ok_or_else(|| {
                Error::permanent(format!("security group {} has no id", self.name))
            })?;
            if changes.contains("tags")
                && let Some(tags) = &self.tags
            {
                api.create_tags(&id, tags)?;
            }
            return Ok(Some(id));
        }

        let vpc_id = ctx.require_id(&self.vpc)?;
        let description = self.description.as_deref().unwrap_or(&self.name);
        let id = api.create_security_group(
            &vpc_id,
            &self.name,
            description,
            &self.tags.clone().unwrap_or_default(),
        )?;
        log::info!("created security group {id} ({})", self.name);
        Ok(Some(id))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            "aws_security_group",
            &self.name,
            json!({
                "name": self.name,
                "vpc_id": Literal::reference("aws_vpc", &self.vpc.name, "id"),
                "description": self.description,
                "tags": self.tags,
            }),
        )
    }

    fn delete_direct(&self, target: &DirectTarget, _ctx: &ExecContext, actual: &Self) -> Result<()> {
        let Some(id) = &actual.id else {
            return Ok(());
        };
        target
            .cloud_as::<AwsCloud>()?
            .api()?
            .delete_security_group(id)
    }
}
