use super::managed_tags;
use crate::cloud::aws::{AwsCloud, Tags};
use serde::Serialize;
use serde_json::json;
use taskgraph::{
    Changes, DirectTarget, Error, ExecContext, FieldPolicy, Literal, Resource, Result, TaskKey,
    TerraformTarget,
};

/// The cluster VPC, created or adopted by id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vpc {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    /// Set for an adopted VPC; created VPCs are matched by `Name` tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl Vpc {
    pub fn new(name: &str, cidr: &str, tags: Tags) -> Self {
        Self {
            name: name.to_string(),
            cidr: Some(cidr.to_string()),
            id: None,
            tags: Some(tags),
        }
    }

    /// An existing VPC the cluster runs in but does not own
    pub fn shared(name: &str, id: &str, cidr: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            cidr: cidr.map(ToString::to_string),
            id: Some(id.to_string()),
            tags: None,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.id.is_some()
    }
}

impl Resource for Vpc {
    const KIND: &'static str = "VPC";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    fn field_policy(field: &str) -> FieldPolicy {
        match field {
            "tags" => FieldPolicy::InPlace,
            _ => FieldPolicy::Immutable,
        }
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let api = ctx.cloud_as::<AwsCloud>()?.api()?;
        let found = match &self.id {
            Some(id) => api.get_vpc(id)?,
            None => api.find_vpc(&self.name)?,
        };
        Ok(found.map(|vpc| Self {
            name: self.name.clone(),
            cidr: Some(vpc.cidr),
            id: Some(vpc.id),
            tags: managed_tags(self.tags.as_ref(), &vpc.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        match (actual, &expected.id) {
            (None, Some(id)) => Err(Error::permanent(format!(
                "shared VPC {id} does not exist"
            ))),
            (None, None) if expected.cidr.is_none() => Err(Error::RequiredField("cidr")),
            _ => Ok(()),
        }
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
        let cloud = target.cloud_as::<AwsCloud>()?;
        let api = cloud.api()?;

        if let Some(existing) = actual {
            let id = existing
                .id
                .clone()
                .ok_or_else(|| Error::permanent(format!("VPC {} has no id", self.name)))?;
            if changes.contains("tags")
                && let Some(tags) = &self.tags
            {
                log::info!("updating tags of VPC {id}");
                api.create_tags(&id, tags)?;
            }
            return Ok(Some(id));
        }

        let cidr = self.cidr.as_deref().ok_or(Error::RequiredField("cidr"))?;
        let vpc = api.create_vpc(cidr, &self.tags.clone().unwrap_or_default())?;
        log::info!("created VPC {} for {}", vpc.id, self.name);
        ctx.check_cancelled()?;
        cloud.wait_for_vpc(&vpc.id, ctx.cancel_token())?;
        Ok(Some(vpc.id))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        if let Some(id) = &self.id {
            return Err(Error::permanent(format!(
                "terraform output cannot adopt the existing VPC {id}"
            )));
        }
        target.render_resource(
            "aws_vpc",
            &self.name,
            json!({
                "cidr_block": self.cidr,
                "enable_dns_hostnames": true,
                "enable_dns_support": true,
                "tags": self.tags,
            }),
        )?;
        if let Some(cidr) = &self.cidr {
            target.add_data("network_cidr", cidr)?;
        }
        target.add_output("vpc_id", Literal::reference("aws_vpc", &self.name, "id").into())
    }

    fn delete_direct(&self, target: &DirectTarget, _ctx: &ExecContext, actual: &Self) -> Result<()> {
        if self.is_shared() {
            log::info!("leaving shared VPC {} in place", self.name);
            return Ok(());
        }
        let Some(id) = &actual.id else {
            return Ok(());
        };
        target.cloud_as::<AwsCloud>()?.api()?.delete_vpc(id)
    }
}
