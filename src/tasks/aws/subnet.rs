use super::managed_tags;
use crate::cloud::aws::{AwsCloud, NAME_TAG, Tags};
use serde::Serialize;
use serde_json::json;
use taskgraph::{
    Changes, DirectTarget, Error, ExecContext, FieldPolicy, Literal, Resource, Result, TaskKey,
    TerraformTarget,
};

/// One zone's subnet inside the cluster VPC
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subnet {
    pub name: String,
    pub vpc: TaskKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl Subnet {
    pub fn new(name: &str, vpc: &TaskKey, zone: &str, cidr: &str, tags: Tags) -> Self {
        Self {
            name: name.to_string(),
            vpc: vpc.clone(),
            zone: Some(zone.to_string()),
            cidr: Some(cidr.to_string()),
            id: None,
            tags: Some(tags),
        }
    }
}

impl Resource for Subnet {
    const KIND: &'static str = "Subnet";

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
        // A VPC that does not exist yet has no subnets
        let Some(vpc_id) = ctx.id_of(&self.vpc) else {
            return Ok(None);
        };
        let api = ctx.cloud_as::<AwsCloud>()?.api()?;
        let subnets = api.list_subnets(&vpc_id)?;
        let found = subnets
            .iter()
            .find(|s| s.tags.get(NAME_TAG) == Some(&self.name))
            .or_else(|| {
                subnets
                    .iter()
                    .find(|s| self.cidr.is_some() && Some(&s.cidr) == self.cidr.as_ref())
            });

        Ok(found.map(|s| Self {
            name: self.name.clone(),
            vpc: self.vpc.clone(),
            zone: Some(s.zone.clone()),
            cidr: Some(s.cidr.clone()),
            id: Some(s.id.clone()),
            tags: managed_tags(self.tags.as_ref(), &s.tags),
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if actual.is_none() {
            if expected.cidr.is_none() {
                return Err(Error::RequiredField("cidr"));
            }
            if expected.zone.is_none() {
                return Err(Error::RequiredField("zone"));
            }
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
        changes: &Changes,
    ) -> Result<Option<String>> {
        let cloud = target.cloud_as::<AwsCloud>()?;
        let api = cloud.api()?;

        if let Some(existing) = actual {
            let id = existing
                .id
                .clone()
                .ok_or_else(|| Error::permanent(format!("subnet {} has no id", self.name)))?;
            if changes.contains("tags")
                && let Some(tags) = &self.tags
            {
                api.create_tags(&id, tags)?;
            }
            return Ok(Some(id));
        }

        let vpc_id = ctx.require_id(&self.vpc)?;
        let zone = self.zone.as_deref().ok_or(Error::RequiredField("zone"))?;
        let cidr = self.cidr.as_deref().ok_or(Error::RequiredField("cidr"))?;
        let subnet = api.create_subnet(&vpc_id, zone, cidr, &self.tags.clone().unwrap_or_default())?;
        log::info!("created subnet {} in {zone}", subnet.id);
        ctx.check_cancelled()?;
        cloud.wait_for_subnet(&vpc_id, &subnet.id, ctx.cancel_token())?;
        Ok(Some(subnet.id))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            "aws_subnet",
            &self.name,
            json!({
                "vpc_id": Literal::reference("aws_vpc", &self.vpc.name, "id"),
                "cidr_block": self.cidr,
                "availability_zone": self.zone,
                "tags": self.tags,
            }),
        )
    }

    fn delete_direct(&self, target: &DirectTarget, _ctx: &ExecContext, actual: &Self) -> Result<()> {
        let Some(id) = &actual.id else {
            return Ok(());
        };
        target.cloud_as::<AwsCloud>()?.api()?.delete_subnet(id)
    }
}
