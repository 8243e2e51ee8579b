use crate::cloud::compute;
use crate::cloud::gce::{GceCloud, network_url};
use serde::Serialize;
use serde_json::json;
use taskgraph::{
    Changes, DirectTarget, ExecContext, Literal, Resource, Result, TaskKey, TerraformTarget,
};

/// The cluster network, in subnet mode unless `cidr` asks for a legacy range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Network {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_create_subnetworks: Option<bool>,
    #[serde(skip)]
    pub self_link: Option<String>,
}

impl Network {
    /// Network whose subnets are declared explicitly
    pub fn custom(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cidr: None,
            auto_create_subnetworks: Some(false),
            self_link: None,
        }
    }
}

impl Resource for Network {
    const KIND: &'static str = "Network";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let cloud = ctx.cloud_as::<GceCloud>()?;
        Ok(cloud
            .api()?
            .get_network(cloud.project(), &self.name)?
            .map(|n| Self {
                name: n.name,
                cidr: n.ipv4_range,
                auto_create_subnetworks: Some(n.auto_create_subnetworks),
                self_link: n.self_link,
            }))
    }

    fn cloud_id(actual: &Self) -> Option<String> {
        actual.self_link.clone()
    }

    fn render_direct(
        &self,
        target: &DirectTarget,
        ctx: &ExecContext,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<Option<String>> {
        let cloud = target.cloud_as::<GceCloud>()?;
        let link = network_url(cloud.project(), &self.name);
        if actual.is_some() {
            return Ok(Some(link));
        }
        let op = cloud.api()?.insert_network(
            cloud.project(),
            &compute::Network {
                name: self.name.clone(),
                self_link: None,
                ipv4_range: self.cidr.clone(),
                auto_create_subnetworks: self.auto_create_subnetworks.unwrap_or(false),
            },
        )?;
        cloud.wait_for_global_op(&op, ctx.cancel_token())?;
        log::info!("created network {}", self.name);
        Ok(Some(link))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            "google_compute_network",
            &self.name,
            json!({
                "name": self.name,
                "ipv4_range": self.cidr,
                "auto_create_subnetworks": self.auto_create_subnetworks.unwrap_or(false),
            }),
        )?;
        target.add_data("network_name", &self.name)?;
        target.add_output(
            "network_self_link",
            Literal::reference("google_compute_network", &self.name, "self_link").into(),
        )
    }

    fn delete_direct(&self, target: &DirectTarget, ctx: &ExecContext, _actual: &Self) -> Result<()> {
        let cloud = target.cloud_as::<GceCloud>()?;
        let op = cloud.api()?.delete_network(cloud.project(), &self.name)?;
        cloud.wait_for_global_op(&op, ctx.cancel_token())
    }
}
