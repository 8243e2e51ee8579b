use crate::cloud::compute::Subnetwork;
use crate::cloud::gce::{GceCloud, subnetwork_url};
use serde::Serialize;
use serde_json::json;
use taskgraph::{
    Changes, DirectTarget, Error, ExecContext, Literal, Resource, Result, TaskKey,
    TerraformTarget,
};

/// A regional subnetwork of the cluster network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subnet {
    pub name: String,
    pub network: TaskKey,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip)]
    pub self_link: Option<String>,
}

impl Subnet {
    pub fn new(name: &str, network: &TaskKey, region: &str, cidr: &str) -> Self {
        Self {
            name: name.to_string(),
            network: network.clone(),
            region: region.to_string(),
            cidr: Some(cidr.to_string()),
            self_link: None,
        }
    }
}

impl Resource for Subnet {
    const KIND: &'static str = "Subnet";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        vec![self.network.clone()]
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let cloud = ctx.cloud_as::<GceCloud>()?;
        let Some(s) = cloud
            .api()?
            .get_subnetwork(cloud.project(), &self.region, &self.name)?
        else {
            return Ok(None);
        };
        let network = ctx
            .reference_for(Some(&self.network), "Network", Some(&s.network))
            .unwrap_or_else(|| self.network.clone());
        Ok(Some(Self {
            name: s.name,
            network,
            region: self.region.clone(),
            cidr: Some(s.ip_cidr_range),
            self_link: s.self_link,
        }))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if actual.is_none() && expected.cidr.is_none() {
            return Err(Error::RequiredField("cidr"));
        }
        Ok(())
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
        let link = subnetwork_url(cloud.project(), &self.region, &self.name);
        if actual.is_some() {
            return Ok(Some(link));
        }
        let subnetwork = Subnetwork {
            name: self.name.clone(),
            self_link: None,
            network: ctx.require_id(&self.network)?,
            region: None,
            ip_cidr_range: self.cidr.clone().ok_or(Error::RequiredField("cidr"))?,
        };
        let op = cloud
            .api()?
            .insert_subnetwork(cloud.project(), &self.region, &subnetwork)?;
        cloud.wait_for_region_op(&op, ctx.cancel_token())?;
        log::info!("created subnet {} in {}", self.name, self.region);
        Ok(Some(link))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            "google_compute_subnetwork",
            &self.name,
            json!({
                "name": self.name,
                "network": Literal::reference("google_compute_network", &self.network.name, "name"),
                "region": self.region,
                "ip_cidr_range": self.cidr,
            }),
        )
    }

    fn delete_direct(&self, target: &DirectTarget, ctx: &ExecContext, _actual: &Self) -> Result<()> {
        let cloud = target.cloud_as::<GceCloud>()?;
        let op = cloud
            .api()?
            .delete_subnetwork(cloud.project(), &self.region, &self.name)?;
        cloud.wait_for_region_op(&op, ctx.cancel_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::gce::network_url;
    use crate::tasks::gce::testing::{Harness, PROJECT};

    #[test]
    fn test_network_reference_round_trips() {
        let h = Harness::new();
        let network = TaskKey::new("Network", "ex-com");
        h.ctx.publish(&network, network_url(PROJECT, "ex-com"));

        let subnet = Subnet::new("us-central1-ex-com", &network, "us-central1", "10.0.0.0/20");
        subnet
            .render_direct(&h.target, &h.ctx, None, &Changes::compute(&subnet, None).unwrap())
            .unwrap();

        let actual = Resource::find(&subnet, &h.ctx).unwrap().unwrap();
        assert_eq!(actual.network, network);
        assert!(Changes::compute(&subnet, Some(&actual)).unwrap().is_empty());
    }

    #[test]
    fn test_foreign_network_is_a_change() {
        let h = Harness::new();
        let network = TaskKey::new("Network", "ex-com");
        h.ctx.publish(&network, network_url(PROJECT, "other"));
        let subnet = Subnet::new("us-central1-ex-com", &network, "us-central1", "10.0.0.0/20");
        subnet
            .render_direct(&h.target, &h.ctx, None, &Changes::default())
            .unwrap();

        h.ctx.publish(&network, network_url(PROJECT, "ex-com"));
        let actual = Resource::find(&subnet, &h.ctx).unwrap().unwrap();
        let changes = Changes::compute(&subnet, Some(&actual)).unwrap();
        assert_eq!(changes.field_names(), vec!["network"]);
    }
}
