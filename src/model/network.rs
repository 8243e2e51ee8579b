use super::ClusterModel;
use crate::api::CloudProvider;
use crate::tasks::{aws, gce};
use taskgraph::{Error, ModelBuilder, ModelContext, Result};

/// Subnet range for GCE clusters that set neither `networkCIDR` nor zone cidrs
const DEFAULT_GCE_SUBNET_CIDR: &str = "10.128.0.0/20";

/// The VPC (or GCE network) and its subnets
pub struct NetworkModelBuilder<'a> {
    pub model: &'a ClusterModel<'a>,
}

impl ModelBuilder for NetworkModelBuilder<'_> {
    fn build(&self, ctx: &mut ModelContext) -> Result<()> {
        match self.model.provider()? {
            CloudProvider::Aws => self.build_aws(ctx),
            CloudProvider::Gce => self.build_gce(ctx),
        }
    }
}

impl NetworkModelBuilder<'_> {
    fn build_aws(&self, ctx: &mut ModelContext) -> Result<()> {
        let model = self.model;
        let name = model.cluster_name();
        let spec = &model.cluster.spec;

        let vpc = match spec.network_id.as_deref() {
            Some(id) => aws::Vpc::shared(name, id, self.shared_vpc_cidr(id)?.as_deref()),
            None => {
                let cidr = spec.network_cidr.as_deref().ok_or_else(|| {
                    Error::Validation(format!("networkCIDR required for AWS cluster {name}"))
                })?;
                aws::Vpc::new(name, cidr, model.cloud_tags(name))
            }
        };
        let vpc = ctx.add(vpc)?;

        for zone in &spec.zones {
            let cidr = zone.cidr.as_deref().ok_or_else(|| {
                Error::Validation(format!("zone {} requires a cidr", zone.name))
            })?;
            let subnet_name = model.subnet_name(&zone.name);
            let tags = model.cloud_tags(&subnet_name);
            ctx.add(aws::Subnet::new(&subnet_name, &vpc, &zone.name, cidr, tags))?;
        }
        Ok(())
    }

    /// CIDR of an adopted VPC, checked against `networkCIDR` when both are known
    fn shared_vpc_cidr(&self, id: &str) -> Result<Option<String>> {
        let declared = self.model.cluster.spec.network_cidr.clone();
        let Some(cloud) = self.model.cloud else {
            log::warn!("cannot verify VPC {id} while offline");
            return Ok(declared);
        };
        let info = cloud
            .find_vpc_info(id)?
            .ok_or_else(|| Error::Validation(format!("VPC {id} not found")))?;
        match (declared, info.cidr) {
            (Some(declared), Some(actual)) if declared != actual => Err(Error::Validation(format!(
                "networkCIDR {declared} does not match the CIDR {actual} of VPC {id}"
            ))),
            (Some(declared), _) => Ok(Some(declared)),
            (None, actual) => Ok(actual),
        }
    }

    fn build_gce(&self, ctx: &mut ModelContext) -> Result<()> {
        let model = self.model;
        let network = ctx.add(gce::Network::custom(&model.cluster.dashed_name()))?;

        let region = model.region()?;
        let cidr = model
            .cluster
            .spec
            .network_cidr
            .clone()
            .or_else(|| model.cluster.spec.zones.iter().find_map(|z| z.cidr.clone()))
            .unwrap_or_else(|| DEFAULT_GCE_SUBNET_CIDR.to_string());
        ctx.add(gce::Subnet::new(
            &model.gce_subnet_name(&region),
            &network,
            &region,
            &cidr,
        ))?;
        Ok(())
    }
}
