//! Model builders: translate a cluster and its instance groups into tasks
//!
//! Each builder covers one concern (network, firewall, external access,
//! instance groups) and links to the others only through [`TaskKey`]s made
//! by the `link_to_*` helpers below, so builders run in any order.

pub mod bootstrap;
pub mod external_access;
pub mod firewall;
pub mod instance_group;
pub mod network;

pub use external_access::ExternalAccessModelBuilder;
pub use firewall::FirewallModelBuilder;
pub use instance_group::InstanceGroupModelBuilder;
pub use network::NetworkModelBuilder;

use crate::api::{Channel, CloudProvider, Cluster, InstanceGroup, Role};
use crate::cloud::aws::{CLUSTER_TAG, NAME_TAG, Tags};
use crate::tasks::{aws, gce};
use taskgraph::{Cloud, Error, ModelBuilder, ModelContext, Resource, Result, TaskKey, build_model};

/// GCE resource names are limited to 63 characters
pub const GCE_NAME_LIMIT: usize = 63;

/// Everything a builder may read
pub struct ClusterModel<'a> {
    pub cluster: &'a Cluster,
    pub instance_groups: &'a [InstanceGroup],
    pub channel: Option<&'a Channel>,
    /// Provider facade for build-time lookups; `None` when offline
    pub cloud: Option<&'a dyn Cloud>,
}

impl<'a> ClusterModel<'a> {
    pub fn new(cluster: &'a Cluster, instance_groups: &'a [InstanceGroup]) -> Self {
        Self {
            cluster,
            instance_groups,
            channel: None,
            cloud: None,
        }
    }

    pub fn with_channel(mut self, channel: Option<&'a Channel>) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_cloud(mut self, cloud: &'a dyn Cloud) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn cluster_name(&self) -> &str {
        self.cluster.name()
    }

    pub fn provider(&self) -> Result<CloudProvider> {
        self.cluster.spec.cloud_provider.ok_or_else(|| {
            Error::Validation(format!("cloudProvider required for cluster {}", self.cluster_name()))
        })
    }

    pub fn region(&self) -> Result<String> {
        self.cluster.region().ok_or_else(|| {
            Error::Validation(format!(
                "cannot determine the region of cluster {}",
                self.cluster_name()
            ))
        })
    }

    pub fn has_bastion(&self) -> bool {
        self.instance_groups.iter().any(|g| g.role() == Role::Bastion)
    }

    /// The group's image, else the channel's image for the provider
    pub fn image_for(&self, group: &InstanceGroup) -> Result<String> {
        if let Some(image) = &group.spec.image {
            return Ok(image.clone());
        }
        let provider = self.provider()?;
        self.channel
            .and_then(|c| c.find_image(provider))
            .map(|i| i.name.clone())
            .ok_or_else(|| {
                Error::Validation(format!("instance group {} has no image", group.name()))
            })
    }

    /// Cluster labels plus the `Name` and cluster ownership tags
    pub fn cloud_tags(&self, name: &str) -> Tags {
        let mut tags = self.cluster.spec.cloud_labels.clone();
        tags.insert(NAME_TAG.to_string(), name.to_string());
        tags.insert(CLUSTER_TAG.to_string(), self.cluster_name().to_string());
        tags
    }

    // ========================================================================
    // AWS names and links
    // ========================================================================

    pub fn security_group_name(&self, role: Role) -> String {
        format!("{}.{}", role.plural(), self.cluster_name())
    }

    pub fn subnet_name(&self, zone: &str) -> String {
        format!("{zone}.{}", self.cluster_name())
    }

    /// `<group>.<cluster>`, shared by the launch configuration and autoscaling group
    pub fn aws_group_name(&self, group: &InstanceGroup) -> String {
        format!("{}.{}", group.name(), self.cluster_name())
    }

    pub fn link_to_vpc(&self) -> TaskKey {
        TaskKey::new(aws::Vpc::KIND, self.cluster_name())
    }

    pub fn link_to_security_group(&self, role: Role) -> TaskKey {
        TaskKey::new(aws::SecurityGroup::KIND, self.security_group_name(role))
    }

    pub fn link_to_subnet(&self, zone: &str) -> TaskKey {
        TaskKey::new(aws::Subnet::KIND, self.subnet_name(zone))
    }

    // ========================================================================
    // GCE names and links
    // ========================================================================

    pub fn gce_project(&self) -> Result<&str> {
        self.cluster
            .spec
            .project
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                Error::Validation(format!("project required for GCE cluster {}", self.cluster_name()))
            })
    }

    /// `<region>-<cluster-dashed>`
    pub fn gce_subnet_name(&self, region: &str) -> String {
        gce_name(&format!("{region}-{}", self.cluster.dashed_name()))
    }

    /// `<group>-<cluster-dashed>`, also used as the base instance name
    pub fn gce_group_name(&self, group: &InstanceGroup) -> String {
        gce_name(&format!("{}-{}", group.name(), self.cluster.dashed_name()))
    }

    pub fn link_to_network(&self) -> TaskKey {
        TaskKey::new(gce::Network::KIND, self.cluster.dashed_name())
    }

    pub fn link_to_gce_subnet(&self, region: &str) -> TaskKey {
        TaskKey::new(gce::Subnet::KIND, self.gce_subnet_name(region))
    }
}

/// Dots replaced and truncated to the GCE name limit
pub fn gce_name(name: &str) -> String {
    let mut name = name.replace('.', "-");
    if name.len() > GCE_NAME_LIMIT {
        name.truncate(GCE_NAME_LIMIT);
        while name.ends_with('-') {
            name.pop();
        }
    }
    name
}

/// Run every builder that applies to the cluster's provider
pub fn build(model: &ClusterModel<'_>) -> Result<ModelContext> {
    let network = NetworkModelBuilder { model };
    let firewall = FirewallModelBuilder { model };
    let external = ExternalAccessModelBuilder { model };
    let groups = InstanceGroupModelBuilder { model };

    let mut builders: Vec<&dyn ModelBuilder> = vec![&network];
    // GCE firewalling is left to the network defaults
    if model.provider()? == CloudProvider::Aws {
        builders.push(&firewall);
        builders.push(&external);
    }
    builders.push(&groups);
    let ctx = build_model(&builders)?;
    log::debug!("model for {} has {} tasks", model.cluster_name(), ctx.len());
    Ok(ctx)
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::api::{
        CloudProvider, Cluster, ClusterSpec, ClusterZone, InstanceGroup, Networking, Overlays, Role,
    };

    pub fn aws_cluster(networking: Networking) -> Cluster {
        Cluster::new_cluster(
            "ex.com",
            ClusterSpec {
                cloud_provider: Some(CloudProvider::Aws),
                network_cidr: Some("10.0.0.0/16".into()),
                zones: vec![
                    ClusterZone {
                        name: "us-east-1a".into(),
                        cidr: Some("10.0.32.0/19".into()),
                    },
                    ClusterZone {
                        name: "us-east-1b".into(),
                        cidr: Some("10.0.64.0/19".into()),
                    },
                ],
                networking: Some(Overlays::single(networking)),
                ..ClusterSpec::default()
            },
        )
    }

    pub fn gce_cluster() -> Cluster {
        Cluster::new_cluster(
            "ex.com",
            ClusterSpec {
                cloud_provider: Some(CloudProvider::Gce),
                project: Some("proj".into()),
                zones: vec![
                    ClusterZone {
                        name: "us-central1-a".into(),
                        cidr: None,
                    },
                    ClusterZone {
                        name: "us-central1-b".into(),
                        cidr: None,
                    },
                ],
                ..ClusterSpec::default()
            },
        )
    }

    /// Master and nodes groups, plus a bastion when asked
    pub fn groups(cluster: &Cluster, bastion: bool) -> Vec<InstanceGroup> {
        let mut groups = vec![
            InstanceGroup::template(cluster, "master-us-east-1a", Role::Master, None),
            InstanceGroup::template(cluster, "nodes", Role::Node, None),
        ];
        if bastion {
            groups.push(InstanceGroup::template(cluster, "bastions", Role::Bastion, None));
        }
        groups
    }
}
