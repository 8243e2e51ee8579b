use super::channel::Channel;
use super::cluster::{CloudProvider, Cluster};
use super::{Document, Kind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type InstanceGroup = Document<InstanceGroupSpec>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Master,
    #[default]
    Node,
    Bastion,
}

impl Role {
    /// Lowercase form used in resource names (`masters.ex.com`, `node-egress`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Node => "node",
            Self::Bastion => "bastion",
        }
    }

    /// Plural form used for per-role security groups
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Master => "masters",
            Self::Node => "nodes",
            Self::Bastion => "bastion",
        }
    }

    pub fn parse(role: &str) -> Option<Self> {
        [Self::Master, Self::Node, Self::Bastion]
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(role) || r.plural().eq_ignore_ascii_case(role))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cloud_labels: BTreeMap<String, String>,
}

const DEFAULT_ROOT_VOLUME_SIZE: u32 = 20;

fn default_machine_type(provider: CloudProvider, role: Role) -> &'static str {
    match (provider, role) {
        (CloudProvider::Aws, Role::Master) => "m3.medium",
        (CloudProvider::Aws, _) => "t2.medium",
        (CloudProvider::Gce, Role::Master) => "n1-standard-1",
        (CloudProvider::Gce, _) => "n1-standard-2",
    }
}

fn default_image(provider: CloudProvider) -> &'static str {
    match provider {
        CloudProvider::Aws => "kope.io/k8s-1.4-debian-jessie-amd64-hvm-ebs-2016-10-21",
        CloudProvider::Gce => "cos-cloud/cos-stable-65-10323-64-0",
    }
}

impl Document<InstanceGroupSpec> {
    /// Templated group with defaults taken from the cluster and its channel
    pub fn template(cluster: &Cluster, name: &str, role: Role, channel: Option<&Channel>) -> Self {
        let provider = cluster.spec.cloud_provider.unwrap_or(CloudProvider::Aws);
        let size = if role == Role::Node { 2 } else { 1 };
        let zones = match role {
            Role::Node => cluster.zone_names(),
            Role::Master | Role::Bastion => cluster.zone_names().into_iter().take(1).collect(),
        };
        let image = channel
            .and_then(|c| c.find_image(provider))
            .map(|i| i.name.clone())
            .unwrap_or_else(|| default_image(provider).to_string());

        Self::new(
            Kind::InstanceGroup,
            name,
            InstanceGroupSpec {
                role: Some(role),
                machine_type: Some(default_machine_type(provider, role).to_string()),
                min_size: Some(size),
                max_size: Some(size),
                zones,
                image: Some(image),
                ..InstanceGroupSpec::default()
            },
        )
    }

    pub fn role(&self) -> Role {
        self.spec.role.unwrap_or_default()
    }

    pub fn min_size(&self) -> u32 {
        self.spec.min_size.unwrap_or(1)
    }

    pub fn max_size(&self) -> u32 {
        self.spec.max_size.unwrap_or_else(|| self.min_size())
    }

    pub fn root_volume_size(&self) -> u32 {
        self.spec.root_volume_size.unwrap_or(DEFAULT_ROOT_VOLUME_SIZE)
    }

    /// Zones of the group, falling back to every cluster zone
    pub fn zones_in(&self, cluster: &Cluster) -> Vec<String> {
        if self.spec.zones.is_empty() {
            cluster.zone_names()
        } else {
            self.spec.zones.clone()
        }
    }
}
