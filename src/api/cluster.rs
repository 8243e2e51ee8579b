use super::{Document, Kind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use taskgraph::ProviderId;

pub type Cluster = Document<ClusterSpec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gce,
}

impl CloudProvider {
    pub fn provider_id(self) -> ProviderId {
        match self {
            Self::Aws => ProviderId::Aws,
            Self::Gce => ProviderId::Gce,
        }
    }

    /// Region a zone belongs to (`us-east-1a` → `us-east-1`, `us-central1-b` → `us-central1`)
    pub fn region_of(self, zone: &str) -> Option<String> {
        match self {
            Self::Aws => {
                let last = zone.chars().last()?;
                last.is_ascii_lowercase()
                    .then(|| zone[..zone.len() - 1].to_string())
            }
            Self::Gce => zone
                .rsplit_once('-')
                .filter(|(region, suffix)| !region.is_empty() && suffix.len() == 1)
                .map(|(region, _)| region.to_string()),
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_id().as_str())
    }
}

/// Overlay network selection
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Networking {
    #[default]
    Kubenet,
    Kopeio,
    Weave,
    Flannel,
    Calico,
}

/// Written as one overlay name or a list of them
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum OverlayList {
    One(Networking),
    Many(Vec<Networking>),
}

/// The overlays a cluster runs; empty means kubenet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OverlayList", into = "OverlayList")]
pub struct Overlays(BTreeSet<Networking>);

impl Overlays {
    pub fn single(networking: Networking) -> Self {
        Self(BTreeSet::from([networking]))
    }

    pub fn contains(&self, networking: Networking) -> bool {
        self.0.contains(&networking)
    }

    pub fn iter(&self) -> impl Iterator<Item = Networking> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Networking> for Overlays {
    fn from_iter<I: IntoIterator<Item = Networking>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<OverlayList> for Overlays {
    fn from(list: OverlayList) -> Self {
        match list {
            OverlayList::One(networking) => Self::single(networking),
            OverlayList::Many(all) => all.into_iter().collect(),
        }
    }
}

impl From<Overlays> for OverlayList {
    fn from(overlays: Overlays) -> Self {
        let mut all: Vec<Networking> = overlays.0.into_iter().collect();
        if all.len() == 1 {
            Self::One(all.remove(0))
        } else {
            Self::Many(all)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterZone {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<CloudProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(
        default,
        rename = "networkCIDR",
        skip_serializing_if = "Option::is_none"
    )]
    pub network_cidr: Option<String>,
    #[serde(default, rename = "networkID", skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<ClusterZone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<Overlays>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_access: Vec<String>,
    #[serde(
        default,
        rename = "kubernetesAPIAccess",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub kubernetes_api_access: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cloud_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_base: Option<String>,
}

/// The part of a cluster that cannot change once created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub network_cidr: Option<String>,
    pub zone_cidrs: Vec<(String, Option<String>)>,
    pub networking: Overlays,
}

const OPEN_CIDR: &str = "0.0.0.0/0";

impl Document<ClusterSpec> {
    pub fn new_cluster(name: &str, spec: ClusterSpec) -> Self {
        Self::new(Kind::Cluster, name, spec)
    }

    /// Cluster name with dots replaced, for providers that reject dots
    pub fn dashed_name(&self) -> String {
        self.name().replace('.', "-")
    }

    pub fn networking(&self) -> Overlays {
        match &self.spec.networking {
            Some(overlays) if !overlays.is_empty() => overlays.clone(),
            _ => Overlays::single(Networking::Kubenet),
        }
    }

    pub fn ssh_access(&self) -> Vec<String> {
        if self.spec.ssh_access.is_empty() {
            vec![OPEN_CIDR.to_string()]
        } else {
            self.spec.ssh_access.clone()
        }
    }

    pub fn api_access(&self) -> Vec<String> {
        if self.spec.kubernetes_api_access.is_empty() {
            vec![OPEN_CIDR.to_string()]
        } else {
            self.spec.kubernetes_api_access.clone()
        }
    }

    pub fn zone_names(&self) -> Vec<String> {
        self.spec.zones.iter().map(|z| z.name.clone()).collect()
    }

    /// Region of the first zone; validation ensures all zones agree
    pub fn region(&self) -> Option<String> {
        let provider = self.spec.cloud_provider?;
        let zone = self.spec.zones.first()?;
        provider.region_of(&zone.name)
    }

    pub fn network_plan(&self) -> NetworkPlan {
        NetworkPlan {
            network_cidr: self.spec.network_cidr.clone(),
            zone_cidrs: self
                .spec
                .zones
                .iter()
                .map(|z| (z.name.clone(), z.cidr.clone()))
                .collect(),
            networking: self.networking(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_of() {
        assert_eq!(
            CloudProvider::Aws.region_of("us-east-1a").as_deref(),
            Some("us-east-1")
        );
        assert_eq!(
            CloudProvider::Gce.region_of("us-central1-b").as_deref(),
            Some("us-central1")
        );
        assert_eq!(CloudProvider::Gce.region_of("nozone"), None);
    }

    #[test]
    fn test_access_defaults_open() {
        let cluster = Cluster::new_cluster("ex.com", ClusterSpec::default());
        assert_eq!(cluster.ssh_access(), vec!["0.0.0.0/0"]);
        assert_eq!(cluster.api_access(), vec!["0.0.0.0/0"]);
        assert_eq!(cluster.networking(), Overlays::single(Networking::Kubenet));
        assert_eq!(cluster.dashed_name(), "ex-com");
    }

    #[test]
    fn test_overlays_accept_one_or_many() {
        let one: Overlays = serde_yaml::from_str("calico").unwrap();
        assert_eq!(one, Overlays::single(Networking::Calico));
        assert_eq!(serde_yaml::to_string(&one).unwrap().trim(), "calico");

        let many: Overlays = serde_yaml::from_str("[weave, calico, weave]").unwrap();
        assert_eq!(
            many.iter().collect::<Vec<_>>(),
            vec![Networking::Weave, Networking::Calico]
        );
        let text = serde_yaml::to_string(&many).unwrap();
        assert_eq!(serde_yaml::from_str::<Overlays>(&text).unwrap(), many);
    }
}
