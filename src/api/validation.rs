//! Static validation of documents before they are stored

use super::cluster::{CloudProvider, Cluster};
use super::instance_group::{InstanceGroup, Role};
use regex::Regex;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static DNS_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").ok()
});

/// A document that cannot be accepted as written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type Result<T> = std::result::Result<T, ValidationError>;

macro_rules! invalid {
    ($($arg:tt)*) => {
        return Err(ValidationError::new(format!($($arg)*)))
    };
}

/// An IPv4 network in `a.b.c.d/n` form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl Cidr {
    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    pub fn network(&self) -> u32 {
        u32::from(self.addr) & self.mask()
    }

    /// Whether `other` lies entirely inside this network
    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix && (u32::from(other.addr) & self.mask()) == self.network()
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl FromStr for Cidr {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self> {
        let Some((addr, prefix)) = s.split_once('/') else {
            invalid!("invalid CIDR {s:?}: expected a.b.c.d/n");
        };
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| ValidationError::new(format!("invalid CIDR {s:?}: bad address")))?;
        let prefix: u8 = prefix
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| ValidationError::new(format!("invalid CIDR {s:?}: bad prefix")))?;
        Ok(Self { addr, prefix })
    }
}

pub fn validate_dns_name(name: &str) -> Result<()> {
    let matches = DNS_NAME.as_ref().is_some_and(|re| re.is_match(name));
    if name.len() > 253 || !matches {
        invalid!("{name:?} is not a valid DNS name");
    }
    Ok(())
}

pub fn validate_cluster(cluster: &Cluster) -> Result<()> {
    let name = cluster.name();
    if name.is_empty() {
        invalid!("cluster name required");
    }
    validate_dns_name(name)?;
    if !name.contains('.') {
        invalid!("cluster name {name:?} must be a fully-qualified DNS name (e.g. mycluster.example.com)");
    }

    let spec = &cluster.spec;
    let Some(provider) = spec.cloud_provider else {
        invalid!("cloudProvider required for cluster {name}");
    };
    if provider == CloudProvider::Gce && spec.project.as_deref().is_none_or(str::is_empty) {
        invalid!("project required for GCE cluster {name}");
    }
    if spec.zones.is_empty() {
        invalid!("cluster {name} must have at least one zone");
    }

    let mut seen = BTreeSet::new();
    let mut regions = BTreeSet::new();
    for zone in &spec.zones {
        if !seen.insert(zone.name.as_str()) {
            invalid!("zone {} listed more than once", zone.name);
        }
        let Some(region) = provider.region_of(&zone.name) else {
            invalid!("cannot determine region of zone {:?}", zone.name);
        };
        regions.insert(region);
    }
    if regions.len() > 1 {
        invalid!(
            "all zones must be in one region, found {}",
            regions.into_iter().collect::<Vec<_>>().join(", ")
        );
    }

    let network = spec.network_cidr.as_deref().map(Cidr::from_str).transpose()?;
    if provider == CloudProvider::Aws && network.is_none() && spec.network_id.is_none() {
        invalid!("networkCIDR required for AWS cluster {name}");
    }
    let mut zone_cidrs: Vec<(&str, Cidr)> = Vec::new();
    for zone in &spec.zones {
        let Some(text) = zone.cidr.as_deref() else {
            if provider == CloudProvider::Aws {
                invalid!("zone {} requires a cidr", zone.name);
            }
            continue;
        };
        let cidr: Cidr = text.parse()?;
        if let Some(network) = network {
            if !network.contains(&cidr) {
                invalid!(
                    "zone {} cidr {text} is not inside networkCIDR {}",
                    zone.name,
                    spec.network_cidr.as_deref().unwrap_or_default()
                );
            }
        }
        if let Some((other, _)) = zone_cidrs.iter().find(|(_, c)| c.overlaps(&cidr)) {
            invalid!("zone {} cidr overlaps zone {other}", zone.name);
        }
        zone_cidrs.push((zone.name.as_str(), cidr));
    }

    for cidr in spec.ssh_access.iter().chain(&spec.kubernetes_api_access) {
        cidr.parse::<Cidr>()?;
    }
    Ok(())
}

pub fn validate_instance_group(group: &InstanceGroup, cluster: &Cluster) -> Result<()> {
    let name = group.name();
    if name.is_empty() {
        invalid!("instance group name required");
    }
    validate_dns_name(name)?;
    if group.spec.role.is_none() {
        invalid!("instance group {name} must have a role (Master, Node or Bastion)");
    }
    if group.min_size() > group.max_size() {
        invalid!(
            "instance group {name}: minSize {} is greater than maxSize {}",
            group.min_size(),
            group.max_size()
        );
    }
    let cluster_zones = cluster.zone_names();
    for zone in &group.spec.zones {
        if !cluster_zones.contains(zone) {
            invalid!("instance group {name}: zone {zone} is not a zone of cluster {}", cluster.name());
        }
    }
    if group.role() == Role::Master && group.zones_in(cluster).is_empty() {
        invalid!("master instance group {name} must specify at least one zone");
    }
    Ok(())
}
