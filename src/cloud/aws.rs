//! AWS binding: EC2, autoscaling and Route53 lookups behind [`Ec2Api`]

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use taskgraph::{
    CancelToken, Cloud, DnsProvider, Error, ProviderId, Result, SubnetInfo, VpcInfo, poll_until,
};

pub type Tags = BTreeMap<String, String>;

/// Tag holding the owning cluster, as the AWS cloud provider expects
pub const CLUSTER_TAG: &str = "KubernetesCluster";
pub const NAME_TAG: &str = "Name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vpc {
    pub id: String,
    pub cidr: String,
    pub state: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    pub vpc_id: String,
    pub zone: String,
    pub cidr: String,
    pub state: String,
    pub tags: Tags,
}

/// One permission of a security group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpPermission {
    /// `-1` for all traffic, `tcp`, `udp`, or an IP protocol number
    pub protocol: String,
    pub from_port: Option<u16>,
    pub to_port: Option<u16>,
    pub cidr: Option<String>,
    pub source_group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub vpc_id: String,
    pub tags: Tags,
    pub ingress: Vec<IpPermission>,
    pub egress: Vec<IpPermission>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfiguration {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub security_group_ids: Vec<String>,
    pub user_data: Option<String>,
    pub root_volume_size: Option<u32>,
    pub root_volume_type: Option<String>,
    pub associate_public_ip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoscalingGroup {
    pub name: String,
    pub launch_configuration_name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub subnet_ids: Vec<String>,
    pub tags: Tags,
}

/// Calls the AWS tasks need.
///
/// Lookups return `Ok(None)` for missing objects; bindings map provider
/// errors onto the engine's categories.
pub trait Ec2Api: Send + Sync {
    /// VPC carrying the given `Name` tag
    fn find_vpc(&self, name: &str) -> Result<Option<Vpc>>;
    fn get_vpc(&self, id: &str) -> Result<Option<Vpc>>;
    fn create_vpc(&self, cidr: &str, tags: &Tags) -> Result<Vpc>;
    fn delete_vpc(&self, id: &str) -> Result<()>;

    fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>>;
    fn create_subnet(&self, vpc_id: &str, zone: &str, cidr: &str, tags: &Tags) -> Result<Subnet>;
    fn delete_subnet(&self, id: &str) -> Result<()>;

    /// Replace the given tags on any EC2 object
    fn create_tags(&self, id: &str, tags: &Tags) -> Result<()>;

    fn find_security_group(&self, vpc_id: &str, name: &str) -> Result<Option<SecurityGroup>>;
    fn get_security_group(&self, id: &str) -> Result<Option<SecurityGroup>>;
    fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
        tags: &Tags,
    ) -> Result<String>;
    fn delete_security_group(&self, id: &str) -> Result<()>;
    fn authorize(&self, group_id: &str, egress: bool, permission: &IpPermission) -> Result<()>;
    fn revoke(&self, group_id: &str, egress: bool, permission: &IpPermission) -> Result<()>;

    /// Launch configurations whose name starts with `prefix`
    fn list_launch_configurations(&self, prefix: &str) -> Result<Vec<LaunchConfiguration>>;
    fn create_launch_configuration(&self, config: &LaunchConfiguration) -> Result<()>;
    fn delete_launch_configuration(&self, name: &str) -> Result<()>;

    fn find_autoscaling_group(&self, name: &str) -> Result<Option<AutoscalingGroup>>;
    fn create_autoscaling_group(&self, group: &AutoscalingGroup) -> Result<()>;
    fn update_autoscaling_group(&self, group: &AutoscalingGroup) -> Result<()>;
    fn delete_autoscaling_group(&self, name: &str) -> Result<()>;

    /// Route53 hosted zone serving `domain`
    fn find_hosted_zone(&self, domain: &str) -> Result<Option<String>>;
}

/// AWS facade for one region
pub struct AwsCloud {
    region: String,
    labels: BTreeMap<String, String>,
    api: Option<Arc<dyn Ec2Api>>,
    poll_interval: Duration,
    timeout: Duration,
}

impl AwsCloud {
    pub fn new(region: &str, labels: BTreeMap<String, String>, api: Arc<dyn Ec2Api>) -> Self {
        Self {
            api: Some(api),
            ..Self::offline(region, labels)
        }
    }

    /// Facade without an API binding; every call fails as permanent
    pub fn offline(region: &str, labels: BTreeMap<String, String>) -> Self {
        Self {
            region: region.to_string(),
            labels,
            api: None,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.timeout = timeout;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn is_online(&self) -> bool {
        self.api.is_some()
    }

    pub fn api(&self) -> Result<&dyn Ec2Api> {
        self.api.as_deref().ok_or_else(|| {
            Error::permanent(format!(
                "no EC2 API binding is configured for {}",
                self.region
            ))
        })
    }

    /// Block until the VPC reports `available`
    pub fn wait_for_vpc(&self, id: &str, cancel: &CancelToken) -> Result<Vpc> {
        let api = self.api()?;
        poll_until(self.poll_interval, self.timeout, cancel, || {
            Ok(api.get_vpc(id)?.filter(|vpc| vpc.state == "available"))
        })
    }

    /// Block until the subnet reports `available`
    pub fn wait_for_subnet(&self, vpc_id: &str, id: &str, cancel: &CancelToken) -> Result<Subnet> {
        let api = self.api()?;
        poll_until(self.poll_interval, self.timeout, cancel, || {
            Ok(api
                .list_subnets(vpc_id)?
                .into_iter()
                .find(|s| s.id == id && s.state == "available"))
        })
    }
}

struct Route53 {
    api: Arc<dyn Ec2Api>,
}

impl DnsProvider for Route53 {
    fn find_zone(&self, domain: &str) -> Result<Option<String>> {
        self.api.find_hosted_zone(domain)
    }
}

impl Cloud for AwsCloud {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Aws
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.labels.clone()
    }

    fn dns(&self) -> Result<Arc<dyn DnsProvider>> {
        let api = self
            .api
            .clone()
            .ok_or_else(|| Error::permanent("no Route53 binding is configured"))?;
        Ok(Arc::new(Route53 { api }))
    }

    fn find_vpc_info(&self, id: &str) -> Result<Option<VpcInfo>> {
        let api = self.api()?;
        let Some(vpc) = api.get_vpc(id)? else {
            return Ok(None);
        };
        let subnets = api
            .list_subnets(&vpc.id)?
            .into_iter()
            .map(|s| SubnetInfo {
                id: s.id,
                zone: s.zone,
                cidr: s.cidr,
            })
            .collect();
        Ok(Some(VpcInfo {
            id: vpc.id,
            cidr: Some(vpc.cidr),
            subnets,
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
