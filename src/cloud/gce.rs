//! GCE binding: Compute Engine behind [`ComputeApi`], with operation waits

use super::compute::{InstanceGroupManager, InstanceTemplate, Network, Operation, Subnetwork};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use taskgraph::{CancelToken, Cloud, DnsProvider, Error, ProviderId, Result, VpcInfo, poll_until};

pub const COMPUTE_BASE: &str = "https://www.googleapis.com/compute/v1";
const SCOPE_PREFIX: &str = "https://www.googleapis.com/auth/";

/// Where a long-running operation lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpScope {
    Zone(String),
    Region(String),
    Global,
}

impl fmt::Display for OpScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zone(zone) => write!(f, "zones/{zone}"),
            Self::Region(region) => write!(f, "regions/{region}"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// Compute Engine calls the GCE tasks need.
///
/// Getters return `Ok(None)` on 404; mutations return the operation to wait on.
pub trait ComputeApi: Send + Sync {
    fn get_network(&self, project: &str, name: &str) -> Result<Option<Network>>;
    fn insert_network(&self, project: &str, network: &Network) -> Result<Operation>;
    fn delete_network(&self, project: &str, name: &str) -> Result<Operation>;

    fn get_subnetwork(&self, project: &str, region: &str, name: &str)
    -> Result<Option<Subnetwork>>;
    fn insert_subnetwork(
        &self,
        project: &str,
        region: &str,
        subnetwork: &Subnetwork,
    ) -> Result<Operation>;
    fn delete_subnetwork(&self, project: &str, region: &str, name: &str) -> Result<Operation>;

    fn get_instance_template(&self, project: &str, name: &str) -> Result<Option<InstanceTemplate>>;
    fn insert_instance_template(
        &self,
        project: &str,
        template: &InstanceTemplate,
    ) -> Result<Operation>;
    fn delete_instance_template(&self, project: &str, name: &str) -> Result<Operation>;

    fn get_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Option<InstanceGroupManager>>;
    fn insert_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        manager: &InstanceGroupManager,
    ) -> Result<Operation>;
    fn set_instance_template(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        template_url: &str,
    ) -> Result<Operation>;
    fn resize(&self, project: &str, zone: &str, name: &str, size: u32) -> Result<Operation>;
    fn delete_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Operation>;

    fn get_operation(&self, project: &str, scope: &OpScope, name: &str) -> Result<Operation>;

    /// Cloud DNS managed zone serving `dns_name`
    fn find_managed_zone(&self, project: &str, dns_name: &str) -> Result<Option<String>>;
}

pub fn network_url(project: &str, name: &str) -> String {
    format!("{COMPUTE_BASE}/projects/{project}/global/networks/{name}")
}

pub fn subnetwork_url(project: &str, region: &str, name: &str) -> String {
    format!("{COMPUTE_BASE}/projects/{project}/regions/{region}/subnetworks/{name}")
}

pub fn instance_template_url(project: &str, name: &str) -> String {
    format!("{COMPUTE_BASE}/projects/{project}/global/instanceTemplates/{name}")
}

/// `project/name` → full image URL; full URLs pass through
pub fn image_url(image: &str) -> String {
    match image.split_once('/') {
        Some((project, name)) if !image.contains("://") => {
            format!("{COMPUTE_BASE}/projects/{project}/global/images/{name}")
        }
        _ => image.to_string(),
    }
}

/// Full image URL → `project/name`; anything else passes through
pub fn shorten_image_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix(COMPUTE_BASE).and_then(|r| r.strip_prefix("/projects/")) else {
        return url.to_string();
    };
    match rest.split_once("/global/images/") {
        Some((project, name)) => format!("{project}/{name}"),
        None => url.to_string(),
    }
}

pub fn scope_to_long_form(scope: &str) -> String {
    if scope.starts_with("https://") {
        scope.to_string()
    } else {
        format!("{SCOPE_PREFIX}{scope}")
    }
}

pub fn scope_to_short_form(scope: &str) -> String {
    scope.strip_prefix(SCOPE_PREFIX).unwrap_or(scope).to_string()
}

/// GCE facade for one project and region
pub struct GceCloud {
    project: String,
    region: String,
    labels: BTreeMap<String, String>,
    api: Option<Arc<dyn ComputeApi>>,
    poll_interval: Duration,
    timeout: Duration,
}

impl GceCloud {
    pub fn new(
        project: &str,
        region: &str,
        labels: BTreeMap<String, String>,
        api: Arc<dyn ComputeApi>,
    ) -> Self {
        Self {
            api: Some(api),
            ..Self::offline(project, region, labels)
        }
    }

    /// Facade without an API binding; every call fails as permanent
    pub fn offline(project: &str, region: &str, labels: BTreeMap<String, String>) -> Self {
        Self {
            project: project.to_string(),
            region: region.to_string(),
            labels,
            api: None,
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.timeout = timeout;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn is_online(&self) -> bool {
        self.api.is_some()
    }

    pub fn api(&self) -> Result<&dyn ComputeApi> {
        self.api.as_deref().ok_or_else(|| {
            Error::permanent(format!(
                "no Compute API binding is configured for project {}",
                self.project
            ))
        })
    }

    fn wait_for_op(&self, op: &Operation, scope: &OpScope, cancel: &CancelToken) -> Result<()> {
        let api = self.api()?;
        let finished = if op.is_done() {
            op.clone()
        } else {
            log::debug!("waiting for operation {} in {scope}", op.name);
            poll_until(self.poll_interval, self.timeout, cancel, || {
                let current = api.get_operation(&self.project, scope, &op.name)?;
                Ok(current.is_done().then_some(current))
            })?
        };
        match finished.error_message() {
            Some(message) => Err(Error::permanent(format!(
                "operation {} failed: {message}",
                finished.name
            ))),
            None => Ok(()),
        }
    }

    pub fn wait_for_zone_op(&self, op: &Operation, zone: &str, cancel: &CancelToken) -> Result<()> {
        self.wait_for_op(op, &OpScope::Zone(zone.to_string()), cancel)
    }

    pub fn wait_for_region_op(&self, op: &Operation, cancel: &CancelToken) -> Result<()> {
        self.wait_for_op(op, &OpScope::Region(self.region.clone()), cancel)
    }

    pub fn wait_for_global_op(&self, op: &Operation, cancel: &CancelToken) -> Result<()> {
        self.wait_for_op(op, &OpScope::Global, cancel)
    }
}

struct CloudDns {
    api: Arc<dyn ComputeApi>,
    project: String,
}

impl DnsProvider for CloudDns {
    fn find_zone(&self, domain: &str) -> Result<Option<String>> {
        self.api.find_managed_zone(&self.project, domain)
    }
}

impl Cloud for GceCloud {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Gce
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.labels.clone()
    }

    fn dns(&self) -> Result<Arc<dyn DnsProvider>> {
        let api = self
            .api
            .clone()
            .ok_or_else(|| Error::permanent("error building DNS provider: no Compute API binding"))?;
        Ok(Arc::new(CloudDns {
            api,
            project: self.project.clone(),
        }))
    }

    fn find_vpc_info(&self, _id: &str) -> Result<Option<VpcInfo>> {
        log::warn!("find_vpc_info is not implemented on GCE");
        Ok(None)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
