//! Provider-independent cloud facade

use crate::error::Result;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Supported cloud providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Aws,
    Gce,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gce => "gce",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An existing network as seen by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcInfo {
    pub id: String,
    pub cidr: Option<String>,
    pub subnets: Vec<SubnetInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetInfo {
    pub id: String,
    pub zone: String,
    pub cidr: String,
}

/// Zone lookup handle. Record management belongs to the DNS agent.
pub trait DnsProvider: Send + Sync {
    /// Find the hosted zone serving `domain`, returning its identifier
    fn find_zone(&self, domain: &str) -> Result<Option<String>>;
}

/// Capabilities every provider binding offers
///
/// Provider-specific helpers (operation waits, stabilization polling) live
/// on the concrete type; tasks reach them through [`Cloud::as_any`].
pub trait Cloud: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Labels applied to every object; callers get their own copy
    fn labels(&self) -> BTreeMap<String, String>;

    fn dns(&self) -> Result<Arc<dyn DnsProvider>>;

    /// Look up an existing network, `None` if the provider cannot say
    fn find_vpc_info(&self, id: &str) -> Result<Option<VpcInfo>>;

    fn as_any(&self) -> &dyn Any;
}
