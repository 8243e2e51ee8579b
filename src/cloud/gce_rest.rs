//! Compute Engine REST binding over blocking HTTP

use super::compute::{InstanceGroupManager, InstanceTemplate, Network, Operation, Subnetwork};
use super::gce::{COMPUTE_BASE, ComputeApi, OpScope};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use taskgraph::{Error, Result};

/// Environment variable holding an OAuth2 bearer token
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const DNS_BASE: &str = "https://dns.googleapis.com/dns/v1";

/// Map an HTTP failure onto the engine's error categories
pub fn classify(err: ureq::Error, what: &str) -> Error {
    match err {
        ureq::Error::StatusCode(404) => Error::NotFound(what.to_string()),
        ureq::Error::StatusCode(code) if code == 429 || code >= 500 => {
            Error::transient(format!("{what}: HTTP {code}"))
        }
        ureq::Error::StatusCode(code) => Error::permanent(format!("{what}: HTTP {code}")),
        ureq::Error::Io(e) => Error::transient(format!("{what}: {e}")),
        ureq::Error::Timeout(_) | ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
            Error::transient(format!("{what}: {err}"))
        }
        other => Error::permanent(format!("{what}: {other}")),
    }
}

pub struct RestCompute {
    agent: ureq::Agent,
    api_base: String,
    dns_base: String,
    token: String,
}

impl RestCompute {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            api_base: COMPUTE_BASE.to_string(),
            dns_base: DNS_BASE.to_string(),
            token: token.into(),
        }
    }

    /// Binding from [`TOKEN_ENV`], `None` when it is unset
    pub fn from_env() -> Option<Self> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
    }

    /// Binding against a custom endpoint (for testing)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn url(&self, project: &str, path: &str) -> String {
        format!("{}/projects/{project}/{path}", self.api_base)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn get<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        log::trace!("GET {url}");
        match self
            .agent
            .get(url)
            .header("Authorization", &self.bearer())
            .call()
        {
            Ok(mut response) => {
                let value = response
                    .body_mut()
                    .read_json()
                    .map_err(|e| classify(e, url))?;
                Ok(Some(value))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(classify(e, url)),
        }
    }

    fn post<B: Serialize>(&self, url: &str, body: &B) -> Result<Operation> {
        log::trace!("POST {url}");
        self.agent
            .post(url)
            .header("Authorization", &self.bearer())
            .send_json(body)
            .map_err(|e| classify(e, url))?
            .body_mut()
            .read_json()
            .map_err(|e| classify(e, url))
    }

    fn delete(&self, url: &str) -> Result<Operation> {
        log::trace!("DELETE {url}");
        self.agent
            .delete(url)
            .header("Authorization", &self.bearer())
            .call()
            .map_err(|e| classify(e, url))?
            .body_mut()
            .read_json()
            .map_err(|e| classify(e, url))
    }
}

impl ComputeApi for RestCompute {
    fn get_network(&self, project: &str, name: &str) -> Result<Option<Network>> {
        self.get(&self.url(project, &format!("global/networks/{name}")))
    }

    fn insert_network(&self, project: &str, network: &Network) -> Result<Operation> {
        self.post(&self.url(project, "global/networks"), network)
    }

    fn delete_network(&self, project: &str, name: &str) -> Result<Operation> {
        self.delete(&self.url(project, &format!("global/networks/{name}")))
    }

    fn get_subnetwork(
        &self,
        project: &str,
        region: &str,
        name: &str,
    ) -> Result<Option<Subnetwork>> {
        self.get(&self.url(project, &format!("regions/{region}/subnetworks/{name}")))
    }

    fn insert_subnetwork(
        &self,
        project: &str,
        region: &str,
        subnetwork: &Subnetwork,
    ) -> Result<Operation> {
        self.post(
            &self.url(project, &format!("regions/{region}/subnetworks")),
            subnetwork,
        )
    }

    fn delete_subnetwork(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.delete(&self.url(project, &format!("regions/{region}/subnetworks/{name}")))
    }

    fn get_instance_template(&self, project: &str, name: &str) -> Result<Option<InstanceTemplate>> {
        self.get(&self.url(project, &format!("global/instanceTemplates/{name}")))
    }

    fn insert_instance_template(
        &self,
        project: &str,
        template: &InstanceTemplate,
    ) -> Result<Operation> {
        self.post(&self.url(project, "global/instanceTemplates"), template)
    }

    fn delete_instance_template(&self, project: &str, name: &str) -> Result<Operation> {
        self.delete(&self.url(project, &format!("global/instanceTemplates/{name}")))
    }

    fn get_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Option<InstanceGroupManager>> {
        self.get(&self.url(project, &format!("zones/{zone}/instanceGroupManagers/{name}")))
    }

    fn insert_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        manager: &InstanceGroupManager,
    ) -> Result<Operation> {
        self.post(
            &self.url(project, &format!("zones/{zone}/instanceGroupManagers")),
            manager,
        )
    }

    fn set_instance_template(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        template_url: &str,
    ) -> Result<Operation> {
        self.post(
            &self.url(
                project,
                &format!("zones/{zone}/instanceGroupManagers/{name}/setInstanceTemplate"),
            ),
            &json!({ "instanceTemplate": template_url }),
        )
    }

    fn resize(&self, project: &str, zone: &str, name: &str, size: u32) -> Result<Operation> {
        self.post(
            &self.url(
                project,
                &format!("zones/{zone}/instanceGroupManagers/{name}/resize?size={size}"),
            ),
            &json!({}),
        )
    }

    fn delete_instance_group_manager(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Operation> {
        self.delete(&self.url(project, &format!("zones/{zone}/instanceGroupManagers/{name}")))
    }

    fn get_operation(&self, project: &str, scope: &OpScope, name: &str) -> Result<Operation> {
        let url = self.url(project, &format!("{scope}/operations/{name}"));
        self.get(&url)?
            .ok_or_else(|| Error::NotFound(format!("operation {name}")))
    }

    fn find_managed_zone(&self, project: &str, dns_name: &str) -> Result<Option<String>> {
        let fqdn = if dns_name.ends_with('.') {
            dns_name.to_string()
        } else {
            format!("{dns_name}.")
        };
        let url = format!(
            "{}/projects/{project}/managedZones?dnsName={fqdn}",
            self.dns_base
        );
        let Some(list) = self.get::<Value>(&url)? else {
            return Ok(None);
        };
        Ok(list["managedZones"]
            .as_array()
            .and_then(|zones| zones.first())
            .and_then(|zone| zone["name"].as_str())
            .map(ToString::to_string))
    }
}
