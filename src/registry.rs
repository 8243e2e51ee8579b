//! Cluster documents in the configuration store
//!
//! Layout under the store root:
//!
//! ```text
//! <cluster>/config
//! <cluster>/instancegroup/<name>
//! _federation/<name>
//! ```

use crate::api::validation::{validate_cluster, validate_dns_name, validate_instance_group};
use crate::api::{Cluster, Federation, InstanceGroup, Kind, ValidationError};
use crate::vfs::Store;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

const FEDERATION_DIR: &str = "_federation";

fn cluster_path(name: &str) -> String {
    format!("{name}/config")
}

fn instance_group_path(cluster: &str, name: &str) -> String {
    format!("{cluster}/instancegroup/{name}")
}

fn federation_path(name: &str) -> String {
    format!("{FEDERATION_DIR}/{name}")
}

pub struct Registry {
    store: Box<dyn Store>,
}

impl Registry {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    fn read_doc<S>(&self, path: &str, kind: Kind) -> Result<Option<crate::api::Document<S>>>
    where
        S: Serialize + DeserializeOwned,
    {
        let Some(data) = self.store.read(path)? else {
            return Ok(None);
        };
        let text = String::from_utf8(data).with_context(|| format!("{path} is not UTF-8"))?;
        let doc = crate::api::Document::from_yaml(&text, kind)
            .with_context(|| format!("Invalid {kind} at {}/{path}", self.store.uri()))?;
        Ok(Some(doc))
    }

    fn write_doc<S>(&self, path: &str, doc: &crate::api::Document<S>) -> Result<()>
    where
        S: Serialize + DeserializeOwned,
    {
        self.store.write(path, doc.to_yaml()?.as_bytes())
    }

    // ========================================================================
    // Clusters
    // ========================================================================

    pub fn read_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        validate_dns_name(name)?;
        self.read_doc(&cluster_path(name), Kind::Cluster)
    }

    pub fn get_cluster(&self, name: &str) -> Result<Cluster> {
        self.read_cluster(name)?
            .with_context(|| format!("cluster {name:?} not found in {}", self.store.uri()))
    }

    pub fn list_clusters(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .list("")?
            .into_iter()
            .filter_map(|path| {
                let (cluster, rest) = path.split_once('/')?;
                (rest == "config" && cluster != FEDERATION_DIR).then(|| cluster.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Store a new cluster; rejects unknown fields and existing names
    pub fn create_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        cluster.reject_unknown_fields()?;
        validate_cluster(cluster)?;
        let name = cluster.name();
        if self.read_cluster(name)?.is_some() {
            bail!("cluster {name:?} already exists");
        }

        let mut stored = cluster.clone();
        stored.metadata.creation_timestamp = Some(Utc::now());
        stored.spec.config_base = Some(format!("{}/{name}", self.store.uri()));
        self.write_doc(&cluster_path(name), &stored)?;
        log::info!("created cluster {name}");
        Ok(stored)
    }

    /// Replace a stored cluster; the network plan may not change
    pub fn update_cluster(&self, cluster: &Cluster) -> Result<()> {
        validate_cluster(cluster)?;
        let name = cluster.name();
        let existing = self.get_cluster(name)?;
        if existing.network_plan() != cluster.network_plan() {
            return Err(ValidationError::new(format!(
                "the network plan of cluster {name} cannot be changed after creation"
            ))
            .into());
        }
        self.write_doc(&cluster_path(name), cluster)
    }

    /// Remove the cluster document and all its instance groups
    pub fn delete_cluster(&self, name: &str) -> Result<usize> {
        validate_dns_name(name)?;
        let removed = self.store.remove_all(name)?;
        log::info!("removed {removed} document(s) of cluster {name}");
        Ok(removed)
    }

    // ========================================================================
    // Instance groups
    // ========================================================================

    pub fn read_instance_group(&self, cluster: &str, name: &str) -> Result<Option<InstanceGroup>> {
        validate_dns_name(name)?;
        self.read_doc(&instance_group_path(cluster, name), Kind::InstanceGroup)
    }

    pub fn list_instance_groups(&self, cluster: &str) -> Result<Vec<InstanceGroup>> {
        let mut groups = Vec::new();
        for path in self.store.list(&format!("{cluster}/instancegroup"))? {
            if let Some(group) = self.read_doc(&path, Kind::InstanceGroup)? {
                groups.push(group);
            }
        }
        groups.sort_by(|a: &InstanceGroup, b: &InstanceGroup| a.name().cmp(b.name()));
        Ok(groups)
    }

    pub fn create_instance_group(&self, cluster: &Cluster, group: &InstanceGroup) -> Result<()> {
        group.reject_unknown_fields()?;
        validate_instance_group(group, cluster)?;
        let name = group.name();
        if self.read_instance_group(cluster.name(), name)?.is_some() {
            bail!("instance group {name:?} already exists");
        }
        let mut stored = group.clone();
        stored.metadata.creation_timestamp = Some(Utc::now());
        self.write_doc(&instance_group_path(cluster.name(), name), &stored)?;
        log::info!("created instance group {name} in {}", cluster.name());
        Ok(())
    }

    pub fn update_instance_group(&self, cluster: &Cluster, group: &InstanceGroup) -> Result<()> {
        validate_instance_group(group, cluster)?;
        let name = group.name();
        if self.read_instance_group(cluster.name(), name)?.is_none() {
            bail!("instance group {name:?} not found in cluster {}", cluster.name());
        }
        self.write_doc(&instance_group_path(cluster.name(), name), group)
    }

    pub fn delete_instance_group(&self, cluster: &str, name: &str) -> Result<()> {
        validate_dns_name(name)?;
        self.store.remove(&instance_group_path(cluster, name))
    }

    // ========================================================================
    // Federations
    // ========================================================================

    pub fn read_federation(&self, name: &str) -> Result<Option<Federation>> {
        validate_dns_name(name)?;
        self.read_doc(&federation_path(name), Kind::Federation)
    }

    pub fn list_federations(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list(FEDERATION_DIR)?
            .into_iter()
            .filter_map(|p| p.rsplit_once('/').map(|(_, name)| name.to_string()))
            .collect())
    }

    pub fn create_federation(&self, federation: &Federation) -> Result<()> {
        federation.reject_unknown_fields()?;
        let name = federation.name();
        if name.is_empty() {
            return Err(ValidationError::new("federation name required").into());
        }
        validate_dns_name(name)?;
        if self.read_federation(name)?.is_some() {
            bail!("federation {name:?} already exists");
        }
        for member in federation
            .spec
            .controllers
            .iter()
            .chain(&federation.spec.members)
        {
            if self.read_cluster(member)?.is_none() {
                bail!("federation {name}: cluster {member:?} not found");
            }
        }
        let mut stored = federation.clone();
        stored.metadata.creation_timestamp = Some(Utc::now());
        self.write_doc(&federation_path(name), &stored)
    }

    pub fn delete_federation(&self, name: &str) -> Result<()> {
        validate_dns_name(name)?;
        self.store.remove(&federation_path(name))
    }
}
