use crate::cloud::compute::{
    self, AccessConfig, AttachedDisk, DiskParams, InstanceProperties, Metadata, MetadataItem,
    NetworkInterface, Scheduling, ServiceAccount, last_component,
};
use crate::cloud::gce::{
    GceCloud, image_url, instance_template_url, scope_to_long_form, scope_to_short_form,
    shorten_image_url,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use taskgraph::{
    Blob, Changes, DirectTarget, Error, ExecContext, Literal, Resource, Result, TaskKey,
    TerraformTarget,
};

const BOOT_DEVICE: &str = "persistent-disks-0";

/// Instance template for one instance group.
///
/// Templates cannot be edited; every field is immutable once created.
/// Scopes are held in short form and images as `project/name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceTemplate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<TaskKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<TaskKey>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preemptible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_disk_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_disk_size_gb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_disk_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_ip_forward: Option<bool>,
    pub scopes: Vec<String>,
    pub metadata: BTreeMap<String, Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(skip)]
    pub self_link: Option<String>,
}

impl InstanceTemplate {
    fn scheduling(&self) -> Scheduling {
        let preemptible = self.preemptible.unwrap_or(false);
        Scheduling {
            automatic_restart: !preemptible,
            // Preemptible instances cannot migrate
            on_host_maintenance: Some(if preemptible { "TERMINATE" } else { "MIGRATE" }.to_string()),
            preemptible,
        }
    }

    fn to_wire(&self, ctx: &ExecContext) -> Result<compute::InstanceTemplate> {
        let image = self
            .boot_disk_image
            .as_deref()
            .ok_or(Error::RequiredField("boot_disk_image"))?;
        let machine_type = self
            .machine_type
            .clone()
            .ok_or(Error::RequiredField("machine_type"))?;
        let network = self.network.as_ref().map(|k| ctx.require_id(k)).transpose()?;
        let subnetwork = self.subnet.as_ref().map(|k| ctx.require_id(k)).transpose()?;

        let mut items = Vec::with_capacity(self.metadata.len());
        for (key, value) in &self.metadata {
            items.push(MetadataItem {
                key: key.clone(),
                value: value.as_str()?.to_string(),
            });
        }

        Ok(compute::InstanceTemplate {
            name: self.name.clone(),
            self_link: None,
            properties: InstanceProperties {
                machine_type,
                can_ip_forward: self.can_ip_forward.unwrap_or(false),
                tags: Some(compute::Tags {
                    items: self.tags.clone(),
                }),
                disks: vec![AttachedDisk {
                    boot: true,
                    auto_delete: true,
                    device_name: Some(BOOT_DEVICE.to_string()),
                    mode: Some("READ_WRITE".to_string()),
                    disk_type: Some("PERSISTENT".to_string()),
                    initialize_params: Some(DiskParams {
                        source_image: Some(image_url(image)),
                        disk_size_gb: self.boot_disk_size_gb.map(|gb| gb.to_string()),
                        disk_type: self.boot_disk_type.clone(),
                    }),
                }],
                network_interfaces: vec![NetworkInterface {
                    network,
                    subnetwork,
                    access_configs: vec![AccessConfig {
                        kind: "ONE_TO_ONE_NAT".to_string(),
                        name: None,
                    }],
                }],
                service_accounts: vec![ServiceAccount {
                    email: "default".to_string(),
                    scopes: self.scopes.iter().map(|s| scope_to_long_form(s)).collect(),
                }],
                scheduling: Some(self.scheduling()),
                metadata: Some(Metadata { items }),
            },
        })
    }

    fn from_wire(&self, ctx: &ExecContext, wire: compute::InstanceTemplate) -> Self {
        let props = wire.properties;
        let boot = props.disks.iter().find(|d| d.boot);
        let params = boot.and_then(|d| d.initialize_params.as_ref());
        let interface = props.network_interfaces.first();

        let mut tags = props.tags.map(|t| t.items).unwrap_or_default();
        tags.sort();
        let mut scopes: Vec<String> = props
            .service_accounts
            .iter()
            .flat_map(|sa| sa.scopes.iter().map(|s| scope_to_short_form(s)))
            .collect();
        scopes.sort();

        Self {
            name: wire.name,
            network: interface
                .and_then(|i| i.network.as_deref())
                .and_then(|url| ctx.reference_for(self.network.as_ref(), "Network", Some(url))),
            subnet: interface
                .and_then(|i| i.subnetwork.as_deref())
                .and_then(|url| ctx.reference_for(self.subnet.as_ref(), "Subnet", Some(url))),
            tags,
            preemptible: Some(props.scheduling.as_ref().is_some_and(|s| s.preemptible)),
            boot_disk_image: params
                .and_then(|p| p.source_image.as_deref())
                .map(shorten_image_url),
            boot_disk_size_gb: params
                .and_then(|p| p.disk_size_gb.as_deref())
                .and_then(|gb| gb.parse().ok()),
            boot_disk_type: params.and_then(|p| p.disk_type.clone()),
            can_ip_forward: Some(props.can_ip_forward),
            scopes,
            metadata: props
                .metadata
                .map(|m| m.items)
                .unwrap_or_default()
                .into_iter()
                .map(|item| (item.key, Blob::text(item.value)))
                .collect(),
            machine_type: Some(last_component(&props.machine_type).to_string()),
            self_link: wire.self_link,
        }
    }
}

impl Resource for InstanceTemplate {
    const KIND: &'static str = "InstanceTemplate";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        self.network.iter().chain(&self.subnet).cloned().collect()
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let cloud = ctx.cloud_as::<GceCloud>()?;
        Ok(cloud
            .api()?
            .get_instance_template(cloud.project(), &self.name)?
            .map(|wire| self.from_wire(ctx, wire)))
    }

    fn check_changes(actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if actual.is_none() {
            if expected.boot_disk_image.is_none() {
                return Err(Error::RequiredField("boot_disk_image"));
            }
            if expected.machine_type.is_none() {
                return Err(Error::RequiredField("machine_type"));
            }
        }
        Ok(())
    }

    fn cloud_id(actual: &Self) -> Option<String> {
        actual.self_link.clone()
    }

    fn render_direct(
        &self,
        target: &DirectTarget,
        ctx: &ExecContext,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<Option<String>> {
        let cloud = target.cloud_as::<GceCloud>()?;
        let link = instance_template_url(cloud.project(), &self.name);
        if actual.is_some() {
            return Ok(Some(link));
        }
        let wire = self.to_wire(ctx)?;
        let op = cloud.api()?.insert_instance_template(cloud.project(), &wire)?;
        cloud.wait_for_global_op(&op, ctx.cancel_token())?;
        log::info!("created instance template {}", self.name);
        Ok(Some(link))
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let image = self
            .boot_disk_image
            .as_deref()
            .ok_or(Error::RequiredField("boot_disk_image"))?;
        let mut metadata = Map::new();
        for (key, value) in &self.metadata {
            metadata.insert(key.clone(), Literal::text(value.as_str()?).into());
        }
        let mut interface = json!({ "access_config": [{}] });
        if let Value::Object(fields) = &mut interface {
            if let Some(network) = &self.network {
                fields.insert(
                    "network".into(),
                    Literal::reference("google_compute_network", &network.name, "name").into(),
                );
            }
            if let Some(subnet) = &self.subnet {
                fields.insert(
                    "subnetwork".into(),
                    Literal::reference("google_compute_subnetwork", &subnet.name, "name").into(),
                );
            }
        }
        let scheduling = self.scheduling();
        let scopes: Vec<String> = self.scopes.iter().map(|s| scope_to_long_form(s)).collect();

        target.render_resource(
            "google_compute_instance_template",
            &self.name,
            json!({
                "name_prefix": format!("{}-", self.name),
                "machine_type": self.machine_type,
                "can_ip_forward": self.can_ip_forward.unwrap_or(false),
                "tags": self.tags,
                "disk": [{
                    "auto_delete": true,
                    "boot": true,
                    "device_name": BOOT_DEVICE,
                    "mode": "READ_WRITE",
                    "type": "PERSISTENT",
                    "source_image": image,
                    "disk_type": self.boot_disk_type,
                    "disk_size_gb": self.boot_disk_size_gb,
                }],
                "network_interface": [interface],
                "service_account": [{ "scopes": scopes }],
                "scheduling": [{
                    "automatic_restart": scheduling.automatic_restart,
                    "on_host_maintenance": scheduling.on_host_maintenance,
                    "preemptible": scheduling.preemptible,
                }],
                "metadata": metadata,
                "lifecycle": { "create_before_destroy": true },
            }),
        )
    }

    fn delete_direct(&self, target: &DirectTarget, ctx: &ExecContext, _actual: &Self) -> Result<()> {
        let cloud = target.cloud_as::<GceCloud>()?;
        let op = cloud
            .api()?
            .delete_instance_template(cloud.project(), &self.name)?;
        cloud.wait_for_global_op(&op, ctx.cancel_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::gce::network_url;
    use crate::tasks::gce::testing::{Harness, PROJECT};
    use taskgraph::Task;
    use tempfile::TempDir;

    fn template() -> InstanceTemplate {
        InstanceTemplate {
            name: "nodes-ex-com".into(),
            network: Some(TaskKey::new("Network", "ex-com")),
            subnet: None,
            tags: vec!["ex-com-k8s-io-role-node".into()],
            preemptible: Some(false),
            boot_disk_image: Some("cos-cloud/cos-stable-65".into()),
            boot_disk_size_gb: Some(20),
            boot_disk_type: Some("pd-standard".into()),
            can_ip_forward: Some(true),
            scopes: vec!["compute-rw".into(), "storage-ro".into()],
            metadata: BTreeMap::from([(
                "startup-script".to_string(),
                Blob::text("#!/bin/bash\necho ${NODE}\n"),
            )]),
            machine_type: Some("n1-standard-2".into()),
            self_link: None,
        }
    }

    fn harness() -> Harness {
        let h = Harness::new();
        h.ctx
            .publish(&TaskKey::new("Network", "ex-com"), network_url(PROJECT, "ex-com"));
        h
    }

    #[test]
    fn test_round_trip_normalizes_scopes_and_image() {
        let h = harness();
        let it = template();
        it.render_direct(&h.target, &h.ctx, None, &Changes::compute(&it, None).unwrap())
            .unwrap();

        let stored = h.api.template("nodes-ex-com").unwrap();
        let sa = &stored.properties.service_accounts[0];
        assert!(sa.scopes[0].starts_with("https://www.googleapis.com/auth/"));
        let params = stored.properties.disks[0].initialize_params.as_ref().unwrap();
        assert!(params.source_image.as_deref().unwrap().contains("/global/images/"));

        let actual = Resource::find(&it, &h.ctx).unwrap().unwrap();
        assert_eq!(actual.boot_disk_image.as_deref(), Some("cos-cloud/cos-stable-65"));
        assert!(Changes::compute(&it, Some(&actual)).unwrap().is_empty());
    }

    #[test]
    fn test_preemptible_scheduling() {
        let mut it = template();
        it.preemptible = Some(true);
        let scheduling = it.scheduling();
        assert!(!scheduling.automatic_restart);
        assert_eq!(scheduling.on_host_maintenance.as_deref(), Some("TERMINATE"));
        assert_eq!(template().scheduling().on_host_maintenance.as_deref(), Some("MIGRATE"));
    }

    #[test]
    fn test_any_change_is_immutable() {
        let h = harness();
        let it = template();
        it.render_direct(&h.target, &h.ctx, None, &Changes::default())
            .unwrap();

        let mut bigger = template();
        bigger.machine_type = Some("n1-standard-4".into());
        let actual = Task::find(&bigger, &h.ctx).unwrap().unwrap();
        let changes = Task::changes(&bigger, Some(&actual)).unwrap();
        let err = Task::check_changes(&bigger, Some(&actual), &changes).unwrap_err();
        assert!(matches!(err, Error::Immutable { .. }));
    }

    #[test]
    fn test_required_fields() {
        let mut it = template();
        it.machine_type = None;
        let changes = Changes::compute(&it, None).unwrap();
        let err = <InstanceTemplate as Resource>::check_changes(None, &it, &changes).unwrap_err();
        assert!(matches!(err, Error::RequiredField("machine_type")));
    }

    #[test]
    fn test_terraform_layout() {
        let temp = TempDir::new().unwrap();
        let tf = TerraformTarget::new(temp.path(), "google", json!({"project": PROJECT}));
        template().render_terraform(&tf, None, &Changes::default()).unwrap();

        let text = tf.to_json().unwrap();
        assert!(text.contains("\"device_name\": \"persistent-disks-0\""));
        assert!(text.contains("${google_compute_network.ex-com.name}"));
        assert!(text.contains("echo $${NODE}"));
        assert!(text.contains("https://www.googleapis.com/auth/compute-rw"));
    }
}
