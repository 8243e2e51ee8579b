use super::{ClusterModel, bootstrap, gce_name};
use crate::api::{CloudProvider, InstanceGroup, Role};
use crate::tasks::{aws, gce};
use std::collections::BTreeMap;
use taskgraph::{Blob, Error, ModelBuilder, ModelContext, Resource, Result, TaskKey};

const STARTUP_SCRIPT_KEY: &str = "startup-script";
const CLUSTER_NAME_KEY: &str = "cluster-name";
const DEFAULT_GCE_DISK_TYPE: &str = "pd-standard";

const NODE_SCOPES: &[&str] = &["compute-rw", "logging-write", "monitoring", "storage-ro"];
const MASTER_SCOPES: &[&str] = &[
    "compute-rw",
    "logging-write",
    "monitoring",
    "ndev.clouddns.readwrite",
    "storage-ro",
];

/// Compute resources for every instance group
pub struct InstanceGroupModelBuilder<'a> {
    pub model: &'a ClusterModel<'a>,
}

impl ModelBuilder for InstanceGroupModelBuilder<'_> {
    fn build(&self, ctx: &mut ModelContext) -> Result<()> {
        let provider = self.model.provider()?;
        for group in self.model.instance_groups {
            match provider {
                CloudProvider::Aws => self.build_aws(ctx, group)?,
                CloudProvider::Gce => self.build_gce(ctx, group)?,
            }
        }
        Ok(())
    }
}

fn machine_type(group: &InstanceGroup) -> Result<String> {
    group.spec.machine_type.clone().ok_or_else(|| {
        Error::Validation(format!("instance group {} has no machineType", group.name()))
    })
}

impl InstanceGroupModelBuilder<'_> {
    fn build_aws(&self, ctx: &mut ModelContext, group: &InstanceGroup) -> Result<()> {
        let model = self.model;
        let name = model.aws_group_name(group);
        let role = group.role();

        let launch_configuration = ctx.add(aws::LaunchConfiguration {
            name: name.clone(),
            image_id: Some(model.image_for(group)?),
            instance_type: Some(machine_type(group)?),
            security_groups: vec![model.link_to_security_group(role)],
            user_data: Some(bootstrap::startup_script(model, group)?),
            root_volume_size: Some(group.root_volume_size()),
            root_volume_type: group.spec.root_volume_type.clone(),
            associate_public_ip: Some(true),
            cloud_name: None,
        })?;

        let mut subnets: Vec<TaskKey> = group
            .zones_in(model.cluster)
            .iter()
            .map(|zone| model.link_to_subnet(zone))
            .collect();
        subnets.sort();

        let mut tags = model.cloud_tags(&name);
        tags.extend(group.spec.cloud_labels.clone());
        tags.insert(format!("k8s.io/role/{}", role.as_str()), "1".to_string());

        ctx.add(aws::AutoscalingGroup {
            name,
            launch_configuration,
            min_size: Some(group.min_size()),
            max_size: Some(group.max_size()),
            subnets,
            tags: Some(tags),
            launch_configuration_name: None,
        })?;
        Ok(())
    }

    fn build_gce(&self, ctx: &mut ModelContext, group: &InstanceGroup) -> Result<()> {
        let model = self.model;
        let name = model.gce_group_name(group);
        let role = group.role();
        let region = model.region()?;

        let scopes = if role == Role::Master { MASTER_SCOPES } else { NODE_SCOPES };
        let mut metadata = BTreeMap::new();
        metadata.insert(
            STARTUP_SCRIPT_KEY.to_string(),
            bootstrap::startup_script(model, group)?,
        );
        metadata.insert(
            CLUSTER_NAME_KEY.to_string(),
            Blob::text(model.cluster_name()),
        );

        let template = ctx.add(gce::InstanceTemplate {
            name: name.clone(),
            network: Some(model.link_to_network()),
            subnet: Some(model.link_to_gce_subnet(&region)),
            tags: vec![format!("{}-k8s-io-role-{}", model.cluster.dashed_name(), role.as_str())],
            preemptible: Some(false),
            boot_disk_image: Some(model.image_for(group)?),
            boot_disk_size_gb: Some(u64::from(group.root_volume_size())),
            boot_disk_type: Some(
                group
                    .spec
                    .root_volume_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_GCE_DISK_TYPE.to_string()),
            ),
            // Pod routes point at instances
            can_ip_forward: Some(true),
            scopes: scopes.iter().map(ToString::to_string).collect(),
            metadata,
            machine_type: Some(machine_type(group)?),
            self_link: None,
        })?;

        let zones = group.zones_in(model.cluster);
        for (zone, size) in zones.iter().zip(split_size(group.min_size(), zones.len())) {
            ctx.add(gce::ManagedInstanceGroup {
                name: gce_name(&format!("{zone}-{name}")),
                zone: zone.clone(),
                base_instance_name: Some(name.clone()),
                instance_template: template.clone(),
                target_size: Some(size),
            })?;
        }
        Ok(())
    }
}

/// Spread `total` instances over `zones`, earlier zones taking the remainder
fn split_size(total: u32, zones: usize) -> Vec<u32> {
    let Ok(count) = u32::try_from(zones) else {
        return Vec::new();
    };
    if count == 0 {
        return Vec::new();
    }
    (0..count)
        .map(|i| total / count + u32::from(i < total % count))
        .collect()
}

/// Keys of the tasks that belong to one instance group
pub fn task_keys(model: &ClusterModel<'_>, group: &InstanceGroup) -> Result<Vec<TaskKey>> {
    let keys = match model.provider()? {
        CloudProvider::Aws => {
            let name = model.aws_group_name(group);
            vec![
                TaskKey::new(aws::LaunchConfiguration::KIND, name.clone()),
                TaskKey::new(aws::AutoscalingGroup::KIND, name),
            ]
        }
        CloudProvider::Gce => {
            let name = model.gce_group_name(group);
            let mut keys = vec![TaskKey::new(gce::InstanceTemplate::KIND, name.clone())];
            keys.extend(group.zones_in(model.cluster).iter().map(|zone| {
                TaskKey::new(
                    gce::ManagedInstanceGroup::KIND,
                    gce_name(&format!("{zone}-{name}")),
                )
            }));
            keys
        }
    };
    Ok(keys)
}
