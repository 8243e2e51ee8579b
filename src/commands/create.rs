use anyhow::{Context as AnyhowContext, Result, bail};
use std::net::Ipv4Addr;

use crate::Context;
use crate::api::validation::{Cidr, validate_instance_group};
use crate::api::{
    AnyDocument, Channel, CloudProvider, Cluster, ClusterSpec, ClusterZone, Federation,
    FederationSpec, InstanceGroup, Kind, Networking, Role, parse_documents,
};
use crate::apply::load_channel;
use crate::cli::{
    CloudArg, CreateArgs, CreateClusterArgs, CreateCommand, CreateFederationArgs,
    CreateInstanceGroupArgs, NetworkingArg, RoleArg,
};
use crate::registry::Registry;
use crate::vfs;
use crate::ui;

/// Metadata label naming the cluster an instance group document belongs to
pub const CLUSTER_LABEL: &str = "clusterup.io/cluster";

const DEFAULT_AWS_NETWORK_CIDR: &str = "172.20.0.0/16";

pub fn run(ctx: &Context, args: CreateArgs) -> Result<()> {
    let registry = ctx.registry()?;
    match args.command {
        Some(CreateCommand::Cluster(args)) => create_cluster(&registry, &args),
        Some(CreateCommand::Instancegroup(args)) => create_instance_group(&registry, &args),
        Some(CreateCommand::Federation(args)) => create_federation(&registry, &args),
        None if args.filenames.is_empty() => {
            bail!("nothing to create: pass -f <file> or one of cluster, instancegroup, federation")
        }
        None => from_files(&registry, &args.filenames),
    }
}

// ============================================================================
// From Documents
// ============================================================================

/// Register every document in `filenames`, clusters before their groups
pub fn from_files(registry: &Registry, filenames: &[String]) -> Result<()> {
    let mut docs = Vec::new();
    for filename in filenames {
        let text = vfs::read_location(filename)?;
        docs.extend(parse_documents(&text).with_context(|| format!("Invalid documents in {filename}"))?);
    }
    if docs.is_empty() {
        bail!("no documents found in {}", filenames.join(", "));
    }

    let batch_clusters: Vec<&Cluster> = docs
        .iter()
        .filter_map(|d| match d {
            AnyDocument::Cluster(c) => Some(c),
            _ => None,
        })
        .collect();
    // Group documents are checked up front so a bad one writes nothing
    let mut groups = Vec::new();
    for doc in &docs {
        if let AnyDocument::InstanceGroup(group) = doc {
            let cluster = owning_cluster(group, &batch_clusters)?;
            groups.push((cluster, group));
        }
    }

    for cluster in &batch_clusters {
        registry.create_cluster(cluster)?;
        ui::success(&format!("Created cluster {}", cluster.name()));
    }
    for (cluster_name, group) in groups {
        let cluster = registry.get_cluster(&cluster_name)?;
        registry.create_instance_group(&cluster, group)?;
        ui::success(&format!("Created instance group {} in {cluster_name}", group.name()));
    }
    for doc in &docs {
        match doc {
            AnyDocument::Federation(federation) => {
                registry.create_federation(federation)?;
                ui::success(&format!("Created federation {}", federation.name()));
            }
            AnyDocument::Channel(channel) => ui::warn(&format!(
                "Skipping channel {}: channels are referenced by location from a cluster spec",
                channel.name()
            )),
            AnyDocument::Cluster(_) | AnyDocument::InstanceGroup(_) => {}
        }
    }
    Ok(())
}

/// The label wins; otherwise the group must arrive with exactly one cluster
fn owning_cluster(group: &InstanceGroup, batch: &[&Cluster]) -> Result<String> {
    if let Some(cluster) = group.metadata.labels.get(CLUSTER_LABEL) {
        return Ok(cluster.clone());
    }
    match batch {
        [cluster] => Ok(cluster.name().to_string()),
        _ => bail!(
            "instance group {} has no {CLUSTER_LABEL} label and the cluster it belongs to is ambiguous",
            group.name()
        ),
    }
}

// ============================================================================
// Templates
// ============================================================================

impl From<CloudArg> for CloudProvider {
    fn from(arg: CloudArg) -> Self {
        match arg {
            CloudArg::Aws => Self::Aws,
            CloudArg::Gce => Self::Gce,
        }
    }
}

impl From<NetworkingArg> for Networking {
    fn from(arg: NetworkingArg) -> Self {
        match arg {
            NetworkingArg::Kubenet => Self::Kubenet,
            NetworkingArg::Kopeio => Self::Kopeio,
            NetworkingArg::Weave => Self::Weave,
            NetworkingArg::Flannel => Self::Flannel,
            NetworkingArg::Calico => Self::Calico,
        }
    }
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Master => Self::Master,
            RoleArg::Node => Self::Node,
            RoleArg::Bastion => Self::Bastion,
        }
    }
}

/// Carve one subnet per zone out of `network`, skipping the first slice
pub fn zone_cidrs(network: &str, count: usize) -> Result<Vec<String>> {
    let cidr: Cidr = network.parse()?;
    let prefix = cidr.prefix + 3;
    if prefix > 28 || count > 7 {
        bail!("cannot fit {count} zone subnets in {network}");
    }
    let size = 1u32 << (32 - u32::from(prefix));
    Ok((1..=count)
        .map(|i| format!("{}/{prefix}", Ipv4Addr::from(cidr.network() + size * i as u32)))
        .collect())
}

/// Cluster document built from `create cluster` flags
pub fn cluster_template(args: &CreateClusterArgs, channel: Option<&Channel>) -> Result<Cluster> {
    let provider = CloudProvider::from(args.cloud);
    let network_cidr = match (provider, &args.network_cidr, &args.vpc) {
        (_, Some(cidr), _) => Some(cidr.clone()),
        (CloudProvider::Aws, None, Some(vpc)) => {
            bail!("--network-cidr is required to carve zone subnets inside VPC {vpc}")
        }
        (CloudProvider::Aws, None, None) => Some(DEFAULT_AWS_NETWORK_CIDR.to_string()),
        (CloudProvider::Gce, None, _) => None,
    };

    let cidrs: Vec<Option<String>> = match (provider, &network_cidr) {
        (CloudProvider::Aws, Some(network)) => zone_cidrs(network, args.zones.len())?
            .into_iter()
            .map(Some)
            .collect(),
        _ => vec![None; args.zones.len()],
    };
    let zones = args
        .zones
        .iter()
        .zip(cidrs)
        .map(|(name, cidr)| ClusterZone {
            name: name.clone(),
            cidr,
        })
        .collect();

    let kubernetes_version = channel
        .and_then(|c| c.spec.cluster.as_ref())
        .and_then(|defaults| defaults.kubernetes_version.clone());

    Ok(Cluster::new_cluster(
        &args.name,
        ClusterSpec {
            cloud_provider: Some(provider),
            project: args.project.clone(),
            network_cidr,
            network_id: args.vpc.clone(),
            zones,
            networking: Some(args.networking.iter().copied().map(Networking::from).collect()),
            kubernetes_version,
            channel: args.channel.clone(),
            ..ClusterSpec::default()
        },
    ))
}

/// One master in the first zone and a nodes group across every zone
pub fn default_groups(
    cluster: &Cluster,
    node_count: u32,
    channel: Option<&Channel>,
) -> Vec<InstanceGroup> {
    let mut groups = Vec::new();
    if let Some(zone) = cluster.zone_names().first() {
        groups.push(InstanceGroup::template(
            cluster,
            &format!("master-{zone}"),
            Role::Master,
            channel,
        ));
    }
    let mut nodes = InstanceGroup::template(cluster, "nodes", Role::Node, channel);
    nodes.spec.min_size = Some(node_count);
    nodes.spec.max_size = Some(node_count);
    groups.push(nodes);
    groups
}

fn channel_for(location: Option<&str>) -> Result<Option<Channel>> {
    location.map(load_channel).transpose()
}

pub fn create_cluster(registry: &Registry, args: &CreateClusterArgs) -> Result<()> {
    ui::header(&format!("Creating Cluster: {}", args.name));
    let channel = channel_for(args.channel.as_deref())?;
    let mut cluster = cluster_template(args, channel.as_ref())?;
    let mut groups = default_groups(&cluster, args.node_count, channel.as_ref());

    if args.edit {
        (cluster, groups) = edit_cluster(&cluster, &groups)?;
    }
    for group in &groups {
        validate_instance_group(group, &cluster)?;
    }

    let stored = registry.create_cluster(&cluster)?;
    for group in &groups {
        registry.create_instance_group(&stored, group)?;
    }

    ui::kv("Cloud", &CloudProvider::from(args.cloud).to_string());
    ui::kv("Zones", &stored.zone_names().join(", "));
    for group in &groups {
        ui::kv("Instance group", &format!("{} ({})", group.name(), group.role()));
    }
    ui::success(&format!("Created cluster {}", stored.name()));
    ui::dim(&format!(
        "Run 'clusterup update cluster {}' to preview the changes",
        stored.name()
    ));
    Ok(())
}

/// Edit the cluster and its groups as one YAML stream
fn edit_cluster(cluster: &Cluster, groups: &[InstanceGroup]) -> Result<(Cluster, Vec<InstanceGroup>)> {
    let mut text = cluster.to_yaml()?;
    for group in groups {
        text.push_str("---\n");
        text.push_str(&group.to_yaml()?);
    }
    let Some(edited) = super::edit(&text)? else {
        bail!("edit aborted; nothing was created");
    };

    let mut clusters = Vec::new();
    let mut edited_groups = Vec::new();
    for doc in parse_documents(&edited)? {
        match doc {
            AnyDocument::Cluster(c) => clusters.push(c),
            AnyDocument::InstanceGroup(g) => edited_groups.push(g),
            other => bail!("unexpected {} document {:?} in edited cluster", other.kind(), other.name()),
        }
    }
    match <[Cluster; 1]>::try_from(clusters) {
        Ok([cluster]) => Ok((cluster, edited_groups)),
        Err(_) => bail!("the edited documents must contain exactly one Cluster"),
    }
}

pub fn create_instance_group(registry: &Registry, args: &CreateInstanceGroupArgs) -> Result<()> {
    let cluster = registry.get_cluster(&args.cluster)?;
    let channel = channel_for(cluster.spec.channel.as_deref())?;
    let mut group = InstanceGroup::template(&cluster, &args.name, args.role.into(), channel.as_ref());

    if args.edit {
        let Some(edited) = super::edit(&group.to_yaml()?)? else {
            bail!("edit aborted; nothing was created");
        };
        group = InstanceGroup::from_yaml(&edited, Kind::InstanceGroup)?;
    }

    registry.create_instance_group(&cluster, &group)?;
    ui::success(&format!(
        "Created instance group {} ({}) in {}",
        group.name(),
        group.role(),
        cluster.name()
    ));
    Ok(())
}

pub fn create_federation(registry: &Registry, args: &CreateFederationArgs) -> Result<()> {
    let federation = Federation::new(
        Kind::Federation,
        &args.name,
        FederationSpec {
            controllers: args.controllers.clone(),
            members: args.members.clone(),
            dns_name: args.dns_name.clone(),
        },
    );
    registry.create_federation(&federation)?;
    ui::success(&format!("Created federation {}", federation.name()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Overlays;
    use crate::vfs::MemStore;
    use std::fs;
    use tempfile::TempDir;

    fn registry() -> Registry {
        Registry::new(Box::new(MemStore::new("test")))
    }

    fn aws_args(name: &str) -> CreateClusterArgs {
        CreateClusterArgs {
            name: name.to_string(),
            cloud: CloudArg::Aws,
            zones: vec!["us-east-1a".into(), "us-east-1b".into()],
            network_cidr: None,
            vpc: None,
            project: None,
            networking: vec![NetworkingArg::Calico],
            node_count: 3,
            channel: None,
            edit: false,
        }
    }

    #[test]
    fn test_zone_cidrs() {
        assert_eq!(
            zone_cidrs("172.20.0.0/16", 2).unwrap(),
            vec!["172.20.32.0/19", "172.20.64.0/19"]
        );
        assert!(zone_cidrs("172.20.0.0/16", 8).is_err());
        assert!(zone_cidrs("10.0.0.0/27", 1).is_err());
    }

    #[test]
    fn test_create_cluster_from_template() {
        let registry = registry();
        create_cluster(&registry, &aws_args("ex.com")).unwrap();

        let cluster = registry.get_cluster("ex.com").unwrap();
        assert_eq!(cluster.spec.network_cidr.as_deref(), Some(DEFAULT_AWS_NETWORK_CIDR));
        assert_eq!(cluster.spec.zones[1].cidr.as_deref(), Some("172.20.64.0/19"));
        assert_eq!(cluster.networking(), Overlays::single(Networking::Calico));
        assert_eq!(cluster.spec.config_base.as_deref(), Some("mem://test/ex.com"));

        let groups = registry.list_instance_groups("ex.com").unwrap();
        let names: Vec<&str> = groups.iter().map(InstanceGroup::name).collect();
        assert_eq!(names, vec!["master-us-east-1a", "nodes"]);
        assert_eq!(groups[1].min_size(), 3);
    }

    #[test]
    fn test_create_cluster_twice_fails() {
        let registry = registry();
        create_cluster(&registry, &aws_args("ex.com")).unwrap();
        let err = create_cluster(&registry, &aws_args("ex.com")).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_vpc_requires_network_cidr() {
        let mut args = aws_args("ex.com");
        args.vpc = Some("vpc-1".into());
        assert!(cluster_template(&args, None).is_err());
    }

    #[test]
    fn test_gce_template_has_no_zone_cidrs() {
        let mut args = aws_args("ex.com");
        args.cloud = CloudArg::Gce;
        args.project = Some("proj".into());
        args.zones = vec!["us-central1-a".into()];
        let cluster = cluster_template(&args, None).unwrap();
        assert!(cluster.spec.network_cidr.is_none());
        assert!(cluster.spec.zones[0].cidr.is_none());
    }

    const DOCUMENTS: &str = r"
apiVersion: clusterup/v1alpha1
kind: Cluster
metadata:
  name: ex.com
spec:
  cloudProvider: aws
  networkCIDR: 10.0.0.0/16
  zones:
  - name: us-east-1a
    cidr: 10.0.32.0/19
---
apiVersion: clusterup/v1alpha1
kind: InstanceGroup
metadata:
  name: nodes
  labels:
    clusterup.io/cluster: ex.com
spec:
  role: Node
  machineType: t2.medium
  minSize: 2
  maxSize: 2
";

    #[test]
    fn test_from_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cluster.yaml");
        fs::write(&path, DOCUMENTS).unwrap();
        let registry = registry();

        from_files(&registry, &[path.display().to_string()]).unwrap();
        assert!(registry.read_cluster("ex.com").unwrap().is_some());
        assert!(registry.read_instance_group("ex.com", "nodes").unwrap().is_some());

        let err = from_files(&registry, &[path.display().to_string()]).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_group_without_cluster_is_rejected() {
        let group = InstanceGroup::template(
            &Cluster::new_cluster("ex.com", ClusterSpec::default()),
            "nodes",
            Role::Node,
            None,
        );
        assert!(owning_cluster(&group, &[]).is_err());
    }

    #[test]
    fn test_create_federation_requires_clusters() {
        let registry = registry();
        let args = CreateFederationArgs {
            name: "fed.ex.com".into(),
            controllers: vec!["ex.com".into()],
            members: Vec::new(),
            dns_name: None,
        };
        assert!(create_federation(&registry, &args).is_err());

        create_cluster(&registry, &aws_args("ex.com")).unwrap();
        create_federation(&registry, &args).unwrap();
        assert!(registry.read_federation("fed.ex.com").unwrap().is_some());
    }
}
