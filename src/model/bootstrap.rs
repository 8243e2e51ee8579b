//! Startup script handed to every instance
//!
//! The script writes the node configuration and hands over to the node
//! agent, which fetches the rest from the config store.

use super::ClusterModel;
use crate::api::InstanceGroup;
use serde::Serialize;
use std::collections::BTreeMap;
use taskgraph::{Blob, Error, Result};

const AGENT: &str = "/opt/clusterup/bin/nodeup";
const CONFIG_PATH: &str = "/etc/clusterup/node.yaml";

/// What the node agent needs to join the cluster
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeConfig<'a> {
    cluster_name: &'a str,
    instance_group: &'a str,
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_base: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kubernetes_version: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    node_labels: &'a BTreeMap<String, String>,
}

fn render(model: &ClusterModel<'_>, group: &InstanceGroup) -> Result<String> {
    let spec = &model.cluster.spec;
    let config = NodeConfig {
        cluster_name: model.cluster_name(),
        instance_group: group.name(),
        role: group.role().as_str(),
        config_base: spec.config_base.as_deref(),
        kubernetes_version: spec.kubernetes_version.as_deref(),
        node_labels: &group.spec.node_labels,
    };
    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| Error::permanent(format!("cannot render node config: {e}")))?;

    let mut script = String::from("#!/bin/bash\nset -o errexit\nset -o nounset\nset -o pipefail\n\n");
    script.push_str(&format!("mkdir -p {}\n", parent(CONFIG_PATH)));
    script.push_str(&format!("cat > {CONFIG_PATH} <<'EOF'\n{yaml}EOF\n\n"));
    script.push_str(&format!("exec {AGENT} --conf={CONFIG_PATH}\n"));
    Ok(script)
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(dir, _)| dir)
}

/// Startup script for one instance group
pub fn startup_script(model: &ClusterModel<'_>, group: &InstanceGroup) -> Result<Blob> {
    Ok(Blob::text(render(model, group)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Networking, Role};
    use crate::model::testing::aws_cluster;

    #[test]
    fn test_script_carries_node_config() {
        let mut cluster = aws_cluster(Networking::Kubenet);
        cluster.spec.kubernetes_version = Some("1.4.6".into());
        let mut group = InstanceGroup::template(&cluster, "nodes", Role::Node, None);
        group.spec.node_labels.insert("tier".into(), "web".into());
        let model = ClusterModel::new(&cluster, &[]);

        let script = startup_script(&model, &group).unwrap();
        let text = script.as_str().unwrap();
        assert!(text.starts_with("#!/bin/bash\n"));
        assert!(text.contains("clusterName: ex.com\n"));
        assert!(text.contains("role: node\n"));
        assert!(text.contains("kubernetesVersion: 1.4.6\n"));
        assert!(text.contains("tier: web\n"));
        assert!(!text.contains("configBase"));
        assert!(text.ends_with("exec /opt/clusterup/bin/nodeup --conf=/etc/clusterup/node.yaml\n"));
    }

    #[test]
    fn test_script_is_stable() {
        let cluster = aws_cluster(Networking::Kubenet);
        let group = InstanceGroup::template(&cluster, "nodes", Role::Node, None);
        let model = ClusterModel::new(&cluster, &[]);
        let a = startup_script(&model, &group).unwrap();
        let b = startup_script(&model, &group).unwrap();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }
}
