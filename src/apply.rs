//! Cluster execution: model → graph → target, with UI integration
//!
//! Shared by `update cluster` and the `delete` commands. The engine knows
//! nothing about documents or terminals; this module wires the two together.

use crate::api::{Channel, CloudProvider, Cluster, InstanceGroup, Kind};
use crate::cloud::Connection;
use crate::model::{self, ClusterModel};
use crate::progress::BarProgress;
use crate::registry::Registry;
use crate::vfs;
use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use taskgraph::{
    CancelToken, DirectTarget, DryRunTarget, ExecContext, ExecuteOptions, Graph, Mode,
    PlannedChange, Report, RetryConfig, Target, TaskKey, TerraformOutput, TerraformTarget,
    execute,
};

/// A cluster with everything the builders read
pub struct LoadedCluster {
    pub cluster: Cluster,
    pub instance_groups: Vec<InstanceGroup>,
    pub channel: Option<Channel>,
}

impl LoadedCluster {
    pub fn load(registry: &Registry, name: &str) -> Result<Self> {
        let cluster = registry.get_cluster(name)?;
        let instance_groups = registry.list_instance_groups(name)?;
        let channel = match cluster.spec.channel.as_deref() {
            Some(location) => Some(load_channel(location)?),
            None => None,
        };
        Ok(Self {
            cluster,
            instance_groups,
            channel,
        })
    }

    pub fn model<'a>(&'a self, connection: &'a Connection) -> ClusterModel<'a> {
        let model = ClusterModel::new(&self.cluster, &self.instance_groups)
            .with_channel(self.channel.as_ref());
        if connection.online {
            model.with_cloud(connection.cloud.as_ref())
        } else {
            model
        }
    }
}

pub fn load_channel(location: &str) -> Result<Channel> {
    let text = vfs::read_location(location)?;
    Channel::from_yaml(&text, Kind::Channel).with_context(|| format!("Invalid channel {location}"))
}

/// Build and link every task of the cluster
pub fn build_graph(model: &ClusterModel<'_>) -> Result<Graph> {
    let ctx = model::build(model).context("Failed to build the cluster model")?;
    Graph::build(ctx).context("Failed to link the task graph")
}

/// Where an execution renders to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Direct,
    Terraform(PathBuf),
    DryRun,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: TargetKind,
    pub mode: Mode,
    pub jobs: usize,
    /// Overall deadline; running tasks stop at their next cloud call
    pub timeout: Option<Duration>,
    /// Retry budget per task
    pub max_task_duration: Option<Duration>,
    pub quiet: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            target: TargetKind::DryRun,
            mode: Mode::Apply,
            jobs: 4,
            timeout: None,
            max_task_duration: None,
            quiet: true,
        }
    }
}

/// What one execution produced
pub struct Outcome {
    pub report: Report,
    /// Dry-run plan, empty for other targets
    pub planned: Vec<PlannedChange>,
    pub terraform: Option<TerraformOutput>,
}

/// Provider block for the terraform target
fn terraform_provider(cluster: &Cluster) -> Result<(&'static str, Value)> {
    let region = cluster.region().context("cluster has no region")?;
    match cluster.spec.cloud_provider {
        Some(CloudProvider::Aws) => Ok(("aws", json!({ "region": region }))),
        Some(CloudProvider::Gce) => Ok((
            "google",
            json!({ "project": cluster.spec.project, "region": region }),
        )),
        None => bail!("cluster {} has no cloudProvider", cluster.name()),
    }
}

/// Cluster-wide values written to `data.tfvars`
fn terraform_data(cluster: &Cluster) -> Vec<(&'static str, String)> {
    let mut data = vec![("cluster_name", cluster.name().to_string())];
    if let Some(region) = cluster.region() {
        data.push(("region", region));
    }
    if let Some(project) = &cluster.spec.project {
        data.push(("project", project.clone()));
    }
    data
}

/// Execute a graph against the requested target
pub fn run(
    graph: &Graph,
    cluster: &Cluster,
    connection: &Connection,
    opts: &RunOptions,
) -> Result<Outcome> {
    let provider = connection.cloud.provider_id();
    let target = match &opts.target {
        TargetKind::Direct => {
            if !connection.online {
                bail!(
                    "no {provider} API binding is available; use --target terraform or --target dry-run"
                );
            }
            Target::Direct(DirectTarget::new(connection.cloud.clone()))
        }
        TargetKind::Terraform(dir) => {
            if opts.mode == Mode::Destroy {
                bail!("the terraform target cannot destroy; run terraform destroy in {}", dir.display());
            }
            let (name, config) = terraform_provider(cluster)?;
            let tf = TerraformTarget::new(dir, name, config);
            for (key, value) in terraform_data(cluster) {
                tf.add_data(key, &value)?;
            }
            Target::Terraform(tf)
        }
        TargetKind::DryRun => Target::DryRun(DryRunTarget::new()),
    };

    let mut retry = RetryConfig::default();
    if let Some(max) = opts.max_task_duration {
        retry.max_total = max;
    }
    let exec_opts = ExecuteOptions {
        jobs: opts.jobs,
        retry,
        assume_absent: !connection.online,
        mode: opts.mode,
    };
    if exec_opts.assume_absent {
        log::info!("{provider} is offline; treating every object as absent");
    }

    let cancel = opts
        .timeout
        .map_or_else(CancelToken::new, CancelToken::with_timeout);
    let ctx = ExecContext::new(connection.cloud.clone(), cancel);
    let mut progress = BarProgress::new(opts.quiet);
    let report = execute(graph, &target, &ctx, &exec_opts, &mut progress)?;

    let (planned, terraform) = match &target {
        Target::DryRun(dry) => (dry.planned(), None),
        Target::Terraform(tf) if report.is_success() => (Vec::new(), Some(tf.finish()?)),
        _ => (Vec::new(), None),
    };
    Ok(Outcome {
        report,
        planned,
        terraform,
    })
}

/// The part of `graph` made of `keys`; keys the graph lacks are skipped
pub fn restrict(graph: &Graph, keys: &[TaskKey]) -> Result<Graph> {
    let keys: BTreeSet<TaskKey> = keys
        .iter()
        .filter(|k| graph.index_of(k).is_some())
        .cloned()
        .collect();
    Ok(graph.subgraph(&keys)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Networking;
    use crate::cloud::aws::AwsCloud;
    use crate::cloud::gce::GceCloud;
    use crate::cloud::mock::{MockCompute, MockEc2};
    use crate::model::testing::{aws_cluster, gce_cluster, groups};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use taskgraph::{Action, TaskState};
    use tempfile::TempDir;

    fn aws_connection(api: &Arc<MockEc2>) -> Connection {
        let cloud = AwsCloud::new("us-east-1", BTreeMap::new(), api.clone())
            .with_polling(Duration::from_millis(1), Duration::from_secs(5));
        Connection {
            cloud: Arc::new(cloud),
            online: true,
        }
    }

    fn gce_connection(api: &Arc<MockCompute>) -> Connection {
        let cloud = GceCloud::new("proj", "us-central1", BTreeMap::new(), api.clone())
            .with_polling(Duration::from_millis(1), Duration::from_secs(5));
        Connection {
            cloud: Arc::new(cloud),
            online: true,
        }
    }

    fn opts(target: TargetKind) -> RunOptions {
        RunOptions {
            target,
            ..RunOptions::default()
        }
    }

    fn aws_graph(cluster: &Cluster, groups: &[InstanceGroup]) -> Graph {
        build_graph(&ClusterModel::new(cluster, groups)).unwrap()
    }

    #[test]
    fn test_dry_run_on_absent_state_writes_nothing() {
        let api = Arc::new(MockEc2::default());
        let connection = aws_connection(&api);
        let cluster = aws_cluster(Networking::Calico);
        let groups = groups(&cluster, false);
        let graph = aws_graph(&cluster, &groups);

        let outcome = run(&graph, &cluster, &connection, &opts(TargetKind::DryRun)).unwrap();
        assert_eq!(api.writes(), 0);
        assert!(outcome.report.is_success());
        assert!(
            outcome
                .report
                .entries
                .iter()
                .all(|e| e.state == TaskState::Planned && e.action == Action::Create)
        );
        assert_eq!(outcome.planned.len(), graph.len());
    }

    #[test]
    fn test_second_direct_apply_is_all_noop() {
        let api = Arc::new(MockEc2::default());
        let connection = aws_connection(&api);
        let cluster = aws_cluster(Networking::Weave);
        let groups = groups(&cluster, true);
        let graph = aws_graph(&cluster, &groups);

        let first = run(&graph, &cluster, &connection, &opts(TargetKind::Direct)).unwrap();
        assert!(first.report.is_success(), "{}", first.report.summary_line());
        assert_eq!(api.vpc_count(), 1);
        assert!(api.autoscaling_group("nodes.ex.com").is_some());

        api.reset_counts();
        let second = run(&graph, &cluster, &connection, &opts(TargetKind::Direct)).unwrap();
        assert!(second.report.is_success());
        assert_eq!(api.writes(), 0);
        assert_eq!(second.report.summary().total_changes(), 0);
    }

    #[test]
    fn test_gce_second_direct_apply_is_all_noop() {
        let api = Arc::new(MockCompute::default());
        let connection = gce_connection(&api);
        let cluster = gce_cluster();
        let groups = groups(&cluster, false);
        let graph = aws_graph(&cluster, &groups);

        let first = run(&graph, &cluster, &connection, &opts(TargetKind::Direct)).unwrap();
        assert!(first.report.is_success(), "{}", first.report.summary_line());
        assert!(api.template("nodes-ex-com").is_some());

        api.reset_counts();
        let second = run(&graph, &cluster, &connection, &opts(TargetKind::Direct)).unwrap();
        assert_eq!(api.writes(), 0);
        assert_eq!(second.report.summary().total_changes(), 0);
    }

    #[test]
    fn test_machine_type_change_rolls_launch_configuration() {
        let api = Arc::new(MockEc2::default());
        let connection = aws_connection(&api);
        let cluster = aws_cluster(Networking::Kubenet);
        let mut groups = groups(&cluster, false);
        let first = run(&aws_graph(&cluster, &groups), &cluster, &connection, &opts(TargetKind::Direct))
            .unwrap();
        assert!(first.report.is_success(), "{}", first.report.summary_line());
        let before = api.autoscaling_group("nodes.ex.com").unwrap().launch_configuration_name;

        groups[1].spec.machine_type = Some("m4.large".into());
        let second = run(&aws_graph(&cluster, &groups), &cluster, &connection, &opts(TargetKind::Direct))
            .unwrap();
        assert!(second.report.is_success(), "{}", second.report.summary_line());
        let entry = second
            .report
            .entry(&TaskKey::new("LaunchConfiguration", "nodes.ex.com"))
            .unwrap();
        assert_eq!(entry.action, Action::Update);

        let after = api.autoscaling_group("nodes.ex.com").unwrap().launch_configuration_name;
        assert_ne!(after, before);
        let versions: Vec<String> = api
            .launch_configuration_names()
            .into_iter()
            .filter(|n| n.starts_with("nodes.ex.com-"))
            .collect();
        assert_eq!(versions, vec![after]);
    }

    #[test]
    fn test_terraform_output_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let connection = Connection {
            cloud: Arc::new(AwsCloud::offline("us-east-1", BTreeMap::new())),
            online: false,
        };
        let cluster = aws_cluster(Networking::Calico);
        let groups = groups(&cluster, false);
        let graph = aws_graph(&cluster, &groups);
        let target = TargetKind::Terraform(temp.path().to_path_buf());

        let first = run(&graph, &cluster, &connection, &opts(target.clone())).unwrap();
        let first = first.terraform.unwrap();
        assert!(first.previous.is_none());
        assert!(first.current.contains("\"aws_launch_configuration\""));
        assert!(first.current.contains("${aws_security_group.masters-ex-com.id}"));

        let second = run(&graph, &cluster, &connection, &opts(target)).unwrap();
        let second = second.terraform.unwrap();
        assert!(!second.changed());
        assert_eq!(second.current, first.current);
    }

    #[test]
    fn test_terraform_output_reencodes_identically() {
        let temp = TempDir::new().unwrap();
        let connection = Connection {
            cloud: Arc::new(AwsCloud::offline("us-east-1", BTreeMap::new())),
            online: false,
        };
        let cluster = aws_cluster(Networking::Calico);
        let groups = groups(&cluster, false);
        let graph = aws_graph(&cluster, &groups);
        let target = TargetKind::Terraform(temp.path().to_path_buf());

        let outcome = run(&graph, &cluster, &connection, &opts(target)).unwrap();
        let tf = outcome.terraform.unwrap();
        let written = std::fs::read_to_string(&tf.main_path).unwrap();
        let parsed: Value = serde_json::from_str(&written).unwrap();
        let mut reencoded = serde_json::to_string_pretty(&parsed).unwrap();
        reencoded.push('\n');
        assert_eq!(reencoded, written);
        assert_eq!(parsed["variable"]["cluster_name"]["type"], "string");
        assert_eq!(parsed["provider"]["aws"]["region"], "us-east-1");

        let tfvars = std::fs::read_to_string(temp.path().join("data.tfvars")).unwrap();
        assert_eq!(
            tfvars,
            "cluster_name = \"ex.com\"\nnetwork_cidr = \"10.0.0.0/16\"\nregion = \"us-east-1\"\n"
        );
    }

    #[test]
    fn test_direct_requires_a_binding() {
        let connection = Connection {
            cloud: Arc::new(AwsCloud::offline("us-east-1", BTreeMap::new())),
            online: false,
        };
        let cluster = aws_cluster(Networking::Kubenet);
        let graph = aws_graph(&cluster, &[]);
        let err = run(&graph, &cluster, &connection, &opts(TargetKind::Direct))
            .err()
            .unwrap();
        assert!(err.to_string().contains("no aws API binding"));
    }

    #[test]
    fn test_destroy_removes_everything() {
        let api = Arc::new(MockEc2::default());
        let connection = aws_connection(&api);
        let cluster = aws_cluster(Networking::Kubenet);
        let groups = groups(&cluster, false);
        let graph = aws_graph(&cluster, &groups);
        run(&graph, &cluster, &connection, &opts(TargetKind::Direct)).unwrap();
        assert!(api.object_count() > 0);

        let destroy = RunOptions {
            target: TargetKind::Direct,
            mode: Mode::Destroy,
            ..RunOptions::default()
        };
        let outcome = run(&graph, &cluster, &connection, &destroy).unwrap();
        assert!(outcome.report.is_success(), "{}", outcome.report.summary_line());
        assert_eq!(api.vpc_count(), 0);
        assert!(api.autoscaling_group("nodes.ex.com").is_none());
    }

    #[test]
    fn test_restrict_to_instance_group() {
        let cluster = aws_cluster(Networking::Kubenet);
        let groups = groups(&cluster, false);
        let model = ClusterModel::new(&cluster, &groups);
        let graph = build_graph(&model).unwrap();
        let keys = model::instance_group::task_keys(&model, &groups[1]).unwrap();
        let sub = restrict(&graph, &keys).unwrap();
        assert_eq!(sub.len(), 2);
    }
}
