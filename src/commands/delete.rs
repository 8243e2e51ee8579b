use anyhow::{Result, bail};
use taskgraph::{Graph, Mode};

use crate::Context;
use crate::api::Cluster;
use crate::apply::{self, LoadedCluster, Outcome, RunOptions, TargetKind};
use crate::cli::{DeleteClusterArgs, DeleteCommand, DeleteFederationArgs, DeleteInstanceGroupArgs};
use crate::cloud::{self, Connection};
use crate::config::Config;
use crate::model::instance_group;
use crate::registry::Registry;
use crate::ui;

pub fn run(ctx: &Context, cmd: DeleteCommand) -> Result<u8> {
    let registry = ctx.registry()?;
    match cmd {
        DeleteCommand::Cluster(args) => {
            let cluster = registry.get_cluster(&args.name)?;
            let connection = cloud::connect(&cluster)?;
            delete_cluster(&registry, &args, &connection, &ctx.config, ctx.quiet)
        }
        DeleteCommand::Instancegroup(args) => {
            let cluster = registry.get_cluster(&args.cluster)?;
            let connection = cloud::connect(&cluster)?;
            delete_instance_group(&registry, &args, &connection, &ctx.config, ctx.quiet)
        }
        DeleteCommand::Federation(args) => delete_federation(&registry, &args),
    }
}

/// Discover and delete, or only list with `yes == false`
fn destroy(
    graph: &Graph,
    cluster: &Cluster,
    connection: &Connection,
    opts: RunOptions,
    yes: bool,
) -> Result<Outcome> {
    let opts = RunOptions {
        target: if yes { TargetKind::Direct } else { TargetKind::DryRun },
        mode: Mode::Destroy,
        ..opts
    };
    apply::run(graph, cluster, connection, &opts)
}

fn run_options(config: &Config, jobs: Option<usize>, quiet: bool) -> RunOptions {
    RunOptions {
        jobs: config.jobs(jobs),
        max_task_duration: config.max_task_duration(),
        quiet,
        ..RunOptions::default()
    }
}

// ============================================================================
// Cluster
// ============================================================================

pub fn delete_cluster(
    registry: &Registry,
    args: &DeleteClusterArgs,
    connection: &Connection,
    config: &Config,
    quiet: bool,
) -> Result<u8> {
    ui::header(&format!("Deleting Cluster: {}", args.name));

    if args.unregister {
        if !args.yes && !super::confirm(&format!("Remove {} from the store?", args.name))? {
            ui::info("Cancelled");
            return Ok(0);
        }
        let removed = registry.delete_cluster(&args.name)?;
        ui::success(&format!("Unregistered {} ({removed} documents)", args.name));
        ui::dim("Cloud resources were left in place");
        return Ok(0);
    }

    if !connection.online {
        bail!(
            "deleting cloud resources needs a {} API binding; pass --unregister to remove only the stored documents",
            connection.cloud.provider_id()
        );
    }

    let loaded = LoadedCluster::load(registry, &args.name)?;
    let graph = apply::build_graph(&loaded.model(connection))?;
    let outcome = destroy(
        &graph,
        &loaded.cluster,
        connection,
        run_options(config, args.jobs, quiet),
        args.yes,
    )?;

    if !args.yes {
        ui::section("Would delete");
        ui::plan(&outcome.planned);
        println!();
        ui::dim("Run with --yes to delete these resources");
        return Ok(super::exit_status(&outcome.report));
    }

    super::print_summary(&outcome.report);
    if !outcome.report.is_success() {
        ui::warn("Cluster documents kept so the deletion can be retried");
        return Ok(super::exit_status(&outcome.report));
    }
    let removed = registry.delete_cluster(&args.name)?;
    ui::success(&format!("Deleted cluster {} ({removed} documents)", args.name));
    Ok(0)
}

// ============================================================================
// Instance Group
// ============================================================================

pub fn delete_instance_group(
    registry: &Registry,
    args: &DeleteInstanceGroupArgs,
    connection: &Connection,
    config: &Config,
    quiet: bool,
) -> Result<u8> {
    ui::header(&format!("Deleting Instance Group: {}", args.name));

    let loaded = LoadedCluster::load(registry, &args.cluster)?;
    let Some(group) = loaded.instance_groups.iter().find(|g| g.name() == args.name) else {
        bail!("instance group {:?} not found in cluster {}", args.name, args.cluster);
    };
    let model = loaded.model(connection);
    let keys = instance_group::task_keys(&model, group)?;

    if !connection.online {
        if !args.yes {
            ui::section("Would unregister");
            for key in &keys {
                println!("  - {key}");
            }
            return Ok(0);
        }
        registry.delete_instance_group(&args.cluster, &args.name)?;
        ui::success(&format!("Unregistered instance group {}", args.name));
        ui::warn(&format!(
            "No {} API binding: regenerate terraform output with 'clusterup update cluster {} --target terraform --yes'",
            connection.cloud.provider_id(),
            args.cluster
        ));
        return Ok(0);
    }

    let graph = apply::restrict(&apply::build_graph(&model)?, &keys)?;
    let outcome = destroy(
        &graph,
        &loaded.cluster,
        connection,
        run_options(config, None, quiet),
        args.yes,
    )?;

    if !args.yes {
        ui::section("Would delete");
        ui::plan(&outcome.planned);
        println!();
        ui::dim("Run with --yes to delete these resources");
        return Ok(super::exit_status(&outcome.report));
    }

    super::print_summary(&outcome.report);
    if !outcome.report.is_success() {
        return Ok(super::exit_status(&outcome.report));
    }
    registry.delete_instance_group(&args.cluster, &args.name)?;
    ui::success(&format!("Deleted instance group {}", args.name));
    Ok(0)
}

// ============================================================================
// Federation
// ============================================================================

pub fn delete_federation(registry: &Registry, args: &DeleteFederationArgs) -> Result<u8> {
    if !args.unregister {
        bail!("federation deletion only supports --unregister; federated control planes are removed with their clusters");
    }
    if registry.read_federation(&args.name)?.is_none() {
        bail!("federation {:?} not found", args.name);
    }
    if !args.yes && !super::confirm(&format!("Unregister federation {}?", args.name))? {
        ui::info("Cancelled");
        return Ok(0);
    }
    registry.delete_federation(&args.name)?;
    ui::success(&format!("Unregistered federation {}", args.name));
    Ok(0)
}
