use anyhow::Result;
use std::time::Duration;
use taskgraph::Mode;

use crate::Context;
use crate::apply::{self, LoadedCluster, RunOptions, TargetKind};
use crate::cli::{TargetArg, UpdateClusterArgs, UpdateCommand};
use crate::cloud::{self, Connection};
use crate::config::Config;
use crate::registry::Registry;
use crate::ui;

pub fn run(ctx: &Context, cmd: UpdateCommand) -> Result<u8> {
    let registry = ctx.registry()?;
    match cmd {
        UpdateCommand::Cluster(args) => {
            let cluster = registry.get_cluster(&args.name)?;
            let connection = cloud::connect(&cluster)?;
            update_cluster(&registry, &args, &connection, &ctx.config, ctx.quiet)
        }
    }
}

/// Without `--yes` every target is previewed as a dry run
fn target_for(args: &UpdateClusterArgs, config: &Config) -> TargetKind {
    if !args.yes {
        return TargetKind::DryRun;
    }
    match args.target {
        TargetArg::Direct => TargetKind::Direct,
        TargetArg::Terraform => TargetKind::Terraform(config.out_dir(args.out.as_deref(), &args.name)),
        TargetArg::DryRun => TargetKind::DryRun,
    }
}

pub fn update_cluster(
    registry: &Registry,
    args: &UpdateClusterArgs,
    connection: &Connection,
    config: &Config,
    quiet: bool,
) -> Result<u8> {
    ui::header(&format!("Updating Cluster: {}", args.name));

    let loaded = LoadedCluster::load(registry, &args.name)?;
    let graph = apply::build_graph(&loaded.model(connection))?;

    let target = target_for(args, config);
    let opts = RunOptions {
        target: target.clone(),
        mode: Mode::Apply,
        jobs: config.jobs(args.jobs),
        timeout: args.timeout.map(Duration::from_secs),
        max_task_duration: config.max_task_duration(),
        quiet,
    };
    ui::kv("Tasks", &graph.len().to_string());
    ui::kv(
        "Target",
        match &target {
            TargetKind::Direct => "direct",
            TargetKind::Terraform(_) => "terraform",
            TargetKind::DryRun => "dry-run",
        },
    );

    let outcome = apply::run(&graph, &loaded.cluster, connection, &opts)?;

    match &target {
        TargetKind::DryRun => {
            ui::section("Plan");
            ui::plan(&outcome.planned);
            if !args.yes {
                println!();
                ui::dim("Run with --yes to apply these changes");
            }
        }
        TargetKind::Terraform(dir) => {
            if let Some(tf) = &outcome.terraform {
                match &tf.previous {
                    Some(previous) if tf.changed() => {
                        ui::section("Changes to kubernetes.tf");
                        ui::text_diff(previous, &tf.current);
                    }
                    Some(_) => ui::info("Terraform output unchanged"),
                    None => ui::info("Wrote new terraform output"),
                }
                ui::kv("Output", &tf.main_path.display().to_string());
                ui::dim(&format!("Run 'terraform apply' in {}", dir.display()));
            }
        }
        TargetKind::Direct => {
            ui::section("Changes");
            ui::report_changes(&outcome.report);
        }
    }

    super::print_summary(&outcome.report);
    Ok(super::exit_status(&outcome.report))
}
