//! Provider bindings behind the engine's [`Cloud`] facade
//!
//! Tasks reach the concrete facade through `cloud_as::<AwsCloud>()` or
//! `cloud_as::<GceCloud>()`; provider calls go through the [`aws::Ec2Api`] and
//! [`gce::ComputeApi`] traits. AWS is reached through the `aws` CLI, GCE
//! through its REST API; tests substitute in-memory fakes.

pub mod aws;
pub mod aws_cli;
pub mod compute;
pub mod gce;
pub mod gce_rest;
#[cfg(test)]
pub mod mock;

use crate::api::{CloudProvider, Cluster};
use anyhow::{Context, Result};
use aws::AwsCloud;
use aws_cli::AwsCli;
use gce::GceCloud;
use gce_rest::RestCompute;
use std::sync::Arc;
use taskgraph::Cloud;

/// A provider facade and whether it can reach the provider
pub struct Connection {
    pub cloud: Arc<dyn Cloud>,
    pub online: bool,
}

/// Build the facade for a cluster from the ambient credentials
pub fn connect(cluster: &Cluster) -> Result<Connection> {
    let provider = cluster
        .spec
        .cloud_provider
        .context("cluster has no cloudProvider")?;
    let region = cluster
        .region()
        .with_context(|| format!("cannot determine the region of cluster {}", cluster.name()))?;
    let labels = cluster.spec.cloud_labels.clone();

    let connection = match provider {
        CloudProvider::Aws => match AwsCli::detect(&region) {
            Some(cli) => {
                log::debug!("using AWS CLI at {}", cli.program().display());
                Connection {
                    cloud: Arc::new(AwsCloud::new(&region, labels, Arc::new(cli))),
                    online: true,
                }
            }
            None => {
                log::info!(
                    "aws CLI not found and {} is not set; AWS objects are rendered offline",
                    aws_cli::CLI_ENV
                );
                Connection {
                    cloud: Arc::new(AwsCloud::offline(&region, labels)),
                    online: false,
                }
            }
        },
        CloudProvider::Gce => {
            let project = cluster
                .spec
                .project
                .as_deref()
                .context("GCE cluster has no project")?;
            match RestCompute::from_env() {
                Some(rest) => Connection {
                    cloud: Arc::new(GceCloud::new(project, &region, labels, Arc::new(rest))),
                    online: true,
                },
                None => {
                    log::info!(
                        "{} is not set; GCE objects are rendered offline",
                        gce_rest::TOKEN_ENV
                    );
                    Connection {
                        cloud: Arc::new(GceCloud::offline(project, &region, labels)),
                        online: false,
                    }
                }
            }
        }
    };
    Ok(connection)
}
