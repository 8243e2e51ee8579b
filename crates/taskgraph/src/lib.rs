//! # Taskgraph
//!
//! A reconciliation engine for cloud resources.
//!
//! Model builders declare the expected state as typed resources. The
//! engine links them into a graph through their references, then walks the
//! graph: for each task it finds the actual object, computes the field-level
//! changes, validates them and renders them to the active target.
//!
//! ## Core Concepts
//!
//! - **Resource**: A typed cloud object description, implementing find / check / render
//! - **Task**: The object-safe view of a resource stored in the graph
//! - **Changes**: Field-by-field delta between expected and actual
//! - **Graph**: DAG of tasks, built from [`TaskKey`] references
//! - **Target**: Where rendering goes: the cloud API, Terraform JSON, or a dry-run plan
//! - **Executor**: Runs the graph on a bounded worker pool with retries
//!
//! ## Example
//!
//! ```ignore
//! use taskgraph::{
//!     CancelToken, ExecContext, ExecuteOptions, Graph, ModelContext, NoProgress,
//!     Target, DryRunTarget, execute,
//! };
//!
//! let mut model = ModelContext::new();
//! let vpc = model.add(Vpc::new("ex.com", "10.0.0.0/16"))?;
//! model.add(Subnet::new("us-east-1a.ex.com", &vpc, "10.0.32.0/19"))?;
//!
//! let graph = Graph::build(model)?;
//! let ctx = ExecContext::new(cloud, CancelToken::new());
//! let target = Target::DryRun(DryRunTarget::new());
//! let report = execute(&graph, &target, &ctx, &ExecuteOptions::default(), &mut NoProgress)?;
//! println!("{}", report.summary_line());
//! ```
//!
//! ## Provider Traits
//!
//! - [`Cloud`]: Capability set every provider binding offers
//! - [`ModelBuilder`]: Translates part of a cluster description into tasks
//! - [`ProgressCallback`]: Receives progress updates
//!
//! The engine has no dependency on any provider SDK or UI.

pub mod cancel;
pub mod cloud;
pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod report;
pub mod resource;
pub mod retry;
pub mod target;
pub mod terraform;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use cancel::CancelToken;
pub use cloud::{Cloud, DnsProvider, ProviderId, SubnetInfo, VpcInfo};
pub use context::{ExecContext, ModelBuilder, ModelContext, NoProgress, ProgressCallback, build_model};
pub use diff::{Changes, FieldPolicy};
pub use error::{Error, ErrorCategory, Result};
pub use executor::execute;
pub use graph::Graph;
pub use report::{ExecuteSummary, Report, ReportEntry};
pub use resource::{Actual, Resource, Task};
pub use retry::{RetryConfig, poll_until};
pub use target::{DirectTarget, DryRunTarget, PlannedChange, Target};
pub use terraform::{Literal, TerraformOutput, TerraformTarget, tf_name};
pub use types::{Action, ExecuteOptions, Mode, Observed, TaskKey, TaskState};
pub use value::{Blob, short_digest};
