use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "clusterup")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative Kubernetes cluster provisioning for AWS and GCE", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration store (file:// path, mem://, s3:// or gs://)
    #[arg(long, global = true, env = "CLUSTERUP_STATE_STORE")]
    pub state: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register clusters, instance groups or federations
    Create(CreateArgs),

    /// Converge the cloud to a registered cluster
    #[command(subcommand)]
    Update(UpdateCommand),

    /// Remove clusters, instance groups or federations
    #[command(subcommand)]
    Delete(DeleteCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Create
// ============================================================================

#[derive(Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct CreateArgs {
    /// Document file(s) or URL(s) to create from
    #[arg(short, long = "filename")]
    pub filenames: Vec<String>,

    #[command(subcommand)]
    pub command: Option<CreateCommand>,
}

#[derive(Subcommand)]
pub enum CreateCommand {
    /// Create a cluster and its default instance groups from a template
    Cluster(CreateClusterArgs),

    /// Add an instance group to a cluster
    #[command(alias = "ig")]
    Instancegroup(CreateInstanceGroupArgs),

    /// Join clusters under a federation
    Federation(CreateFederationArgs),
}

#[derive(Args)]
pub struct CreateClusterArgs {
    /// Cluster name (a DNS name, e.g. k8s.example.com)
    pub name: String,

    /// Cloud provider
    #[arg(long, value_enum)]
    pub cloud: CloudArg,

    /// Zones to run in, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub zones: Vec<String>,

    /// Network CIDR; zone subnets are carved from it
    #[arg(long)]
    pub network_cidr: Option<String>,

    /// Adopt an existing VPC instead of creating one
    #[arg(long)]
    pub vpc: Option<String>,

    /// GCE project
    #[arg(long)]
    pub project: Option<String>,

    /// Overlay networks, comma separated
    #[arg(long, value_enum, value_delimiter = ',', default_value = "kubenet")]
    pub networking: Vec<NetworkingArg>,

    /// Node count
    #[arg(long, default_value = "2")]
    pub node_count: u32,

    /// Channel document to take images and defaults from
    #[arg(long)]
    pub channel: Option<String>,

    /// Open the generated documents in $EDITOR before storing them
    #[arg(long)]
    pub edit: bool,
}

#[derive(Args)]
pub struct CreateInstanceGroupArgs {
    /// Instance group name
    pub name: String,

    /// Cluster the group belongs to
    #[arg(long)]
    pub cluster: String,

    /// Role of the group's instances
    #[arg(long, value_enum, default_value = "node")]
    pub role: RoleArg,

    /// Open the generated document in $EDITOR before storing it
    #[arg(long)]
    pub edit: bool,
}

#[derive(Args)]
pub struct CreateFederationArgs {
    /// Federation name
    pub name: String,

    /// Clusters hosting the federation controllers, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub controllers: Vec<String>,

    /// Member clusters, comma separated
    #[arg(long, value_delimiter = ',')]
    pub members: Vec<String>,

    /// DNS name the federation is served under
    #[arg(long)]
    pub dns_name: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CloudArg {
    Aws,
    Gce,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NetworkingArg {
    Kubenet,
    Kopeio,
    Weave,
    Flannel,
    Calico,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Master,
    Node,
    Bastion,
}

// ============================================================================
// Update
// ============================================================================

#[derive(Subcommand)]
pub enum UpdateCommand {
    /// Build the cluster's task graph and execute it
    Cluster(UpdateClusterArgs),
}

#[derive(Args)]
pub struct UpdateClusterArgs {
    /// Cluster name
    pub name: String,

    /// Where changes go
    #[arg(long, value_enum, default_value = "direct")]
    pub target: TargetArg,

    /// Apply changes; without it, only print the plan
    #[arg(short, long)]
    pub yes: bool,

    /// Output directory for the terraform target
    #[arg(long)]
    pub out: Option<String>,

    /// Number of tasks run in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    Direct,
    Terraform,
    DryRun,
}

// ============================================================================
// Delete
// ============================================================================

#[derive(Subcommand)]
pub enum DeleteCommand {
    /// Delete a cluster's cloud resources and its documents
    Cluster(DeleteClusterArgs),

    /// Delete one instance group's resources and document
    #[command(alias = "ig")]
    Instancegroup(DeleteInstanceGroupArgs),

    /// Remove a federation's registration
    Federation(DeleteFederationArgs),
}

#[derive(Args)]
pub struct DeleteClusterArgs {
    /// Cluster name
    pub name: String,

    /// Actually delete; without it, list what would be deleted
    #[arg(short, long)]
    pub yes: bool,

    /// Only remove the cluster from the store, leaving cloud resources
    #[arg(long)]
    pub unregister: bool,

    /// Number of tasks run in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct DeleteInstanceGroupArgs {
    /// Instance group name
    pub name: String,

    /// Cluster the group belongs to
    #[arg(long)]
    pub cluster: String,

    /// Actually delete; without it, list what would be deleted
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct DeleteFederationArgs {
    /// Federation name
    pub name: String,

    /// Remove the registration only (the only supported mode)
    #[arg(long)]
    pub unregister: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}
