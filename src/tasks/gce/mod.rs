//! GCE task catalog

mod instance_template;
mod managed_instance_group;
mod network;
mod subnet;

pub use instance_template::InstanceTemplate;
pub use managed_instance_group::ManagedInstanceGroup;
pub use network::Network;
pub use subnet::Subnet;
