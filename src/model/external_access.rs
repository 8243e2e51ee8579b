use super::ClusterModel;
use crate::api::Role;
use crate::tasks::aws::SecurityGroupRule;
use taskgraph::{ModelBuilder, ModelContext, Result};

/// Rules admitting SSH and API traffic from the configured CIDRs
pub struct ExternalAccessModelBuilder<'a> {
    pub model: &'a ClusterModel<'a>,
}

/// `10.0.0.0/8` → `10-0-0-0-8`
fn name_safe(cidr: &str) -> String {
    cidr.replace(['/', '.'], "-")
}

impl ModelBuilder for ExternalAccessModelBuilder<'_> {
    fn build(&self, ctx: &mut ModelContext) -> Result<()> {
        let model = self.model;

        // With a bastion, SSH reaches the cluster only through it
        let ssh_roles: &[Role] = if model.has_bastion() {
            &[Role::Bastion]
        } else {
            &[Role::Master, Role::Node]
        };
        for cidr in model.cluster.ssh_access() {
            for role in ssh_roles {
                let name = format!("ssh-external-to-{}-{}", role.as_str(), name_safe(&cidr));
                ctx.add(
                    SecurityGroupRule::ingress(&name, &model.link_to_security_group(*role))
                        .cidr(&cidr)
                        .port("tcp", 22),
                )?;
            }
        }

        let masters = model.link_to_security_group(Role::Master);
        for cidr in model.cluster.api_access() {
            let name = format!("https-external-to-master-{}", name_safe(&cidr));
            ctx.add(
                SecurityGroupRule::ingress(&name, &masters)
                    .cidr(&cidr)
                    .port("tcp", 443),
            )?;
        }
        Ok(())
    }
}
