use super::ClusterModel;
use crate::api::{Networking, Overlays, Role};
use crate::tasks::aws::{SecurityGroup, SecurityGroupRule};
use taskgraph::{ModelBuilder, ModelContext, Result};

const ANYWHERE: &str = "0.0.0.0/0";

/// IP protocol number of IP-in-IP encapsulation
const PROTOCOL_IPIP: u8 = 4;

/// Ports and protocols nodes need open on the masters
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NodeToMaster {
    pub tcp: Vec<u16>,
    pub udp: Vec<u16>,
    pub protocols: Vec<u8>,
}

fn add_unique<T: PartialEq>(list: &mut Vec<T>, items: impl IntoIterator<Item = T>) {
    for item in items {
        if !list.contains(&item) {
            list.push(item);
        }
    }
}

impl NodeToMaster {
    /// The API server and cadvisor, plus the union of what each overlay needs
    pub fn for_networking(overlays: &Overlays) -> Self {
        let mut ports = Self {
            tcp: vec![443, 4194],
            ..Self::default()
        };
        for networking in overlays.iter() {
            match networking {
                Networking::Kubenet => {}
                // VXLAN
                Networking::Kopeio => add_unique(&mut ports.udp, [4789]),
                Networking::Weave => {
                    add_unique(&mut ports.tcp, [6783]);
                    add_unique(&mut ports.udp, [6783, 6784]);
                }
                Networking::Flannel => add_unique(&mut ports.udp, [8285]),
                Networking::Calico => {
                    log::warn!(
                        "opening the etcd port on masters to nodes for calico; this is unsafe on untrusted networks"
                    );
                    add_unique(&mut ports.tcp, [4001, 179]);
                    add_unique(&mut ports.protocols, [PROTOCOL_IPIP]);
                }
            }
        }
        ports
    }
}

fn protocol_name(protocol: u8) -> String {
    match protocol {
        PROTOCOL_IPIP => "ipip".to_string(),
        other => {
            log::warn!("unknown protocol {other}, naming its rule by number");
            other.to_string()
        }
    }
}

/// Security groups per role and the rules between them
pub struct FirewallModelBuilder<'a> {
    pub model: &'a ClusterModel<'a>,
}

impl ModelBuilder for FirewallModelBuilder<'_> {
    fn build(&self, ctx: &mut ModelContext) -> Result<()> {
        self.build_node_rules(ctx)?;
        self.build_master_rules(ctx)?;
        if self.model.has_bastion() {
            self.build_bastion_rules(ctx)?;
        }
        Ok(())
    }
}

impl FirewallModelBuilder<'_> {
    fn add_group(&self, ctx: &mut ModelContext, role: Role, description: &str) -> Result<()> {
        let model = self.model;
        let name = model.security_group_name(role);
        let tags = model.cloud_tags(&name);
        ctx.add(SecurityGroup::new(&name, &model.link_to_vpc(), description, tags))?;
        Ok(())
    }

    fn build_node_rules(&self, ctx: &mut ModelContext) -> Result<()> {
        let model = self.model;
        let nodes = model.link_to_security_group(Role::Node);
        let masters = model.link_to_security_group(Role::Master);
        self.add_group(ctx, Role::Node, "Security group for nodes")?;

        ctx.add(SecurityGroupRule::egress("node-egress", &nodes).cidr(ANYWHERE))?;
        ctx.add(SecurityGroupRule::ingress("all-node-to-node", &nodes).source_group(&nodes))?;

        let open = NodeToMaster::for_networking(&model.cluster.networking());
        for port in open.udp {
            ctx.add(
                SecurityGroupRule::ingress(&format!("node-to-master-udp-{port}"), &masters)
                    .source_group(&nodes)
                    .port("udp", port),
            )?;
        }
        for port in open.tcp {
            ctx.add(
                SecurityGroupRule::ingress(&format!("node-to-master-tcp-{port}"), &masters)
                    .source_group(&nodes)
                    .port("tcp", port),
            )?;
        }
        for protocol in open.protocols {
            let name = format!("node-to-master-protocol-{}", protocol_name(protocol));
            ctx.add(
                SecurityGroupRule::ingress(&name, &masters)
                    .source_group(&nodes)
                    .protocol(&protocol.to_string()),
            )?;
        }
        Ok(())
    }

    fn build_master_rules(&self, ctx: &mut ModelContext) -> Result<()> {
        let model = self.model;
        let nodes = model.link_to_security_group(Role::Node);
        let masters = model.link_to_security_group(Role::Master);
        self.add_group(ctx, Role::Master, "Security group for masters")?;

        ctx.add(SecurityGroupRule::egress("master-egress", &masters).cidr(ANYWHERE))?;
        ctx.add(
            SecurityGroupRule::ingress("all-master-to-master", &masters).source_group(&masters),
        )?;
        ctx.add(SecurityGroupRule::ingress("all-master-to-node", &nodes).source_group(&masters))?;
        Ok(())
    }

    fn build_bastion_rules(&self, ctx: &mut ModelContext) -> Result<()> {
        let model = self.model;
        let bastion = model.link_to_security_group(Role::Bastion);
        self.add_group(ctx, Role::Bastion, "Security group for bastion")?;

        ctx.add(SecurityGroupRule::egress("bastion-egress", &bastion).cidr(ANYWHERE))?;
        for role in [Role::Master, Role::Node] {
            let name = format!("bastion-to-{}-ssh", role.as_str());
            ctx.add(
                SecurityGroupRule::ingress(&name, &model.link_to_security_group(role))
                    .source_group(&bastion)
                    .port("tcp", 22),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{aws_cluster, groups};
    use taskgraph::TaskKey;

    fn rules(networking: Networking, bastion: bool) -> ModelContext {
        let cluster = aws_cluster(networking);
        let groups = groups(&cluster, bastion);
        let model = ClusterModel::new(&cluster, &groups);
        let mut ctx = ModelContext::new();
        FirewallModelBuilder { model: &model }.build(&mut ctx).unwrap();
        ctx
    }

    /// (protocol, port) pairs opened from nodes to masters
    fn node_to_master(ctx: &ModelContext) -> Vec<(String, Option<u16>)> {
        ctx.keys()
            .iter()
            .filter(|k| k.name.starts_with("node-to-master-"))
            .filter_map(|k| ctx.get::<SecurityGroupRule>(&k.name))
            .map(|r| (r.protocol.clone().unwrap_or_default(), r.from_port))
            .collect()
    }

    #[test]
    fn test_calico_opens_bgp_etcd_and_ipip() {
        let ctx = rules(Networking::Calico, false);
        let mut tcp: Vec<u16> = node_to_master(&ctx)
            .into_iter()
            .filter(|(p, _)| p == "tcp")
            .filter_map(|(_, port)| port)
            .collect();
        tcp.sort_unstable();
        assert_eq!(tcp, vec![179, 443, 4001, 4194]);
        assert!(node_to_master(&ctx).iter().all(|(p, _)| p != "udp"));

        let ipip = ctx.get::<SecurityGroupRule>("node-to-master-protocol-ipip").unwrap();
        assert_eq!(ipip.protocol.as_deref(), Some("4"));
        assert_eq!(ipip.from_port, None);
        assert_eq!(ipip.security_group, TaskKey::new("SecurityGroup", "masters.ex.com"));
        assert_eq!(ipip.source_group, Some(TaskKey::new("SecurityGroup", "nodes.ex.com")));
    }

    #[test]
    fn test_weave_ports() {
        let open = NodeToMaster::for_networking(&Overlays::single(Networking::Weave));
        assert_eq!(open.tcp, vec![443, 4194, 6783]);
        assert_eq!(open.udp, vec![6783, 6784]);
        assert!(open.protocols.is_empty());
    }

    #[test]
    fn test_combined_overlays_union_their_ports() {
        let mut cluster = aws_cluster(Networking::Calico);
        cluster.spec.networking = Some(
            [Networking::Calico, Networking::Flannel, Networking::Weave]
                .into_iter()
                .collect(),
        );
        let groups = groups(&cluster, false);
        let model = ClusterModel::new(&cluster, &groups);
        let mut ctx = ModelContext::new();
        FirewallModelBuilder { model: &model }.build(&mut ctx).unwrap();

        let mut udp: Vec<u16> = node_to_master(&ctx)
            .into_iter()
            .filter(|(p, _)| p == "udp")
            .filter_map(|(_, port)| port)
            .collect();
        udp.sort_unstable();
        assert_eq!(udp, vec![6783, 6784, 8285]);
        assert!(ctx.get::<SecurityGroupRule>("node-to-master-tcp-179").is_some());
        assert!(ctx.get::<SecurityGroupRule>("node-to-master-tcp-6783").is_some());
        assert!(ctx.get::<SecurityGroupRule>("node-to-master-protocol-ipip").is_some());
        let open = NodeToMaster::for_networking(&cluster.networking());
        assert_eq!(open.tcp, vec![443, 4194, 6783, 4001, 179]);
    }

    #[test]
    fn test_kubenet_base_rules() {
        let ctx = rules(Networking::Kubenet, false);
        for name in [
            "node-egress",
            "all-node-to-node",
            "master-egress",
            "all-master-to-master",
            "all-master-to-node",
            "node-to-master-tcp-443",
            "node-to-master-tcp-4194",
        ] {
            assert!(ctx.get::<SecurityGroupRule>(name).is_some(), "missing {name}");
        }
        // two groups, seven rules
        assert_eq!(ctx.len(), 9);
        assert!(ctx.get::<SecurityGroup>("bastion.ex.com").is_none());

        let egress = ctx.get::<SecurityGroupRule>("node-egress").unwrap();
        assert!(egress.egress);
        assert_eq!(egress.cidr.as_deref(), Some(ANYWHERE));
    }

    #[test]
    fn test_bastion_group_and_ssh_rules() {
        let ctx = rules(Networking::Kubenet, true);
        assert!(ctx.get::<SecurityGroup>("bastion.ex.com").is_some());
        let to_master = ctx.get::<SecurityGroupRule>("bastion-to-master-ssh").unwrap();
        assert_eq!(to_master.from_port, Some(22));
        assert_eq!(
            to_master.source_group,
            Some(TaskKey::new("SecurityGroup", "bastion.ex.com"))
        );
        assert!(ctx.get::<SecurityGroupRule>("bastion-to-node-ssh").is_some());
        assert!(ctx.get::<SecurityGroupRule>("bastion-egress").is_some());
    }
}
