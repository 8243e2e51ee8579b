//! In-memory provider APIs with call counting and scripted failures

use super::aws::{
    AutoscalingGroup, Ec2Api, IpPermission, LaunchConfiguration, SecurityGroup, Subnet, Tags, Vpc,
};
use super::compute::{InstanceGroupManager, InstanceTemplate, Network, Operation, Subnetwork};
use super::gce::{ComputeApi, OpScope, instance_template_url, network_url, subnetwork_url};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use taskgraph::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Transient,
    Permanent,
}

/// Shared bookkeeping for both mocks
#[derive(Default)]
struct Calls {
    reads: AtomicUsize,
    writes: AtomicUsize,
    next_id: AtomicUsize,
    pending_polls: AtomicUsize,
    faults: Mutex<HashMap<String, VecDeque<Fault>>>,
}

impl Calls {
    fn check(&self, op: &str) -> Result<()> {
        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        match fault {
            None => Ok(()),
            Some(Fault::Transient) => Err(Error::transient(format!("{op}: RequestLimitExceeded"))),
            Some(Fault::Permanent) => Err(Error::permanent(format!("{op}: UnauthorizedOperation"))),
        }
    }

    fn read(&self, op: &str) -> Result<()> {
        self.check(op)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, op: &str) -> Result<()> {
        self.check(op)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Consume one pending poll; true while the object is still settling
    fn still_pending(&self) -> bool {
        self.pending_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

macro_rules! counters {
    () => {
        /// Fail the next calls of `op` (a method name), one fault per call
        pub fn inject(&self, op: &str, faults: &[Fault]) {
            self.calls
                .faults
                .lock()
                .unwrap()
                .entry(op.to_string())
                .or_default()
                .extend(faults.iter().copied());
        }

        /// Report the next `n` status polls as still in progress
        pub fn set_pending_polls(&self, n: usize) {
            self.calls.pending_polls.store(n, Ordering::SeqCst);
        }

        pub fn reads(&self) -> usize {
            self.calls.reads.load(Ordering::SeqCst)
        }

        pub fn writes(&self) -> usize {
            self.calls.writes.load(Ordering::SeqCst)
        }

        pub fn reset_counts(&self) {
            self.calls.reads.store(0, Ordering::SeqCst);
            self.calls.writes.store(0, Ordering::SeqCst);
        }
    };
}

// ============================================================================
// EC2
// ============================================================================

#[derive(Default)]
struct Ec2State {
    vpcs: BTreeMap<String, Vpc>,
    subnets: BTreeMap<String, Subnet>,
    groups: BTreeMap<String, SecurityGroup>,
    launch_configs: BTreeMap<String, LaunchConfiguration>,
    autoscaling: BTreeMap<String, AutoscalingGroup>,
    hosted_zones: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct MockEc2 {
    calls: Calls,
    state: Mutex<Ec2State>,
}

impl MockEc2 {
    counters!();

    fn state(&self) -> MutexGuard<'_, Ec2State> {
        self.state.lock().unwrap()
    }

    pub fn vpc_count(&self) -> usize {
        self.state().vpcs.len()
    }

    pub fn security_group(&self, name: &str) -> Option<SecurityGroup> {
        self.state().groups.values().find(|g| g.name == name).cloned()
    }

    pub fn autoscaling_group(&self, name: &str) -> Option<AutoscalingGroup> {
        self.state().autoscaling.get(name).cloned()
    }

    pub fn launch_configuration_names(&self) -> Vec<String> {
        self.state().launch_configs.keys().cloned().collect()
    }

    pub fn object_count(&self) -> usize {
        let s = self.state();
        s.vpcs.len() + s.subnets.len() + s.groups.len() + s.launch_configs.len() + s.autoscaling.len()
    }

    pub fn add_hosted_zone(&self, domain: &str, id: &str) {
        self.state()
            .hosted_zones
            .insert(domain.to_string(), id.to_string());
    }

    fn state_for_poll(&self) -> &'static str {
        if self.calls.still_pending() {
            "pending"
        } else {
            "available"
        }
    }
}

impl Ec2Api for MockEc2 {
    fn find_vpc(&self, name: &str) -> Result<Option<Vpc>> {
        self.calls.read("find_vpc")?;
        Ok(self
            .state()
            .vpcs
            .values()
            .find(|v| v.tags.get("Name").map(String::as_str) == Some(name))
            .cloned())
    }

    fn get_vpc(&self, id: &str) -> Result<Option<Vpc>> {
        self.calls.read("get_vpc")?;
        let state = self.state_for_poll();
        Ok(self.state().vpcs.get(id).cloned().map(|mut v| {
            v.state = state.to_string();
            v
        }))
    }

    fn create_vpc(&self, cidr: &str, tags: &Tags) -> Result<Vpc> {
        self.calls.write("create_vpc")?;
        let vpc = Vpc {
            id: self.calls.id("vpc"),
            cidr: cidr.to_string(),
            state: "pending".to_string(),
            tags: tags.clone(),
        };
        self.state().vpcs.insert(vpc.id.clone(), vpc.clone());
        Ok(vpc)
    }

    fn delete_vpc(&self, id: &str) -> Result<()> {
        self.calls.write("delete_vpc")?;
        let mut state = self.state();
        if state.subnets.values().any(|s| s.vpc_id == id) || state.groups.values().any(|g| g.vpc_id == id) {
            return Err(Error::permanent(format!("DependencyViolation: {id} has dependencies")));
        }
        state.vpcs.remove(id);
        Ok(())
    }

    fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>> {
        self.calls.read("list_subnets")?;
        let state = self.state_for_poll();
        Ok(self
            .state()
            .subnets
            .values()
            .filter(|s| s.vpc_id == vpc_id)
            .cloned()
            .map(|mut s| {
                s.state = state.to_string();
                s
            })
            .collect())
    }

    fn create_subnet(&self, vpc_id: &str, zone: &str, cidr: &str, tags: &Tags) -> Result<Subnet> {
        self.calls.write("create_subnet")?;
        let subnet = Subnet {
            id: self.calls.id("subnet"),
            vpc_id: vpc_id.to_string(),
            zone: zone.to_string(),
            cidr: cidr.to_string(),
            state: "pending".to_string(),
            tags: tags.clone(),
        };
        self.state()
            .subnets
            .insert(subnet.id.clone(), subnet.clone());
        Ok(subnet)
    }

    fn delete_subnet(&self, id: &str) -> Result<()> {
        self.calls.write("delete_subnet")?;
        self.state().subnets.remove(id);
        Ok(())
    }

    fn create_tags(&self, id: &str, tags: &Tags) -> Result<()> {
        self.calls.write("create_tags")?;
        let mut state = self.state();
        if let Some(vpc) = state.vpcs.get_mut(id) {
            vpc.tags.extend(tags.clone());
        } else if let Some(subnet) = state.subnets.get_mut(id) {
            subnet.tags.extend(tags.clone());
        } else if let Some(group) = state.groups.get_mut(id) {
            group.tags.extend(tags.clone());
        }
        Ok(())
    }

    fn find_security_group(&self, vpc_id: &str, name: &str) -> Result<Option<SecurityGroup>> {
        self.calls.read("find_security_group")?;
        Ok(self
            .state()
            .groups
            .values()
            .find(|g| g.vpc_id == vpc_id && g.name == name)
            .cloned())
    }

    fn get_security_group(&self, id: &str) -> Result<Option<SecurityGroup>> {
        self.calls.read("get_security_group")?;
        Ok(self.state().groups.get(id).cloned())
    }

    fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
        tags: &Tags,
    ) -> Result<String> {
        self.calls.write("create_security_group")?;
        let id = self.calls.id("sg");
        self.state().groups.insert(
            id.clone(),
            SecurityGroup {
                id: id.clone(),
                name: name.to_string(),
                description: description.to_string(),
                vpc_id: vpc_id.to_string(),
                tags: tags.clone(),
                ingress: Vec::new(),
                // New groups allow all egress, as EC2 does
                egress: vec![IpPermission {
                    protocol: "-1".into(),
                    from_port: None,
                    to_port: None,
                    cidr: Some("0.0.0.0/0".into()),
                    source_group_id: None,
                }],
            },
        );
        Ok(id)
    }

    fn delete_security_group(&self, id: &str) -> Result<()> {
        self.calls.write("delete_security_group")?;
        self.state().groups.remove(id);
        Ok(())
    }

    fn authorize(&self, group_id: &str, egress: bool, permission: &IpPermission) -> Result<()> {
        self.calls.write("authorize")?;
        let mut state = self.state();
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Error::NotFound(format!("security group {group_id}")))?;
        let rules = if egress { &mut group.egress } else { &mut group.ingress };
        if rules.contains(permission) {
            return Err(Error::permanent("InvalidPermission.Duplicate"));
        }
        rules.push(permission.clone());
        Ok(())
    }

    fn revoke(&self, group_id: &str, egress: bool, permission: &IpPermission) -> Result<()> {
        self.calls.write("revoke")?;
        let mut state = self.state();
        if let Some(group) = state.groups.get_mut(group_id) {
            let rules = if egress { &mut group.egress } else { &mut group.ingress };
            rules.retain(|r| r != permission);
        }
        Ok(())
    }

    fn list_launch_configurations(&self, prefix: &str) -> Result<Vec<LaunchConfiguration>> {
        self.calls.read("list_launch_configurations")?;
        Ok(self
            .state()
            .launch_configs
            .values()
            .filter(|c| c.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn create_launch_configuration(&self, config: &LaunchConfiguration) -> Result<()> {
        self.calls.write("create_launch_configuration")?;
        self.state()
            .launch_configs
            .insert(config.name.clone(), config.clone());
        Ok(())
    }

    fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        self.calls.write("delete_launch_configuration")?;
        let mut state = self.state();
        if let Some(group) = state
            .autoscaling
            .values()
            .find(|g| g.launch_configuration_name == name)
        {
            return Err(Error::permanent(format!(
                "ResourceInUse: launch configuration {name} is attached to {}",
                group.name
            )));
        }
        state.launch_configs.remove(name);
        Ok(())
    }

    fn find_autoscaling_group(&self, name: &str) -> Result<Option<AutoscalingGroup>> {
        self.calls.read("find_autoscaling_group")?;
        Ok(self.state().autoscaling.get(name).cloned())
    }

    fn create_autoscaling_group(&self, group: &AutoscalingGroup) -> Result<()> {
        self.calls.write("create_autoscaling_group")?;
        self.state()
            .autoscaling
            .insert(group.name.clone(), group.clone());
        Ok(())
    }

    fn update_autoscaling_group(&self, group: &AutoscalingGroup) -> Result<()> {
        self.calls.write("update_autoscaling_group")?;
        self.state()
            .autoscaling
            .insert(group.name.clone(), group.clone());
        Ok(())
    }

    fn delete_autoscaling_group(&self, name: &str) -> Result<()> {
        self.calls.write("delete_autoscaling_group")?;
        self.state().autoscaling.remove(name);
        Ok(())
    }

    fn find_hosted_zone(&self, domain: &str) -> Result<Option<String>> {
        self.calls.read("find_hosted_zone")?;
        Ok(self.state().hosted_zones.get(domain).cloned())
    }
}

// ============================================================================
// Compute
// ============================================================================

#[derive(Default)]
struct ComputeState {
    networks: BTreeMap<String, Network>,
    subnetworks: BTreeMap<(String, String), Subnetwork>,
    templates: BTreeMap<String, InstanceTemplate>,
    managers: BTreeMap<(String, String), InstanceGroupManager>,
    operations: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct MockCompute {
    calls: Calls,
    state: Mutex<ComputeState>,
}

impl MockCompute {
    counters!();

    fn state(&self) -> MutexGuard<'_, ComputeState> {
        self.state.lock().unwrap()
    }

    pub fn template(&self, name: &str) -> Option<InstanceTemplate> {
        self.state().templates.get(name).cloned()
    }

    pub fn manager(&self, zone: &str, name: &str) -> Option<InstanceGroupManager> {
        self.state()
            .managers
            .get(&(zone.to_string(), name.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        let s = self.state();
        s.networks.len() + s.subnetworks.len() + s.templates.len() + s.managers.len()
    }

    fn operation(&self, target_link: String) -> Operation {
        let name = self.calls.id("operation");
        let pending = self.calls.pending_polls.load(Ordering::SeqCst);
        self.state().operations.insert(name.clone(), pending);
        Operation {
            name,
            status: if pending > 0 { "PENDING" } else { "DONE" }.to_string(),
            error: None,
            target_link: Some(target_link),
        }
    }
}

impl ComputeApi for MockCompute {
    fn get_network(&self, _project: &str, name: &str) -> Result<Option<Network>> {
        self.calls.read("get_network")?;
        Ok(self.state().networks.get(name).cloned())
    }

    fn insert_network(&self, project: &str, network: &Network) -> Result<Operation> {
        self.calls.write("insert_network")?;
        let link = network_url(project, &network.name);
        let mut stored = network.clone();
        stored.self_link = Some(link.clone());
        self.state()
            .networks
            .insert(network.name.clone(), stored);
        Ok(self.operation(link))
    }

    fn delete_network(&self, project: &str, name: &str) -> Result<Operation> {
        self.calls.write("delete_network")?;
        self.state().networks.remove(name);
        Ok(self.operation(network_url(project, name)))
    }

    fn get_subnetwork(
        &self,
        _project: &str,
        region: &str,
        name: &str,
    ) -> Result<Option<Subnetwork>> {
        self.calls.read("get_subnetwork")?;
        Ok(self
            .state()
            .subnetworks
            .get(&(region.to_string(), name.to_string()))
            .cloned())
    }

    fn insert_subnetwork(
        &self,
        project: &str,
        region: &str,
        subnetwork: &Subnetwork,
    ) -> Result<Operation> {
        self.calls.write("insert_subnetwork")?;
        let link = subnetwork_url(project, region, &subnetwork.name);
        let mut stored = subnetwork.clone();
        stored.self_link = Some(link.clone());
        stored.region = Some(region.to_string());
        self.state()
            .subnetworks
            .insert((region.to_string(), subnetwork.name.clone()), stored);
        Ok(self.operation(link))
    }

    fn delete_subnetwork(&self, project: &str, region: &str, name: &str) -> Result<Operation> {
        self.calls.write("delete_subnetwork")?;
        self.state()
            .subnetworks
            .remove(&(region.to_string(), name.to_string()));
        Ok(self.operation(subnetwork_url(project, region, name)))
    }

    fn get_instance_template(&self, _project: &str, name: &str) -> Result<Option<InstanceTemplate>> {
        self.calls.read("get_instance_template")?;
        Ok(self.state().templates.get(name).cloned())
    }

    fn insert_instance_template(
        &self,
        project: &str,
        template: &InstanceTemplate,
    ) -> Result<Operation> {
        self.calls.write("insert_instance_template")?;
        let link = instance_template_url(project, &template.name);
        let mut stored = template.clone();
        stored.self_link = Some(link.clone());
        self.state()
            .templates
            .insert(template.name.clone(), stored);
        Ok(self.operation(link))
    }

    fn delete_instance_template(&self, project: &str, name: &str) -> Result<Operation> {
        self.calls.write("delete_instance_template")?;
        self.state().templates.remove(name);
        Ok(self.operation(instance_template_url(project, name)))
    }

    fn get_instance_group_manager(
        &self,
        _project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Option<InstanceGroupManager>> {
        self.calls.read("get_instance_group_manager")?;
        Ok(self.manager(zone, name))
    }

    fn insert_instance_group_manager(
        &self,
        _project: &str,
        zone: &str,
        manager: &InstanceGroupManager,
    ) -> Result<Operation> {
        self.calls.write("insert_instance_group_manager")?;
        let mut stored = manager.clone();
        stored.zone = Some(zone.to_string());
        self.state()
            .managers
            .insert((zone.to_string(), manager.name.clone()), stored);
        Ok(self.operation(manager.name.clone()))
    }

    fn set_instance_template(
        &self,
        _project: &str,
        zone: &str,
        name: &str,
        template_url: &str,
    ) -> Result<Operation> {
        self.calls.write("set_instance_template")?;
        if let Some(m) = self
            .state()
            .managers
            .get_mut(&(zone.to_string(), name.to_string()))
        {
            m.instance_template = template_url.to_string();
        }
        Ok(self.operation(name.to_string()))
    }

    fn resize(&self, _project: &str, zone: &str, name: &str, size: u32) -> Result<Operation> {
        self.calls.write("resize")?;
        if let Some(m) = self
            .state()
            .managers
            .get_mut(&(zone.to_string(), name.to_string()))
        {
            m.target_size = size;
        }
        Ok(self.operation(name.to_string()))
    }

    fn delete_instance_group_manager(
        &self,
        _project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Operation> {
        self.calls.write("delete_instance_group_manager")?;
        self.state()
            .managers
            .remove(&(zone.to_string(), name.to_string()));
        Ok(self.operation(name.to_string()))
    }

    fn get_operation(&self, _project: &str, _scope: &OpScope, name: &str) -> Result<Operation> {
        self.calls.check("get_operation")?;
        let mut state = self.state();
        let remaining = state
            .operations
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("operation {name}")))?;
        *remaining = remaining.saturating_sub(1);
        Ok(Operation {
            name: name.to_string(),
            status: if *remaining > 0 { "RUNNING" } else { "DONE" }.to_string(),
            error: None,
            target_link: None,
        })
    }

    fn find_managed_zone(&self, _project: &str, _dns_name: &str) -> Result<Option<String>> {
        self.calls.read("find_managed_zone")?;
        Ok(None)
    }
}
