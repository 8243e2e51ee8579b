//! EC2, autoscaling and Route53 through the `aws` command line
//!
//! Credentials, profiles and endpoints come from the CLI's own configuration.
//! Every call asks for JSON output; failures are classified from the error
//! code the CLI prints on stderr.

use super::aws::{
    AutoscalingGroup, Ec2Api, IpPermission, LaunchConfiguration, SecurityGroup, Subnet, Tags, Vpc,
};
use crate::tasks::{ignore_not_found, optional};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Command;
use taskgraph::{Error, Result};

/// Path of the `aws` executable, overriding the one found on `PATH`
pub const CLI_ENV: &str = "CLUSTERUP_AWS_CLI";

/// Root device of the supported images
const ROOT_DEVICE: &str = "/dev/xvda";

/// Error codes worth retrying: throttling, eventual consistency, outages
const TRANSIENT_CODES: &[&str] = &[
    "RequestLimitExceeded",
    "Throttling",
    "ThrottlingException",
    "ServiceUnavailable",
    "Unavailable",
    "InternalError",
    "InternalFailure",
    "ResourceInUse",
    "DependencyViolation",
    "IncorrectState",
    "ScalingActivityInProgress",
];

/// The code inside `An error occurred (<code>) when calling ...`
fn error_code(message: &str) -> Option<&str> {
    const MARKER: &str = "An error occurred (";
    let start = message.find(MARKER)? + MARKER.len();
    let len = message[start..].find(')')?;
    Some(&message[start..start + len])
}

/// Map a failed CLI call onto the engine's error categories
pub fn classify(stderr: &str, what: &str) -> Error {
    let message = stderr.trim();
    match error_code(message) {
        Some(code) if code.ends_with("NotFound") => Error::NotFound(format!("{what}: {message}")),
        Some("ValidationError") if message.contains("not found") => {
            Error::NotFound(format!("{what}: {message}"))
        }
        Some(code) if TRANSIENT_CODES.contains(&code) => {
            Error::transient(format!("{what}: {message}"))
        }
        Some(_) => Error::permanent(format!("{what}: {message}")),
        None if message.contains("Could not connect to the endpoint URL")
            || message.contains("Read timeout")
            || message.contains("Connection was closed") =>
        {
            Error::transient(format!("{what}: {message}"))
        }
        None => Error::permanent(format!("{what}: {message}")),
    }
}

pub struct AwsCli {
    program: PathBuf,
    region: String,
}

impl AwsCli {
    pub fn new(program: impl Into<PathBuf>, region: &str) -> Self {
        Self {
            program: program.into(),
            region: region.to_string(),
        }
    }

    /// Binding from [`CLI_ENV`] or `PATH`, `None` when no CLI is installed
    pub fn detect(region: &str) -> Option<Self> {
        let program = match std::env::var_os(CLI_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => which::which("aws").ok()?,
        };
        Some(Self::new(program, region))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `aws <service> <operation> <args>` and parse its JSON output
    fn run(&self, service: &str, operation: &str, args: &[&str]) -> Result<Value> {
        log::trace!("aws {service} {operation} {}", args.join(" "));
        let output = Command::new(&self.program)
            .args([service, operation])
            .args(args)
            .args(["--region", &self.region, "--output", "json"])
            .env("AWS_PAGER", "")
            .output()
            .map_err(|e| {
                Error::permanent(format!("failed to execute {}: {e}", self.program.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify(&stderr, &format!("{service} {operation}")));
        }
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn ec2(&self, operation: &str, args: &[&str]) -> Result<Value> {
        self.run("ec2", operation, args)
    }

    fn autoscaling(&self, operation: &str, args: &[&str]) -> Result<Value> {
        self.run("autoscaling", operation, args)
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagJson {
    key: String,
    value: String,
}

fn tags_of(tags: Vec<TagJson>) -> Tags {
    tags.into_iter().map(|t| (t.key, t.value)).collect()
}

fn tag_list(tags: &Tags) -> Value {
    tags.iter()
        .map(|(k, v)| json!({ "Key": k, "Value": v }))
        .collect()
}

fn tag_specifications(resource_type: &str, tags: &Tags) -> String {
    json!([{ "ResourceType": resource_type, "Tags": tag_list(tags) }]).to_string()
}

fn filters(pairs: &[(&str, &str)]) -> String {
    let filters: Vec<Value> = pairs
        .iter()
        .map(|(name, value)| json!({ "Name": name, "Values": [value] }))
        .collect();
    Value::Array(filters).to_string()
}

/// The list under `field`, empty when the field is absent
fn list<T: DeserializeOwned>(mut response: Value, field: &str) -> Result<Vec<T>> {
    match response.get_mut(field).map(Value::take) {
        Some(items) => Ok(serde_json::from_value(items)?),
        None => Ok(Vec::new()),
    }
}

fn item<T: DeserializeOwned>(mut response: Value, field: &str) -> Result<T> {
    let value = response
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| Error::permanent(format!("response has no {field}")))?;
    Ok(serde_json::from_value(value)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VpcJson {
    vpc_id: String,
    cidr_block: String,
    state: String,
    #[serde(default)]
    tags: Vec<TagJson>,
}

impl From<VpcJson> for Vpc {
    fn from(v: VpcJson) -> Self {
        Self {
            id: v.vpc_id,
            cidr: v.cidr_block,
            state: v.state,
            tags: tags_of(v.tags),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubnetJson {
    subnet_id: String,
    vpc_id: String,
    availability_zone: String,
    cidr_block: String,
    state: String,
    #[serde(default)]
    tags: Vec<TagJson>,
}

impl From<SubnetJson> for Subnet {
    fn from(s: SubnetJson) -> Self {
        Self {
            id: s.subnet_id,
            vpc_id: s.vpc_id,
            zone: s.availability_zone,
            cidr: s.cidr_block,
            state: s.state,
            tags: tags_of(s.tags),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpRangeJson {
    cidr_ip: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupPairJson {
    group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PermissionJson {
    ip_protocol: String,
    from_port: Option<i64>,
    to_port: Option<i64>,
    #[serde(default)]
    ip_ranges: Vec<IpRangeJson>,
    #[serde(default)]
    user_id_group_pairs: Vec<GroupPairJson>,
}

impl PermissionJson {
    /// One [`IpPermission`] per source range or group
    fn flatten(self) -> Vec<IpPermission> {
        let from_port = self.from_port.and_then(|p| u16::try_from(p).ok());
        let to_port = self.to_port.and_then(|p| u16::try_from(p).ok());
        let base = IpPermission {
            protocol: self.ip_protocol,
            from_port,
            to_port,
            cidr: None,
            source_group_id: None,
        };
        let ranges = self.ip_ranges.into_iter().map(|r| IpPermission {
            cidr: Some(r.cidr_ip),
            ..base.clone()
        });
        let pairs = self.user_id_group_pairs.into_iter().map(|p| IpPermission {
            source_group_id: Some(p.group_id),
            ..base.clone()
        });
        ranges.chain(pairs).collect()
    }
}

fn permission_json(permission: &IpPermission) -> String {
    let mut value = json!({ "IpProtocol": permission.protocol });
    if let Some(port) = permission.from_port {
        value["FromPort"] = json!(port);
    }
    if let Some(port) = permission.to_port {
        value["ToPort"] = json!(port);
    }
    if let Some(cidr) = &permission.cidr {
        value["IpRanges"] = json!([{ "CidrIp": cidr }]);
    }
    if let Some(group) = &permission.source_group_id {
        value["UserIdGroupPairs"] = json!([{ "GroupId": group }]);
    }
    json!([value]).to_string()
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroupJson {
    group_id: String,
    group_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    vpc_id: String,
    #[serde(default)]
    tags: Vec<TagJson>,
    #[serde(default)]
    ip_permissions: Vec<PermissionJson>,
    #[serde(default)]
    ip_permissions_egress: Vec<PermissionJson>,
}

impl From<SecurityGroupJson> for SecurityGroup {
    fn from(g: SecurityGroupJson) -> Self {
        Self {
            id: g.group_id,
            name: g.group_name,
            description: g.description,
            vpc_id: g.vpc_id,
            tags: tags_of(g.tags),
            ingress: g.ip_permissions.into_iter().flat_map(PermissionJson::flatten).collect(),
            egress: g
                .ip_permissions_egress
                .into_iter()
                .flat_map(PermissionJson::flatten)
                .collect(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EbsJson {
    volume_size: Option<u32>,
    volume_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockDeviceJson {
    ebs: Option<EbsJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LaunchConfigurationJson {
    launch_configuration_name: String,
    image_id: String,
    instance_type: String,
    #[serde(default)]
    security_groups: Vec<String>,
    user_data: Option<String>,
    #[serde(default)]
    block_device_mappings: Vec<BlockDeviceJson>,
    associate_public_ip_address: Option<bool>,
}

impl From<LaunchConfigurationJson> for LaunchConfiguration {
    fn from(c: LaunchConfigurationJson) -> Self {
        // Described user data is base64; keep the raw text if it is not
        let user_data = c.user_data.filter(|d| !d.is_empty()).map(|encoded| {
            STANDARD
                .decode(&encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or(encoded)
        });
        let root = c.block_device_mappings.into_iter().find_map(|m| m.ebs);
        let mut security_group_ids = c.security_groups;
        security_group_ids.sort();
        Self {
            name: c.launch_configuration_name,
            image_id: c.image_id,
            instance_type: c.instance_type,
            security_group_ids,
            user_data,
            root_volume_size: root.as_ref().and_then(|r| r.volume_size),
            root_volume_type: root.and_then(|r| r.volume_type),
            associate_public_ip: c.associate_public_ip_address.unwrap_or(false),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AutoscalingGroupJson {
    auto_scaling_group_name: String,
    #[serde(default)]
    launch_configuration_name: String,
    min_size: u32,
    max_size: u32,
    #[serde(default, rename = "VPCZoneIdentifier")]
    vpc_zone_identifier: String,
    #[serde(default)]
    tags: Vec<TagJson>,
    /// Set while the group is being deleted
    status: Option<String>,
}

impl From<AutoscalingGroupJson> for AutoscalingGroup {
    fn from(g: AutoscalingGroupJson) -> Self {
        let mut subnet_ids: Vec<String> = g
            .vpc_zone_identifier
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        subnet_ids.sort();
        Self {
            name: g.auto_scaling_group_name,
            launch_configuration_name: g.launch_configuration_name,
            min_size: g.min_size,
            max_size: g.max_size,
            subnet_ids,
            tags: tags_of(g.tags),
        }
    }
}

fn group_tags(name: &str, tags: &Tags) -> String {
    let tags: Vec<Value> = tags
        .iter()
        .map(|(k, v)| {
            json!({
                "ResourceId": name,
                "ResourceType": "auto-scaling-group",
                "Key": k,
                "Value": v,
                "PropagateAtLaunch": true,
            })
        })
        .collect();
    Value::Array(tags).to_string()
}

// ============================================================================
// Ec2Api
// ============================================================================

impl Ec2Api for AwsCli {
    fn find_vpc(&self, name: &str) -> Result<Option<Vpc>> {
        let filters = filters(&[("tag:Name", name)]);
        let response = self.ec2("describe-vpcs", &["--filters", &filters])?;
        let vpcs: Vec<VpcJson> = list(response, "Vpcs")?;
        Ok(vpcs.into_iter().next().map(Vpc::from))
    }

    fn get_vpc(&self, id: &str) -> Result<Option<Vpc>> {
        let Some(response) = optional(self.ec2("describe-vpcs", &["--vpc-ids", id]))? else {
            return Ok(None);
        };
        let vpcs: Vec<VpcJson> = list(response, "Vpcs")?;
        Ok(vpcs.into_iter().next().map(Vpc::from))
    }

    fn create_vpc(&self, cidr: &str, tags: &Tags) -> Result<Vpc> {
        let specs = tag_specifications("vpc", tags);
        let response = self.ec2(
            "create-vpc",
            &["--cidr-block", cidr, "--tag-specifications", &specs],
        )?;
        let vpc: Vpc = item::<VpcJson>(response, "Vpc")?.into();
        // One attribute per call
        for flag in ["--enable-dns-support", "--enable-dns-hostnames"] {
            self.ec2(
                "modify-vpc-attribute",
                &["--vpc-id", &vpc.id, flag, r#"{"Value":true}"#],
            )?;
        }
        Ok(vpc)
    }

    fn delete_vpc(&self, id: &str) -> Result<()> {
        ignore_not_found(self.ec2("delete-vpc", &["--vpc-id", id]).map(|_| ()))
    }

    fn list_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>> {
        let filters = filters(&[("vpc-id", vpc_id)]);
        let response = self.ec2("describe-subnets", &["--filters", &filters])?;
        let subnets: Vec<SubnetJson> = list(response, "Subnets")?;
        Ok(subnets.into_iter().map(Subnet::from).collect())
    }

    fn create_subnet(&self, vpc_id: &str, zone: &str, cidr: &str, tags: &Tags) -> Result<Subnet> {
        let specs = tag_specifications("subnet", tags);
        let response = self.ec2(
            "create-subnet",
            &[
                "--vpc-id",
                vpc_id,
                "--availability-zone",
                zone,
                "--cidr-block",
                cidr,
                "--tag-specifications",
                &specs,
            ],
        )?;
        Ok(item::<SubnetJson>(response, "Subnet")?.into())
    }

    fn delete_subnet(&self, id: &str) -> Result<()> {
        ignore_not_found(self.ec2("delete-subnet", &["--subnet-id", id]).map(|_| ()))
    }

    fn create_tags(&self, id: &str, tags: &Tags) -> Result<()> {
        let tags = tag_list(tags).to_string();
        self.ec2("create-tags", &["--resources", id, "--tags", &tags])?;
        Ok(())
    }

    fn find_security_group(&self, vpc_id: &str, name: &str) -> Result<Option<SecurityGroup>> {
        let filters = filters(&[("vpc-id", vpc_id), ("group-name", name)]);
        let response = self.ec2("describe-security-groups", &["--filters", &filters])?;
        let groups: Vec<SecurityGroupJson> = list(response, "SecurityGroups")?;
        Ok(groups.into_iter().next().map(SecurityGroup::from))
    }

    fn get_security_group(&self, id: &str) -> Result<Option<SecurityGroup>> {
        let Some(response) =
            optional(self.ec2("describe-security-groups", &["--group-ids", id]))?
        else {
            return Ok(None);
        };
        let groups: Vec<SecurityGroupJson> = list(response, "SecurityGroups")?;
        Ok(groups.into_iter().next().map(SecurityGroup::from))
    }

    fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
        tags: &Tags,
    ) -> Result<String> {
        let specs = tag_specifications("security-group", tags);
        let response = self.ec2(
            "create-security-group",
            &[
                "--vpc-id",
                vpc_id,
                "--group-name",
                name,
                "--description",
                description,
                "--tag-specifications",
                &specs,
            ],
        )?;
        item(response, "GroupId")
    }

    fn delete_security_group(&self, id: &str) -> Result<()> {
        ignore_not_found(
            self.ec2("delete-security-group", &["--group-id", id])
                .map(|_| ()),
        )
    }

    fn authorize(&self, group_id: &str, egress: bool, permission: &IpPermission) -> Result<()> {
        let operation = if egress {
            "authorize-security-group-egress"
        } else {
            "authorize-security-group-ingress"
        };
        let permissions = permission_json(permission);
        self.ec2(
            operation,
            &["--group-id", group_id, "--ip-permissions", &permissions],
        )?;
        Ok(())
    }

    fn revoke(&self, group_id: &str, egress: bool, permission: &IpPermission) -> Result<()> {
        let operation = if egress {
            "revoke-security-group-egress"
        } else {
            "revoke-security-group-ingress"
        };
        let permissions = permission_json(permission);
        ignore_not_found(
            self.ec2(
                operation,
                &["--group-id", group_id, "--ip-permissions", &permissions],
            )
            .map(|_| ()),
        )
    }

    fn list_launch_configurations(&self, prefix: &str) -> Result<Vec<LaunchConfiguration>> {
        let response = self.autoscaling("describe-launch-configurations", &[])?;
        let configs: Vec<LaunchConfigurationJson> = list(response, "LaunchConfigurations")?;
        Ok(configs
            .into_iter()
            .filter(|c| c.launch_configuration_name.starts_with(prefix))
            .map(LaunchConfiguration::from)
            .collect())
    }

    fn create_launch_configuration(&self, config: &LaunchConfiguration) -> Result<()> {
        let mut args: Vec<String> = vec![
            "--launch-configuration-name".into(),
            config.name.clone(),
            "--image-id".into(),
            config.image_id.clone(),
            "--instance-type".into(),
            config.instance_type.clone(),
        ];
        if !config.security_group_ids.is_empty() {
            args.push("--security-groups".into());
            args.extend(config.security_group_ids.iter().cloned());
        }
        // The CLI base64-encodes launch configuration user data itself
        if let Some(user_data) = &config.user_data {
            args.push("--user-data".into());
            args.push(user_data.clone());
        }
        args.push(if config.associate_public_ip {
            "--associate-public-ip-address".into()
        } else {
            "--no-associate-public-ip-address".into()
        });
        if config.root_volume_size.is_some() || config.root_volume_type.is_some() {
            let mut ebs = json!({ "DeleteOnTermination": true });
            if let Some(size) = config.root_volume_size {
                ebs["VolumeSize"] = json!(size);
            }
            if let Some(kind) = &config.root_volume_type {
                ebs["VolumeType"] = json!(kind);
            }
            args.push("--block-device-mappings".into());
            args.push(json!([{ "DeviceName": ROOT_DEVICE, "Ebs": ebs }]).to_string());
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.autoscaling("create-launch-configuration", &args)?;
        Ok(())
    }

    fn delete_launch_configuration(&self, name: &str) -> Result<()> {
        ignore_not_found(
            self.autoscaling(
                "delete-launch-configuration",
                &["--launch-configuration-name", name],
            )
            .map(|_| ()),
        )
    }

    fn find_autoscaling_group(&self, name: &str) -> Result<Option<AutoscalingGroup>> {
        let response = self.autoscaling(
            "describe-auto-scaling-groups",
            &["--auto-scaling-group-names", name],
        )?;
        let groups: Vec<AutoscalingGroupJson> = list(response, "AutoScalingGroups")?;
        Ok(groups
            .into_iter()
            .find(|g| g.status.is_none())
            .map(AutoscalingGroup::from))
    }

    fn create_autoscaling_group(&self, group: &AutoscalingGroup) -> Result<()> {
        let min = group.min_size.to_string();
        let max = group.max_size.to_string();
        let subnets = group.subnet_ids.join(",");
        let tags = group_tags(&group.name, &group.tags);
        let mut args = vec![
            "--auto-scaling-group-name",
            group.name.as_str(),
            "--launch-configuration-name",
            group.launch_configuration_name.as_str(),
            "--min-size",
            min.as_str(),
            "--max-size",
            max.as_str(),
            "--vpc-zone-identifier",
            subnets.as_str(),
        ];
        if !group.tags.is_empty() {
            args.extend(["--tags", tags.as_str()]);
        }
        self.autoscaling("create-auto-scaling-group", &args)?;
        Ok(())
    }

    fn update_autoscaling_group(&self, group: &AutoscalingGroup) -> Result<()> {
        let min = group.min_size.to_string();
        let max = group.max_size.to_string();
        let subnets = group.subnet_ids.join(",");
        self.autoscaling(
            "update-auto-scaling-group",
            &[
                "--auto-scaling-group-name",
                &group.name,
                "--launch-configuration-name",
                &group.launch_configuration_name,
                "--min-size",
                &min,
                "--max-size",
                &max,
                "--vpc-zone-identifier",
                &subnets,
            ],
        )?;
        if !group.tags.is_empty() {
            let tags = group_tags(&group.name, &group.tags);
            self.autoscaling("create-or-update-tags", &["--tags", &tags])?;
        }
        Ok(())
    }

    fn delete_autoscaling_group(&self, name: &str) -> Result<()> {
        ignore_not_found(
            self.autoscaling(
                "delete-auto-scaling-group",
                &["--auto-scaling-group-name", name, "--force-delete"],
            )
            .map(|_| ()),
        )
    }

    fn find_hosted_zone(&self, domain: &str) -> Result<Option<String>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct ZoneJson {
            id: String,
            name: String,
        }

        let response = self.run(
            "route53",
            "list-hosted-zones-by-name",
            &["--dns-name", domain, "--max-items", "1"],
        )?;
        let zones: Vec<ZoneJson> = list(response, "HostedZones")?;
        let wanted = domain.trim_end_matches('.');
        Ok(zones
            .into_iter()
            .find(|z| z.name.trim_end_matches('.') == wanted)
            .map(|z| z.id.trim_start_matches("/hostedzone/").to_string()))
    }
}
