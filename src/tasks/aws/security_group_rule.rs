use crate::cloud::aws::{AwsCloud, IpPermission};
use serde::Serialize;
use serde_json::{Value, json};
use taskgraph::{
    Changes, DirectTarget, Error, ExecContext, FieldPolicy, Literal, Resource, Result, TaskKey,
    TerraformTarget,
};

/// All protocols, as EC2 spells it
pub const ALL_PROTOCOLS: &str = "-1";

/// One ingress or egress permission on a security group.
///
/// EC2 cannot edit a permission, so every field change replaces the rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityGroupRule {
    pub name: String,
    pub security_group: TaskKey,
    pub egress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_group: Option<TaskKey>,
}

impl SecurityGroupRule {
    /// Ingress rule allowing everything; narrow it with the builder methods
    pub fn ingress(name: &str, security_group: &TaskKey) -> Self {
        Self {
            name: name.to_string(),
            security_group: security_group.clone(),
            egress: false,
            protocol: None,
            from_port: None,
            to_port: None,
            cidr: None,
            source_group: None,
        }
    }

    pub fn egress(name: &str, security_group: &TaskKey) -> Self {
        Self {
            egress: true,
            ..Self::ingress(name, security_group)
        }
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.protocol = Some(protocol.to_string());
        self
    }

    /// `protocol` traffic on a single port
    pub fn port(self, protocol: &str, port: u16) -> Self {
        self.port_range(protocol, port, port)
    }

    pub fn port_range(mut self, protocol: &str, from: u16, to: u16) -> Self {
        self.protocol = Some(protocol.to_string());
        self.from_port = Some(from);
        self.to_port = Some(to);
        self
    }

    pub fn cidr(mut self, cidr: &str) -> Self {
        self.cidr = Some(cidr.to_string());
        self
    }

    pub fn source_group(mut self, group: &TaskKey) -> Self {
        self.source_group = Some(group.clone());
        self
    }

    fn protocol_or_all(&self) -> &str {
        self.protocol.as_deref().unwrap_or(ALL_PROTOCOLS)
    }

    /// The EC2 permission, `None` while the source group has no id
    fn permission(&self, ctx: &ExecContext) -> Option<IpPermission> {
        let source_group_id = match &self.source_group {
            Some(key) => Some(ctx.id_of(key)?),
            None => None,
        };
        Some(IpPermission {
            protocol: self.protocol_or_all().to_string(),
            from_port: self.from_port,
            to_port: self.to_port,
            cidr: self.cidr.clone(),
            source_group_id,
        })
    }
}

impl Resource for SecurityGroupRule {
    const KIND: &'static str = "SecurityGroupRule";

    fn name(&self) -> &str {
        &self.name
    }

    fn links(&self) -> Vec<TaskKey> {
        let mut links = vec![self.security_group.clone()];
        links.extend(self.source_group.clone());
        links
    }

    fn field_policy(field: &str) -> FieldPolicy {
        match field {
            "name" => FieldPolicy::Immutable,
            _ => FieldPolicy::Replace,
        }
    }

    fn find(&self, ctx: &ExecContext) -> Result<Option<Self>> {
        let Some(group_id) = ctx.id_of(&self.security_group) else {
            return Ok(None);
        };
        let Some(wanted) = self.permission(ctx) else {
            return Ok(None);
        };
        let api = ctx.cloud_as::<AwsCloud>()?.api()?;
        let Some(group) = api.get_security_group(&group_id)? else {
            return Ok(None);
        };
        let rules = if self.egress { &group.egress } else { &group.ingress };
        // A permission is its own identity: present means identical
        Ok(rules.contains(&wanted).then(|| self.clone()))
    }

    fn check_changes(_actual: Option<&Self>, expected: &Self, _changes: &Changes) -> Result<()> {
        if expected.cidr.is_none() && expected.source_group.is_none() {
            return Err(Error::RequiredField("cidr"));
        }
        if expected.from_port.is_some() != expected.to_port.is_some() {
            return Err(Error::permanent(format!(
                "rule {} sets only one end of its port range",
                expected.name
            )));
        }
        Ok(())
    }

    fn render_direct(
        &self,
        target: &DirectTarget,
        ctx: &ExecContext,
        actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<Option<String>> {
        if actual.is_some() {
            return Ok(None);
        }
        let api = target.cloud_as::<AwsCloud>()?.api()?;
        let group_id = ctx.require_id(&self.security_group)?;
        if let Some(source) = &self.source_group {
            ctx.require_id(source)?;
        }
        let permission = self
            .permission(ctx)
            .ok_or_else(|| Error::permanent(format!("rule {} has an unresolved source", self.name)))?;
        log::debug!("authorizing {} on {group_id}", self.name);
        api.authorize(&group_id, self.egress, &permission)?;
        Ok(None)
    }

    fn render_terraform(
        &self,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        let mut body = json!({
            "type": if self.egress { "egress" } else { "ingress" },
            "security_group_id": Literal::reference("aws_security_group", &self.security_group.name, "id"),
            "protocol": self.protocol_or_all(),
            "from_port": self.from_port.unwrap_or(0),
            "to_port": self.to_port.unwrap_or(0),
        });
        if let Value::Object(fields) = &mut body {
            if let Some(cidr) = &self.cidr {
                fields.insert("cidr_blocks".into(), json!([cidr]));
            }
            if let Some(source) = &self.source_group {
                fields.insert(
                    "source_security_group_id".into(),
                    Literal::reference("aws_security_group", &source.name, "id").into(),
                );
            }
        }
        target.render_resource("aws_security_group_rule", &self.name, body)
    }

    fn delete_direct(&self, target: &DirectTarget, ctx: &ExecContext, _actual: &Self) -> Result<()> {
        let (Some(group_id), Some(permission)) = (ctx.id_of(&self.security_group), self.permission(ctx))
        else {
            return Ok(());
        };
        target
            .cloud_as::<AwsCloud>()?
            .api()?
            .revoke(&group_id, self.egress, &permission)
    }
}
