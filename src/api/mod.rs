//! Versioned configuration documents
//!
//! Every document shares the envelope `{apiVersion, kind, metadata, spec}`.
//! Fields the envelope does not know are kept in `extra` so a document
//! survives a read-write cycle unchanged; `create` rejects them.

pub mod channel;
pub mod cluster;
pub mod federation;
pub mod instance_group;
pub mod validation;

pub use channel::{Channel, ChannelImage, ChannelSpec};
pub use cluster::{CloudProvider, Cluster, ClusterSpec, ClusterZone, Networking, Overlays};
pub use federation::{Federation, FederationSpec};
pub use instance_group::{InstanceGroup, Role};
pub use validation::ValidationError;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const API_VERSION: &str = "clusterup/v1alpha1";

/// Document kinds understood by the store and by `create -f`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Cluster,
    InstanceGroup,
    Federation,
    Channel,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "Cluster",
            Self::InstanceGroup => "InstanceGroup",
            Self::Federation => "Federation",
            Self::Channel => "Channel",
        }
    }

    /// Case-insensitive lookup
    pub fn parse(kind: &str) -> Option<Self> {
        [
            Self::Cluster,
            Self::InstanceGroup,
            Self::Federation,
            Self::Channel,
        ]
        .into_iter()
        .find(|k| k.as_str().eq_ignore_ascii_case(kind))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Envelope around a typed spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document<S> {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: S,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl<S> Document<S>
where
    S: Serialize + DeserializeOwned,
{
    pub fn new(kind: Kind, name: &str, spec: S) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: kind.as_str().to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                ..ObjectMeta::default()
            },
            spec,
            extra: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Parse one document, checking that its kind is `kind`
    pub fn from_yaml(text: &str, kind: Kind) -> Result<Self> {
        let doc: Self = serde_yaml::from_str(text).context("Invalid document")?;
        match Kind::parse(&doc.kind) {
            Some(k) if k == kind => Ok(doc),
            _ => bail!("expected kind {kind}, found {:?}", doc.kind),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize document")
    }

    /// Names of top-level fields the envelope does not define
    pub fn unknown_fields(&self) -> Vec<String> {
        self.extra
            .keys()
            .cloned()
            .chain(self.metadata.extra.keys().map(|k| format!("metadata.{k}")))
            .collect()
    }

    pub fn reject_unknown_fields(&self) -> std::result::Result<(), ValidationError> {
        let unknown = self.unknown_fields();
        if unknown.is_empty() {
            return Ok(());
        }
        Err(ValidationError::new(format!(
            "unknown field(s) in {} {:?}: {}",
            self.kind,
            self.name(),
            unknown.join(", ")
        )))
    }
}

/// A parsed document of any kind
#[derive(Debug, Clone, PartialEq)]
pub enum AnyDocument {
    Cluster(Cluster),
    InstanceGroup(InstanceGroup),
    Federation(Federation),
    Channel(Channel),
}

impl AnyDocument {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Cluster(_) => Kind::Cluster,
            Self::InstanceGroup(_) => Kind::InstanceGroup,
            Self::Federation(_) => Kind::Federation,
            Self::Channel(_) => Kind::Channel,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Cluster(d) => d.name(),
            Self::InstanceGroup(d) => d.name(),
            Self::Federation(d) => d.name(),
            Self::Channel(d) => d.name(),
        }
    }

    fn from_value(value: serde_yaml::Value) -> Result<Self> {
        let kind = value
            .get("kind")
            .and_then(serde_yaml::Value::as_str)
            .context("document has no kind")?;
        let kind = Kind::parse(kind).with_context(|| format!("unknown document kind {kind:?}"))?;
        let doc = match kind {
            Kind::Cluster => Self::Cluster(serde_yaml::from_value(value)?),
            Kind::InstanceGroup => Self::InstanceGroup(serde_yaml::from_value(value)?),
            Kind::Federation => Self::Federation(serde_yaml::from_value(value)?),
            Kind::Channel => Self::Channel(serde_yaml::from_value(value)?),
        };
        Ok(doc)
    }
}

/// Parse a YAML stream with one or more `---` separated documents
pub fn parse_documents(text: &str) -> Result<Vec<AnyDocument>> {
    let mut docs = Vec::new();
    for (i, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(de)
            .with_context(|| format!("Invalid YAML in document {}", i + 1))?;
        if value.is_null() {
            continue;
        }
        docs.push(
            AnyDocument::from_value(value).with_context(|| format!("In document {}", i + 1))?,
        );
    }
    Ok(docs)
}
