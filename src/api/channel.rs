use super::Document;
use super::cluster::{CloudProvider, ClusterSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Published defaults: images per provider and cluster settings
pub type Channel = Document<ChannelSpec>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ChannelImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelImage {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "providerID")]
    pub provider_id: String,
    pub name: String,
}

impl Document<ChannelSpec> {
    /// First image published for `provider`
    pub fn find_image(&self, provider: CloudProvider) -> Option<&ChannelImage> {
        let id = provider.provider_id();
        self.spec
            .images
            .iter()
            .find(|image| image.provider_id.eq_ignore_ascii_case(id.as_str()))
    }
}
