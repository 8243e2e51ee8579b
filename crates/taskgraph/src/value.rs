//! Field values that are neither plain scalars nor references.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, OnceLock};

type Resolver = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// A lazily-resolvable text blob (startup scripts, user data, metadata values).
///
/// Blobs compare and serialize by content hash, so diffs never carry the
/// full text. The content is resolved at most once.
#[derive(Clone)]
pub struct Blob {
    content: Arc<OnceLock<String>>,
    resolver: Option<Resolver>,
}

impl Blob {
    /// Blob with known content
    pub fn text(content: impl Into<String>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(content.into());
        Self {
            content: Arc::new(cell),
            resolver: None,
        }
    }

    /// Blob whose content is produced on first use
    pub fn lazy<F>(resolver: F) -> Self
    where
        F: Fn() -> Result<String> + Send + Sync + 'static,
    {
        Self {
            content: Arc::new(OnceLock::new()),
            resolver: Some(Arc::new(resolver)),
        }
    }

    /// Resolve and return the content
    pub fn as_str(&self) -> Result<&str> {
        if let Some(content) = self.content.get() {
            return Ok(content);
        }
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| Error::permanent("blob has neither content nor resolver"))?;
        let resolved = resolver()?;
        Ok(self.content.get_or_init(|| resolved))
    }

    /// Content hash used for equality, `blake3:<hex>`
    pub fn hash(&self) -> Result<String> {
        let content = self.as_str()?;
        Ok(format!("blake3:{}", blake3::hash(content.as_bytes()).to_hex()))
    }
}

/// First 16 hex digits of the blake3 hash of `bytes`, stable across releases
pub fn short_digest(bytes: &[u8]) -> String {
    let mut hex = blake3::hash(bytes).to_hex().to_string();
    hex.truncate(16);
    hex
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        match (self.hash(), other.hash()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.content.get() {
            Some(content) => write!(f, "Blob({} bytes)", content.len()),
            None => f.write_str("Blob(unresolved)"),
        }
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let hash = self.hash().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&hash)
    }
}
