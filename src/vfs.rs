//! Configuration store addressed by URI
//!
//! Paths are relative, `/`-separated and never contain `..`. Writes replace
//! the whole file atomically.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use walkdir::WalkDir;

/// Key-value filesystem holding cluster documents
pub trait Store: Send + Sync {
    /// URI of the store root
    fn uri(&self) -> String;

    /// File content, or `None` if there is no such file
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Files under `prefix`, as full relative paths, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove one file; removing a missing file is not an error
    fn remove(&self, path: &str) -> Result<()>;

    /// Remove every file under `prefix`
    fn remove_all(&self, prefix: &str) -> Result<usize> {
        let files = self.list(prefix)?;
        for file in &files {
            self.remove(file)?;
        }
        Ok(files.len())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.read(path)?.is_some())
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.starts_with('/') || path.split('/').any(|part| part == "..") {
        bail!("invalid store path {path:?}");
    }
    Ok(())
}

// ============================================================================
// Filesystem
// ============================================================================

/// Store rooted at a local directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        check_path(path)?;
        Ok(self.root.join(path))
    }
}

const TMP_SUFFIX: &str = ".clusterup-tmp";

impl Store for FileStore {
    fn uri(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        match fs::read(&full) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Could not read {}", full.display())),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let mut tmp = full.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data).with_context(|| format!("Could not write {}", tmp.display()))?;
        fs::rename(&tmp, &full)
            .with_context(|| format!("Could not move {} into place", full.display()))?;
        log::debug!("wrote {}", full.display());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.resolve(prefix)?;
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = entry.with_context(|| format!("Could not list {}", base.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !rel.ends_with(TMP_SUFFIX) {
                files.push(rel);
            }
        }
        files.sort();
        Ok(files)
    }

    fn remove(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Could not remove {}", full.display())),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-process store, used by `mem://` and tests
#[derive(Default)]
pub struct MemStore {
    name: String,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: Mutex::new(BTreeMap::new()),
        }
    }

    fn files(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemStore {
    fn uri(&self) -> String {
        format!("mem://{}", self.name)
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        check_path(path)?;
        Ok(self.files().get(path).cloned())
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        check_path(path)?;
        self.files().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        check_path(prefix)?;
        let dir = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        Ok(self
            .files()
            .keys()
            .filter(|k| prefix.is_empty() || k.as_str() == prefix || k.starts_with(&dir))
            .cloned()
            .collect())
    }

    fn remove(&self, path: &str) -> Result<()> {
        check_path(path)?;
        self.files().remove(path);
        Ok(())
    }
}

// ============================================================================
// URIs
// ============================================================================

/// Open the store a URI names.
///
/// `file://` URIs and bare paths (with `~` expanded) open a [`FileStore`];
/// `mem://` opens a fresh [`MemStore`].
pub fn open_store(uri: &str) -> Result<Box<dyn Store>> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Box::new(FileStore::new(expand(path))));
    }
    if let Some(name) = uri.strip_prefix("mem://") {
        return Ok(Box::new(MemStore::new(name)));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        match scheme {
            "s3" | "gs" => bail!(
                "unsupported store {scheme}://: object store bindings are not available in this build"
            ),
            other => bail!("unrecognized store URI scheme {other:?} in {uri}"),
        }
    }
    Ok(Box::new(FileStore::new(expand(uri))))
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Read a whole document from a location: a store path, or an http(s) URL
pub fn read_location(location: &str) -> Result<String> {
    if location.starts_with("https://") || location.starts_with("http://") {
        let agent = ureq::Agent::new_with_defaults();
        let mut response = agent
            .get(location)
            .header("User-Agent", "clusterup")
            .call()
            .with_context(|| format!("Failed to fetch {location}"))?;
        return response
            .body_mut()
            .read_to_string()
            .with_context(|| format!("Failed to read {location}"));
    }

    let path = location.strip_prefix("file://").unwrap_or(location);
    let path = expand(path);
    fs::read_to_string(&path).with_context(|| format!("Could not read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn Store) {
        store.write("ex.com/config", b"cluster").unwrap();
        store.write("ex.com/instancegroup/nodes", b"nodes").unwrap();
        store.write("ex.com/instancegroup/master", b"master").unwrap();
        store.write("other.com/config", b"other").unwrap();

        assert_eq!(store.read("ex.com/config").unwrap().unwrap(), b"cluster");
        assert!(store.read("missing").unwrap().is_none());
        assert_eq!(
            store.list("ex.com/instancegroup").unwrap(),
            vec!["ex.com/instancegroup/master", "ex.com/instancegroup/nodes"]
        );
        assert_eq!(store.list("").unwrap().len(), 4);

        assert_eq!(store.remove_all("ex.com").unwrap(), 3);
        assert_eq!(store.list("").unwrap(), vec!["other.com/config"]);
        store.remove("already-gone").unwrap();
    }

    #[test]
    fn test_file_store() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        exercise(&store);
    }

    #[test]
    fn test_mem_store() {
        exercise(&MemStore::new("test"));
    }

    #[test]
    fn test_file_store_overwrite_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.write("a/config", b"one").unwrap();
        store.write("a/config", b"two").unwrap();
        assert_eq!(store.read("a/config").unwrap().unwrap(), b"two");
        assert_eq!(store.list("a").unwrap(), vec!["a/config"]);
    }

    #[test]
    fn test_mem_store_prefix_is_a_directory() {
        let store = MemStore::new("t");
        store.write("ex.com/config", b"x").unwrap();
        store.write("ex.com.au/config", b"y").unwrap();
        assert_eq!(store.list("ex.com").unwrap(), vec!["ex.com/config"]);
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let store = MemStore::new("t");
        assert!(store.write("../etc/passwd", b"").is_err());
        assert!(store.read("/abs").is_err());
    }

    #[test]
    fn test_open_store_schemes() {
        assert!(open_store("mem://x").unwrap().uri().starts_with("mem://"));
        let err = open_store("s3://bucket/state").err().unwrap();
        assert!(err.to_string().contains("unsupported store s3://"));
        assert!(open_store("ftp://host").is_err());
        assert!(open_store("/tmp/state").unwrap().uri().starts_with("file://"));
    }
}
