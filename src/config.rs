use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("clusterup"))
}

// ============================================================================
// User Config
// ============================================================================

/// `~/.config/clusterup/config.toml`; every key is optional
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store URI used when `--state` and `CLUSTERUP_STATE_STORE` are unset
    pub state_store: Option<String>,
    /// Default worker count
    pub jobs: Option<usize>,
    /// Retry budget per task
    pub max_task_duration_secs: Option<u64>,
    /// Default output directory for the terraform target
    pub out_dir: Option<String>,
}

impl Config {
    /// Load the user config, or defaults if there is none
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir()?.join(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("Could not read {}", path.display())),
        };
        toml::from_str(&content).with_context(|| format!("Invalid config at {}", path.display()))
    }

    /// The flag (or its environment variable) wins over the config file
    pub fn state_store(&self, flag: Option<&str>) -> Result<String> {
        match flag.map(ToString::to_string).or_else(|| self.state_store.clone()) {
            Some(store) if !store.is_empty() => Ok(store),
            _ => bail!(
                "no state store configured: pass --state, set CLUSTERUP_STATE_STORE, or set state_store in {CONFIG_FILE}"
            ),
        }
    }

    pub fn jobs(&self, flag: Option<usize>) -> usize {
        flag.or(self.jobs).unwrap_or(4).max(1)
    }

    pub fn max_task_duration(&self) -> Option<Duration> {
        self.max_task_duration_secs.map(Duration::from_secs)
    }

    /// Terraform output directory: flag, then config, then `out/terraform/<cluster>`
    pub fn out_dir(&self, flag: Option<&str>, cluster: &str) -> PathBuf {
        match flag.or(self.out_dir.as_deref()) {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).as_ref()),
            None => PathBuf::from("out").join("terraform").join(cluster),
        }
    }
}
