//! Terraform JSON emission
//!
//! Tasks insert one JSON body per (resource type, name). At finish the map
//! is written as `kubernetes.tf` with sorted keys, so the same graph always
//! produces byte-identical output. Computed values go to `data.tfvars`, each
//! declared as a string `variable` in `kubernetes.tf`.

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

pub const MAIN_FILE: &str = "kubernetes.tf";
pub const DATA_FILE: &str = "data.tfvars";

/// Terraform resource name for a task name (`nodes.ex.com` → `nodes-ex-com`)
pub fn tf_name(name: &str) -> String {
    name.replace('.', "-")
}

/// A value emitted into the Terraform tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Literal(String);

impl Literal {
    /// Plain text, with interpolation markers escaped
    pub fn text(value: &str) -> Self {
        Self(value.replace("${", "$${"))
    }

    /// Attribute of another emitted resource, `${type.name.attr}`
    pub fn reference(tf_type: &str, task_name: &str, attr: &str) -> Self {
        Self(format!("${{{tf_type}.{}.{attr}}}", tf_name(task_name)))
    }

    /// Raw expression, emitted as-is
    pub fn expression(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        Value::String(literal.0)
    }
}

/// Files written by [`TerraformTarget::finish`]
#[derive(Debug, Clone)]
pub struct TerraformOutput {
    pub main_path: PathBuf,
    /// Content of `kubernetes.tf` before this run, if it existed
    pub previous: Option<String>,
    pub current: String,
}

impl TerraformOutput {
    pub fn changed(&self) -> bool {
        self.previous.as_deref() != Some(self.current.as_str())
    }
}

/// Declarative target collecting Terraform resources
pub struct TerraformTarget {
    out_dir: PathBuf,
    provider: (String, Value),
    resources: Mutex<BTreeMap<(String, String), Value>>,
    outputs: Mutex<BTreeMap<String, Value>>,
    data: Mutex<BTreeMap<String, String>>,
    finished: AtomicBool,
}

impl TerraformTarget {
    /// Target writing into `out_dir` with one provider block
    pub fn new(out_dir: impl Into<PathBuf>, provider: &str, provider_config: Value) -> Self {
        Self {
            out_dir: out_dir.into(),
            provider: (provider.to_string(), provider_config),
            resources: Mutex::new(BTreeMap::new()),
            outputs: Mutex::new(BTreeMap::new()),
            data: Mutex::new(BTreeMap::new()),
            finished: AtomicBool::new(false),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(Error::permanent("terraform target already finished"));
        }
        Ok(())
    }

    /// Insert the body of one resource. Each (type, name) may be rendered once.
    pub fn render_resource(&self, tf_type: &str, task_name: &str, body: Value) -> Result<()> {
        self.ensure_open()?;
        let key = (tf_type.to_string(), tf_name(task_name));
        let mut resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if resources.contains_key(&key) {
            return Err(Error::permanent(format!(
                "terraform resource {}.{} rendered twice",
                key.0, key.1
            )));
        }
        resources.insert(key, body);
        Ok(())
    }

    /// Add an `output` block
    pub fn add_output(&self, name: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Add a computed value to `data.tfvars`
    pub fn add_data(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Number of resources rendered so far
    pub fn resource_count(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Canonical `kubernetes.tf` content
    pub fn to_json(&self) -> Result<String> {
        let resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let outputs = self.outputs.lock().unwrap_or_else(PoisonError::into_inner);
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);

        let mut by_type: Map<String, Value> = Map::new();
        for ((tf_type, name), body) in resources.iter() {
            let entry = by_type
                .entry(tf_type.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(names) = entry {
                names.insert(name.clone(), body.clone());
            }
        }

        let mut root = Map::new();
        let mut provider = Map::new();
        provider.insert(self.provider.0.clone(), self.provider.1.clone());
        root.insert("provider".into(), Value::Object(provider));
        root.insert("resource".into(), Value::Object(by_type));
        if !outputs.is_empty() {
            let blocks: Map<String, Value> = outputs
                .iter()
                .map(|(k, v)| (k.clone(), json!({ "value": v })))
                .collect();
            root.insert("output".into(), Value::Object(blocks));
        }
        if !data.is_empty() {
            let variables: Map<String, Value> = data
                .keys()
                .map(|k| (k.clone(), json!({ "type": "string" })))
                .collect();
            root.insert("variable".into(), Value::Object(variables));
        }

        let mut text = serde_json::to_string_pretty(&Value::Object(root))?;
        text.push('\n');
        Ok(text)
    }

    /// Canonical `data.tfvars` content
    pub fn to_tfvars(&self) -> String {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        data.iter()
            .map(|(k, v)| format!("{k} = {}\n", Value::String(v.clone())))
            .collect()
    }

    /// Write the output tree. The target accepts no more resources afterwards.
    pub fn finish(&self) -> Result<TerraformOutput> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(Error::permanent("terraform target already finished"));
        }
        fs::create_dir_all(&self.out_dir)?;

        let main_path = self.out_dir.join(MAIN_FILE);
        let previous = match fs::read_to_string(&main_path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let current = self.to_json()?;
        fs::write(&main_path, &current)?;

        let tfvars = self.to_tfvars();
        let data_path = self.out_dir.join(DATA_FILE);
        if tfvars.is_empty() {
            if data_path.exists() {
                fs::remove_file(&data_path)?;
            }
        } else {
            fs::write(&data_path, tfvars)?;
        }

        log::info!("wrote {}", main_path.display());
        Ok(TerraformOutput {
            main_path,
            previous,
            current,
        })
    }
}
