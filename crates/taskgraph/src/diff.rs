//! Field-level change computation between expected and actual values

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How a field may change on an existing object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    /// The cloud API can update the field in place
    InPlace,
    /// Changing the field means deleting and recreating the object
    Replace,
    /// The field cannot change once the object exists
    Immutable,
}

/// Field-by-field delta between expected and actual.
///
/// Only fields whose expected value is set and differs from actual are
/// present; the stored value is the expected one. Unset expected fields
/// mean "don't care" and never produce a change.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Changes {
    fields: BTreeMap<String, Value>,
}

impl Changes {
    /// Compute the changes needed to go from `actual` to `expected`
    ///
    /// With no actual object every populated expected field is a change.
    pub fn compute<R: Serialize>(expected: &R, actual: Option<&R>) -> Result<Self> {
        let expected = to_fields(expected)?;
        let actual = match actual {
            Some(a) => Some(to_fields(a)?),
            None => None,
        };

        let mut fields = BTreeMap::new();
        for (name, value) in expected {
            if value.is_null() {
                continue;
            }
            let same = actual
                .as_ref()
                .and_then(|a| a.get(&name))
                .is_some_and(|a| *a == value);
            if !same {
                fields.insert(name, value);
            }
        }
        Ok(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Expected value of a changed field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Names of changed fields, sorted
    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Remove a field from the change set (for fields a task handles itself)
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Changed fields whose policy matches
    pub fn fields_with<F>(&self, policy: FieldPolicy, policy_of: F) -> Vec<String>
    where
        F: Fn(&str) -> FieldPolicy,
    {
        self.fields
            .keys()
            .filter(|f| policy_of(f) == policy)
            .cloned()
            .collect()
    }

    /// One-line description, e.g. `machine_type, tags`
    pub fn summary(&self) -> String {
        self.field_names().join(", ")
    }
}

fn to_fields<R: Serialize>(value: &R) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::permanent(format!(
            "resource value must serialize to an object, got {other}"
        ))),
    }
}
