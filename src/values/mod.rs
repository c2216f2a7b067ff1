//! # Values
//!
//! The open, schemaless settings document handed to the control plane chart.
//!
//! `Values` wraps a JSON object so unknown keys survive a round trip through the
//! custom resources. Nested keys are addressed with dotted paths
//! (`global.istioNamespace`).
//!
//! ## Merging
//!
//! [`Values::merge`] is a recursive overwrite merge: maps are merged key by key,
//! everything else (scalars, arrays, type changes) is replaced by the override.

mod profiles;

pub use profiles::resolve_values;

use schemars::{json_schema, JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValuesError {
    #[error("profile name must not be empty")]
    EmptyProfileName,
    #[error("invalid profile name {0:?}: must name a file directly inside the profiles directory")]
    InvalidProfileName(String),
    #[error("failed to read profile {profile} from {}: {source}", path.display())]
    ReadProfile {
        profile: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse profile {profile}: {source}")]
    ParseProfile {
        profile: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("spec.values in profile {0} is not a map")]
    ProfileValuesNotAMap(String),
    #[error("cannot set {path}: {segment} is not a map")]
    NotAMap { path: String, segment: String },
    #[error("failed to render values as YAML: {0}")]
    Render(#[from] serde_yaml::Error),
}

/// Settings document (arbitrary nested key/value tree)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(Map<String, Value>);

impl JsonSchema for Values {
    fn schema_name() -> Cow<'static, str> {
        "Values".into()
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        json_schema!({
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        })
    }
}

impl From<Map<String, Value>> for Values {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl Values {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build values from a JSON value; anything other than an object yields `None`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a dotted path. Returns `None` if any segment is missing or not a map.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Boolean lookup that also accepts the string forms `"true"`/`"false"`,
    /// which show up when values are set from the command line.
    #[must_use]
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Set a dotted path, creating intermediate maps as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ValuesError::NotAMap`] when a segment of `path` holds a scalar.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), ValuesError> {
        let segments: Vec<&str> = path.split('.').collect();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| ValuesError::NotAMap {
                path: path.to_string(),
                segment: String::new(),
            })?;

        let mut current = &mut self.0;
        for segment in parents {
            let entry = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = entry.as_object_mut().ok_or_else(|| ValuesError::NotAMap {
                path: path.to_string(),
                segment: (*segment).to_string(),
            })?;
        }
        current.insert((*last).to_string(), value.into());
        Ok(())
    }

    /// Recursive overwrite merge of `overrides` on top of `self`.
    pub fn merge(&mut self, overrides: &Values) {
        merge_overwrite(&mut self.0, &overrides.0);
    }

    /// Consuming variant of [`Values::merge`].
    #[must_use]
    pub fn merged_with(mut self, overrides: &Values) -> Self {
        self.merge(overrides);
        self
    }

    /// Render as a YAML document.
    ///
    /// # Errors
    ///
    /// Fails if the document cannot be serialized.
    pub fn to_yaml(&self) -> Result<String, ValuesError> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

/// Merge `overrides` into `base`: recurse where both sides hold maps, otherwise
/// the override value replaces the base value.
pub fn merge_overwrite(base: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, override_value) in overrides {
        match (base.get_mut(key), override_value) {
            (Some(Value::Object(base_map)), Value::Object(override_map)) => {
                merge_overwrite(base_map, override_map);
            }
            _ => {
                base.insert(key.clone(), override_value.clone());
            }
        }
    }
}
