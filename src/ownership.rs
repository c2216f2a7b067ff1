//! # Ownership
//!
//! Links objects rendered by a chart back to the custom resource that produced them.
//!
//! Kubernetes owner references cannot point across namespaces, so an object gets
//! either a controller owner reference (owner is cluster-scoped, or lives in the
//! same namespace) or a pair of annotations naming the owner. [`owner_of`] reads
//! either form back, which is what the watch mappers use to turn an event on a
//! managed object into a reconcile request for its owner.

use crate::constants::{MANAGED_BY_KIND_ANNOTATION, MANAGED_BY_NAME_ANNOTATION};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Everything needed to stamp ownership on a rendered object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerStamp {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    /// `None` for cluster-scoped owners
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Owner identity recovered from a managed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub namespace: Option<String>,
    pub name: String,
}

impl OwnerStamp {
    /// Build a stamp for a persisted object. Returns `None` if it has no uid yet.
    #[must_use]
    pub fn for_resource<K>(owner: &K) -> Option<Self>
    where
        K: Resource<DynamicType = ()>,
    {
        Some(Self {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            name: owner.name_any(),
            uid: owner.uid()?,
            namespace: owner.namespace().filter(|ns| !ns.is_empty()),
        })
    }

    /// API group part of `apiVersion` (empty for the core group)
    #[must_use]
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map_or("", |(group, _)| group)
    }

    /// Value of the `managed-by-kind` annotation: `<Kind>.<group>`
    #[must_use]
    pub fn kind_annotation(&self) -> String {
        format!("{}.{}", self.kind, self.group())
    }

    /// Value of the `managed-by-name` annotation: `<namespace>/<name>`
    #[must_use]
    pub fn name_annotation(&self) -> String {
        format!("{}/{}", self.namespace.as_deref().unwrap_or(""), self.name)
    }

    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// [`Self::owner_reference`] as it appears in a manifest
    fn owner_reference_value(&self) -> Value {
        json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "name": self.name,
            "uid": self.uid,
            "controller": true,
            "blockOwnerDeletion": true,
        })
    }

    /// Whether an object in `object_namespace` may carry an owner reference to us.
    #[must_use]
    pub fn can_own_via_reference(&self, object_namespace: Option<&str>) -> bool {
        match self.namespace.as_deref() {
            None => true,
            Some(owner_ns) => object_namespace == Some(owner_ns),
        }
    }

    /// Stamp ownership onto a rendered object (a JSON/YAML mapping).
    pub fn stamp(&self, object: &mut Value) {
        let Some(object) = object.as_object_mut() else {
            return;
        };
        let metadata = object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(metadata) = metadata.as_object_mut() else {
            return;
        };

        let object_namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        if self.can_own_via_reference(object_namespace.as_deref()) {
            let references = metadata
                .entry("ownerReferences")
                .or_insert_with(|| Value::Array(Vec::new()));
            if !references.is_array() {
                *references = Value::Array(Vec::new());
            }
            if let Some(references) = references.as_array_mut() {
                references.retain(|r| r.get("uid").and_then(Value::as_str) != Some(&self.uid));
                references.push(self.owner_reference_value());
            }
        } else {
            let annotations = metadata
                .entry("annotations")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(annotations) = annotations.as_object_mut() {
                annotations.insert(
                    MANAGED_BY_NAME_ANNOTATION.to_string(),
                    Value::String(self.name_annotation()),
                );
                annotations.insert(
                    MANAGED_BY_KIND_ANNOTATION.to_string(),
                    Value::String(self.kind_annotation()),
                );
            }
        }
    }
}

/// Find the owner of kind `kind` in `group` for a managed object.
///
/// The controller owner reference wins; the annotation pair is the fallback for
/// objects that live outside their owner's namespace.
#[must_use]
pub fn owner_of(meta: &ObjectMeta, kind: &str, group: &str) -> Option<OwnerIdentity> {
    let by_reference = meta.owner_references.iter().flatten().find(|r| {
        r.controller == Some(true)
            && r.kind == kind
            && r.api_version.split_once('/').map_or("", |(g, _)| g) == group
    });
    if let Some(reference) = by_reference {
        return Some(OwnerIdentity {
            namespace: meta.namespace.clone(),
            name: reference.name.clone(),
        });
    }

    let annotations = meta.annotations.as_ref()?;
    if annotations.get(MANAGED_BY_KIND_ANNOTATION)? != &format!("{kind}.{group}") {
        return None;
    }
    let (namespace, name) = annotations.get(MANAGED_BY_NAME_ANNOTATION)?.split_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some(OwnerIdentity {
        namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
        name: name.to_string(),
    })
}
