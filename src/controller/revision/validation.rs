//! Checks a `MeshRevision` must pass before its chart is touched.

use crate::constants::{VALUES_NAMESPACE_PATH, VALUES_REVISION_PATH};
use crate::crd::MeshRevisionSpec;
use crate::error::{Error, Result};
use crate::values::Values;

/// Validate a revision spec and return its values.
///
/// The values must select this revision (see [`MeshRevisionSpec::revision_key`])
/// and target the namespace declared in the spec (`global.istioNamespace`).
///
/// # Errors
///
/// Returns [`Error::Validation`] naming the first offending field.
pub fn validate<'a>(name: &str, spec: &'a MeshRevisionSpec) -> Result<&'a Values> {
    if spec.version.trim().is_empty() {
        return Err(Error::Validation("spec.version not set".to_string()));
    }
    if spec.namespace.trim().is_empty() {
        return Err(Error::Validation("spec.namespace not set".to_string()));
    }
    let values = spec
        .values
        .as_ref()
        .ok_or_else(|| Error::Validation("spec.values not set".to_string()))?;

    let revision = spec.revision_key();
    if revision != name {
        return Err(Error::Validation(format!(
            "spec.values.{VALUES_REVISION_PATH} ({revision:?}) does not match metadata.name ({name:?})"
        )));
    }

    let namespace = values.get_str(VALUES_NAMESPACE_PATH).unwrap_or("");
    if namespace != spec.namespace {
        return Err(Error::Validation(format!(
            "spec.values.{VALUES_NAMESPACE_PATH} ({namespace:?}) does not match spec.namespace ({:?})",
            spec.namespace
        )));
    }
    Ok(values)
}
