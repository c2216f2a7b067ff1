//! # Profiles
//!
//! Named, file-backed overlays of default settings. A profile `<name>` lives in
//! `<profiles_dir>/<name>.yaml` and contributes its `spec.values` sub-tree.

use super::{Values, ValuesError};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Merge the named profiles, in order, and then `overrides` on top.
///
/// Later profiles override earlier ones; a name that was already applied is skipped.
/// Any error aborts the whole resolution.
///
/// # Errors
///
/// Returns the first invalid name, unreadable file or malformed profile.
pub fn resolve_values<S: AsRef<str>>(
    profiles_dir: &Path,
    profiles: &[S],
    overrides: Option<&Values>,
) -> Result<Values, ValuesError> {
    let mut applied = HashSet::new();
    let mut resolved = Values::new();

    for profile in profiles.iter().map(AsRef::as_ref) {
        if !applied.insert(profile) {
            continue;
        }
        let profile_values = load_profile(profiles_dir, profile)?;
        debug!(profile, "applying profile");
        resolved.merge(&profile_values);
    }

    if let Some(overrides) = overrides {
        resolved.merge(overrides);
    }
    Ok(resolved)
}

fn profile_path(profiles_dir: &Path, profile: &str) -> Result<PathBuf, ValuesError> {
    if profile.is_empty() {
        return Err(ValuesError::EmptyProfileName);
    }
    let file_name = format!("{profile}.yaml");
    let mut components = Path::new(&file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(profiles_dir.join(file_name)),
        _ => Err(ValuesError::InvalidProfileName(profile.to_string())),
    }
}

fn load_profile(profiles_dir: &Path, profile: &str) -> Result<Values, ValuesError> {
    let path = profile_path(profiles_dir, profile)?;
    let contents = std::fs::read_to_string(&path).map_err(|source| ValuesError::ReadProfile {
        profile: profile.to_string(),
        path: path.clone(),
        source,
    })?;
    let document: Value =
        serde_yaml::from_str(&contents).map_err(|source| ValuesError::ParseProfile {
            profile: profile.to_string(),
            source,
        })?;

    match document.get("spec").and_then(|spec| spec.get("values")) {
        None | Some(Value::Null) => Ok(Values::new()),
        Some(Value::Object(map)) => Ok(Values::from(map.clone())),
        Some(_) => Err(ValuesError::ProfileValuesNotAMap(profile.to_string())),
    }
}
