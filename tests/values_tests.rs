//! # Values Resolution Tests
//!
//! Profile layering against the on-disk resource tree.

mod common;

use mesh_operator::values::{resolve_values, Values, ValuesError};
use serde_json::json;
use std::path::PathBuf;

fn profiles_dir(root: &tempfile::TempDir) -> PathBuf {
    root.path().join("v1").join("profiles")
}

fn resource_tree() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    common::write_resource_tree(root.path());
    root
}

#[test]
fn test_later_profile_overrides_earlier() {
    let root = resource_tree();
    let values = resolve_values(&profiles_dir(&root), &["default", "demo"], None).unwrap();

    assert_eq!(values.get("pilot.replicaCount"), Some(&json!(2)));
    assert_eq!(values.get("pilot.traceSampling"), Some(&json!(100)));
    assert_eq!(values.get_bool("pilot.cni.enabled"), Some(false));
    assert_eq!(values.get_str("global.hub"), Some("docker.io/istio"));
}

#[test]
fn test_user_values_override_every_profile() {
    let root = resource_tree();
    let overrides = Values::from_value(json!({
        "pilot": {"replicaCount": 5},
        "global": {"logging": {"level": "default:debug"}}
    }))
    .unwrap();

    let values =
        resolve_values(&profiles_dir(&root), &["default", "demo"], Some(&overrides)).unwrap();
    assert_eq!(values.get("pilot.replicaCount"), Some(&json!(5)));
    assert_eq!(values.get_str("global.logging.level"), Some("default:debug"));
    assert_eq!(values.get_str("global.hub"), Some("docker.io/istio"));
}

#[test]
fn test_no_profiles_yields_only_overrides() {
    let root = resource_tree();
    let overrides = Values::from_value(json!({"revision": "canary"})).unwrap();

    let values = resolve_values::<&str>(&profiles_dir(&root), &[], Some(&overrides)).unwrap();
    assert_eq!(values, overrides);
}

#[test]
fn test_path_like_profile_names_are_rejected() {
    let root = resource_tree();

    let err = resolve_values(&profiles_dir(&root), &["../demo"], None).unwrap_err();
    assert!(matches!(err, ValuesError::InvalidProfileName(name) if name == "../demo"));

    let err = resolve_values(&profiles_dir(&root), &["default", ""], None).unwrap_err();
    assert!(matches!(err, ValuesError::EmptyProfileName));
}

#[test]
fn test_missing_profile_aborts_resolution() {
    let root = resource_tree();

    let err = resolve_values(&profiles_dir(&root), &["default", "ambient"], None).unwrap_err();
    match err {
        ValuesError::ReadProfile { profile, path, .. } => {
            assert_eq!(profile, "ambient");
            assert!(path.ends_with("ambient.yaml"));
        }
        other => panic!("expected ReadProfile, got {other:?}"),
    }
}

#[test]
fn test_malformed_profile_is_a_parse_error() {
    let root = resource_tree();
    std::fs::write(profiles_dir(&root).join("broken.yaml"), "spec: [unclosed").unwrap();

    let err = resolve_values(&profiles_dir(&root), &["broken"], None).unwrap_err();
    assert!(matches!(err, ValuesError::ParseProfile { .. }));
}
