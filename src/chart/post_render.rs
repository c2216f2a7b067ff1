//! Helm post-renderer: reads rendered manifests, stamps ownership, writes them back.

use crate::ownership::OwnerStamp;
use serde::Deserialize;
use serde_json::Value;
use std::io::{Read, Write};

/// Stamp every object in a multi-document YAML stream. `List` objects have each
/// of their items stamped instead of the list itself.
///
/// # Errors
///
/// Fails on malformed YAML.
pub fn stamp_manifests(input: &str, owner: &OwnerStamp) -> Result<String, serde_yaml::Error> {
    let mut output = String::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let mut object = Value::deserialize(document)?;
        if object.is_null() {
            continue;
        }
        stamp_object(&mut object, owner);
        output.push_str("---\n");
        output.push_str(&serde_yaml::to_string(&object)?);
    }
    Ok(output)
}

fn stamp_object(object: &mut Value, owner: &OwnerStamp) {
    let is_list = object
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"));
    match object.get_mut("items").and_then(Value::as_array_mut) {
        Some(items) if is_list => items.iter_mut().for_each(|item| owner.stamp(item)),
        _ => owner.stamp(object),
    }
}

/// Entry point for the `post-render` subcommand: stdin to stdout.
///
/// # Errors
///
/// Fails on an invalid owner, unreadable input or malformed manifests.
pub fn run(owner_json: &str) -> anyhow::Result<()> {
    let owner: OwnerStamp = serde_json::from_str(owner_json)?;
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let rendered = stamp_manifests(&input, &owner)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(rendered.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
