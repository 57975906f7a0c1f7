//! Pure helpers for machine-object surgery during quorum recovery and
//! for assembling consensus-member connection strings.

use serde_json::Value;

use crate::Result;
use crate::RunbookError;

/// One consensus member as the drills address it: the member name derived
/// from the node's FQDN and its peer URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEndpoint {
    pub name: String,
    pub peer_url: String,
}

/// `name=peer_url` pairs joined with commas, the exact form the restore
/// script takes as its cluster argument.
pub fn assemble_connstring(members: &[MemberEndpoint]) -> String {
    members
        .iter()
        .map(|m| format!("{}={}", m.name, m.peer_url))
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits a machine name into its pool prefix and trailing index,
/// `ci-op-x7k2-master-1` becoming `("ci-op-x7k2-master", 1)`.
pub fn split_machine_name(name: &str) -> Result<(&str, u32)> {
    let (prefix, suffix) = name
        .rsplit_once('-')
        .ok_or_else(|| RunbookError::NoSurvivor(format!("machine name `{name}` has no index")))?;
    let index = suffix.parse().map_err(|_| {
        RunbookError::NoSurvivor(format!("machine name `{name}` has a non-numeric index"))
    })?;
    Ok((prefix, index))
}

/// Indices for the two replacement masters, skipping the survivor's slot.
pub fn replacement_indices(
    survivor_index: u32,
    replacements: usize,
) -> Vec<u32> {
    let mut indices = Vec::with_capacity(replacements);
    let mut next = 0;
    while indices.len() < replacements {
        if next != survivor_index {
            indices.push(next);
        }
        next += 1;
    }
    indices
}

/// Builds a replacement machine manifest from a survivor's object:
/// renames to `<prefix>-<index>` and drops the server-owned fields the
/// API refuses on create.
pub fn clone_machine_manifest(
    template: &Value,
    prefix: &str,
    index: u32,
) -> Value {
    let mut manifest = template.clone();

    if let Some(root) = manifest.as_object_mut() {
        root.remove("status");
    }
    if let Some(metadata) = manifest["metadata"].as_object_mut() {
        metadata.insert("name".to_string(), Value::String(format!("{prefix}-{index}")));
        for field in [
            "selfLink",
            "uid",
            "resourceVersion",
            "creationTimestamp",
            "generation",
            "ownerReferences",
            "managedFields",
        ] {
            metadata.remove(field);
        }
    }
    if let Some(spec) = manifest["spec"].as_object_mut() {
        // Provider ID belongs to the instance that is gone
        spec.remove("providerID");
    }

    manifest
}

/// Hostname up to the first dot, as the cert-signer manifest wants it.
pub fn short_hostname(fqdn: &str) -> &str {
    fqdn.split('.').next().unwrap_or(fqdn)
}
