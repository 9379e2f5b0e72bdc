//! Layered configuration primitives.
//!
//! Configuration is assembled from several YAML files merged in a fixed
//! order (shared defaults, component defaults, shared rules, tenant
//! overrides). Later layers win; maps merge recursively, everything else
//! (including lists) is replaced wholesale.

use std::path::Path;

use serde_yaml::Value;
use snafu::prelude::*;

use crate::error::{ConfigError, ParseSnafu, ReadFileSnafu};

/// Keys that may never appear in the YAML tree, case-insensitively.
///
/// Credentials belong to the per-tenant `.env` layer; a YAML leaf with one
/// of these names fails resolution outright rather than being silently
/// accepted.
const RESERVED_SECRET_KEYS: &[&str] = &[
    "password",
    "db_password",
    "sas_token",
    "connection_string",
    "account_key",
    "service_account_key",
    "secret",
    "token",
    "uri",
];

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}

/// Read and parse one YAML file into a raw value tree.
pub fn load_yaml(path: &Path) -> Result<Value, ConfigError> {
    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    serde_yaml::from_str(&contents).context(ParseSnafu { path })
}

/// Merge `overlay` into `base`.
///
/// Maps merge key-by-key, recursively. Any other value kind replaces the
/// base value, so lists are replaced rather than concatenated.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

/// Reject any YAML leaf whose key matches a reserved secret name.
pub fn reject_secrets(value: &Value, path: &Path) -> Result<(), ConfigError> {
    match value {
        Value::Mapping(map) => {
            for (key, nested) in map {
                if let Value::String(name) = key {
                    let lowered = name.to_ascii_lowercase();
                    if RESERVED_SECRET_KEYS.contains(&lowered.as_str()) {
                        return Err(ConfigError::SecretInYaml {
                            key: name.clone(),
                            path: path.to_path_buf(),
                        });
                    }
                }
                reject_secrets(nested, path)?;
            }
        }
        Value::Sequence(items) => {
            for item in items {
                reject_secrets(item, path)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Interpolate `{tenant_slug}` into every string leaf.
///
/// This is the only template syntax the configuration layer supports.
pub fn interpolate_slug(value: &mut Value, slug: &str) {
    match value {
        Value::String(s) => {
            if s.contains("{tenant_slug}") {
                *s = s.replace("{tenant_slug}", slug);
            }
        }
        Value::Mapping(map) => {
            for (_, nested) in map.iter_mut() {
                interpolate_slug(nested, slug);
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                interpolate_slug(item, slug);
            }
        }
        _ => {}
    }
}
