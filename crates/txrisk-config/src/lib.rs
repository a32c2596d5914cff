//! txrisk-config
//!
//! Layered YAML config (rule catalogs, worker tuning) canonicalized and
//! SHA-256 hashed so a deployment's effective config is logged and
//! comparable across instances, plus environment-driven connection config
//! (`env::EnvConfig`) for the keys recognized in spec.md §6.

pub mod consumption;
pub mod env;

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
/// Later files override earlier files via deep-merge.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut sources = Vec::with_capacity(paths.len());
    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        sources.push(s);
    }
    let refs: Vec<&str> = sources.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

/// Same as [`load_layered_yaml`] but takes already-loaded YAML content —
/// used by tests and by the CLI when config is embedded rather than read
/// from disk.
pub fn load_layered_yaml_from_strings(yaml_sources: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for s in yaml_sources {
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(s).context("parse yaml failed")?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}
