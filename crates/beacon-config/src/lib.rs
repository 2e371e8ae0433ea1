//! Layered configuration for the presence engine.
//!
//! YAML documents are merged in order (earlier = base, later = override),
//! converted to JSON, checked for literal secrets, and hashed. The typed view
//! ([`BeaconConfig`]) is extracted from the merged JSON and validated.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

mod consumption;
mod secrets;
mod settings;

pub use consumption::{consumed_pointers, report_unused_keys, UnusedKeyPolicy, UnusedKeyReport};
pub use secrets::{resolve_secrets, ResolvedSecrets};
pub use settings::{
    AuditSettings, AuthSettings, BeaconConfig, DaemonSettings, GateSettings, StorageSettings,
    SweepSettings, UnregisteredSettings,
};

/// Comma-separated list of YAML paths, merge order left to right.
pub const ENV_CONFIG_PATHS: &str = "BEACON_CONFIG";

/// Leaf values starting with any of these abort loading with
/// CONFIG_SECRET_DETECTED. Config carries env var names only; values come
/// from [`resolve_secrets`].
const SECRET_PREFIXES: [&str; 12] = [
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
    "postgres://",
    "postgresql://",
];

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed, validated view. Missing sections fall back to defaults.
    pub fn typed(&self) -> Result<BeaconConfig> {
        let cfg: BeaconConfig = serde_json::from_value(self.config_json.clone())
            .context("config does not match the expected shape")?;
        cfg.validate()?;
        Ok(cfg)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("read config layer {p}")))
        .collect::<Result<Vec<String>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());
    for (idx, raw) in yaml_docs.iter().enumerate() {
        let layer: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("config layer {idx} is not yaml"))?;
        // Empty layer: nothing to override.
        if layer.is_null() {
            continue;
        }
        let layer = serde_json::to_value(layer)
            .with_context(|| format!("config layer {idx} has no json form"))?;
        overlay(&mut merged, layer);
    }

    if let Some(leaf) = first_secret_leaf(&merged) {
        bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", leaf);
    }

    // serde_json::Map is a BTreeMap here, so keys come out sorted.
    let canonical_json = serde_json::to_string(&merged).context("serialize merged config")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Load from `BEACON_CONFIG` if set, else defaults only.
pub fn load_from_env() -> Result<LoadedConfig> {
    let raw = std::env::var(ENV_CONFIG_PATHS).unwrap_or_default();
    let paths: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paths.is_empty() {
        return load_layered_yaml_from_strings(&[]);
    }
    load_layered_yaml(&paths)
}

/// Objects merge key by key; anything else in `top` replaces `base`.
fn overlay(base: &mut Value, top: Value) {
    match (base, top) {
        (Value::Object(base_map), Value::Object(top_map)) => {
            for (k, v) in top_map {
                match base_map.get_mut(&k) {
                    Some(slot) => overlay(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, top) => *slot = top,
    }
}

fn first_secret_leaf(v: &Value) -> Option<String> {
    let mut hit = None;
    consumption::walk(v, String::new(), &mut |ptr, leaf| {
        if hit.is_none() && leaf.as_str().is_some_and(looks_like_secret) {
            hit = Some(ptr.to_string());
        }
    });
    hit
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    t.len() >= 8 && SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_replaces_scalars_and_merges_maps() {
        let mut base = serde_json::json!({ "gate": { "window_secs": 60, "x": 1 } });
        overlay(&mut base, serde_json::json!({ "gate": { "window_secs": 90 } }));
        assert_eq!(base, serde_json::json!({ "gate": { "window_secs": 90, "x": 1 } }));
    }

    #[test]
    fn short_values_are_not_secrets() {
        assert!(!looks_like_secret("sk-1"));
        assert!(looks_like_secret("  AKIAABCDEFGH"));
    }
}
