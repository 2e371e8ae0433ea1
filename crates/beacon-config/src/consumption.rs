//! Unused-key guard.
//!
//! The consumed set is every leaf of the serialized default [`BeaconConfig`],
//! so it cannot drift from the typed view. A leaf in the merged YAML that
//! is not at or under a consumed pointer is a typo, a stale key, or a
//! section nothing reads.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::BeaconConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Sorted, unique.
    pub consumed_prefixes: Vec<String>,
    /// Sorted, unique.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// JSON pointers of every setting [`BeaconConfig`] reads.
pub fn consumed_pointers() -> Result<BTreeSet<String>> {
    let defaults =
        serde_json::to_value(BeaconConfig::default()).context("serialize default config")?;
    Ok(leaf_pointers(&defaults).into_iter().collect())
}

/// `Fail` errors when anything is unused; `Warn` always returns the report.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed = consumed_pointers()?;

    let unused: BTreeSet<String> = leaf_pointers(config_json)
        .into_iter()
        .filter(|leaf| !consumed.iter().any(|c| covers(c, leaf)))
        .collect();

    let report = UnusedKeyReport {
        consumed_prefixes: consumed.into_iter().collect(),
        unused_leaf_pointers: unused.into_iter().collect(),
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let preview: Vec<&str> = report
            .unused_leaf_pointers
            .iter()
            .take(12)
            .map(String::as_str)
            .collect();
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config leaf key(s). \
            Remove them or read them in BeaconConfig. First few: {:?}",
            report.unused_leaf_pointers.len(),
            preview
        );
    }

    Ok(report)
}

/// "/a/b" covers "/a/b" and "/a/b/0" but not "/a/bc".
fn covers(consumed: &str, leaf: &str) -> bool {
    match leaf.strip_prefix(consumed) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// RFC 6901 pointers to every scalar (and empty container) under `v`.
pub(crate) fn leaf_pointers(v: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk(v, String::new(), &mut |ptr, _| out.push(ptr.to_string()));
    out
}

/// Visit each leaf with its pointer. The root scalar's pointer is "/".
pub(crate) fn walk(v: &Value, ptr: String, visit: &mut dyn FnMut(&str, &Value)) {
    match v {
        Value::Object(map) if !map.is_empty() => {
            for (k, child) in map {
                let token = k.replace('~', "~0").replace('/', "~1");
                walk(child, format!("{ptr}/{token}"), visit);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                walk(child, format!("{ptr}/{i}"), visit);
            }
        }
        leaf => {
            let ptr = if ptr.is_empty() { "/" } else { ptr.as_str() };
            visit(ptr, leaf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_respects_segment_boundary() {
        assert!(covers("/gate/window_secs", "/gate/window_secs"));
        assert!(covers("/daemon/addr", "/daemon/addr/0"));
        assert!(!covers("/gate/window_secs", "/gate/window_secs_x"));
        assert!(!covers("/gate", "/gateway/x"));
    }

    #[test]
    fn consumed_set_tracks_typed_defaults() {
        let c = consumed_pointers().unwrap();
        assert!(c.contains("/gate/window_secs"));
        assert!(c.contains("/unregistered/snapshot_path"));
        assert!(c.contains("/storage/database_url_env"));
        assert!(!c.iter().any(|p| p == "/gate"));
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        let v = serde_json::json!({ "a/b": { "c~d": 1 } });
        assert_eq!(leaf_pointers(&v), vec!["/a~1b/c~0d".to_string()]);
    }
}
