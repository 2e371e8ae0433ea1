//! Command handler modules for beacon-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod buffer;
pub mod ops;

use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_audit::UnregisteredBuffer;
use beacon_config::{
    report_unused_keys, resolve_secrets, BeaconConfig, LoadedConfig, UnusedKeyPolicy,
};
use beacon_db::PgStore;
use beacon_engine::{EngineSettings, PresenceEngine, SystemClock};
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Layered paths when given, else `BEACON_CONFIG`, else defaults.
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        return beacon_config::load_from_env();
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    beacon_config::load_layered_yaml(&path_refs)
}

/// Print unused keys to stderr. `strict` turns them into an error.
pub fn check_unused(loaded: &LoadedConfig, strict: bool) -> Result<usize> {
    let policy = if strict {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(&loaded.config_json, policy)?;
    if !report.is_clean() {
        eprintln!(
            "WARN: CONFIG_UNUSED_KEYS unused_leaf_keys={}",
            report.unused_leaf_pointers.len()
        );
        for p in report.unused_leaf_pointers.iter().take(50) {
            eprintln!("  unused={}", p);
        }
    }
    Ok(report.unused_leaf_pointers.len())
}

/// Load, warn on unused keys, and validate.
pub fn load_typed(paths: &[String]) -> Result<BeaconConfig> {
    let loaded = load_config(paths)?;
    check_unused(&loaded, false)?;
    loaded.typed()
}

/// Engine over Postgres for one-shot operator commands. The unregistered
/// buffer is not loaded; these commands never touch it.
pub async fn pg_engine(cfg: &BeaconConfig) -> Result<PresenceEngine> {
    let secrets = resolve_secrets(cfg);
    let url = secrets.database_url.with_context(|| {
        format!(
            "missing env var {} (operator commands need Postgres)",
            cfg.storage.database_url_env
        )
    })?;
    let pool = beacon_db::connect(&url).await?;
    beacon_db::migrate(&pool).await?;
    Ok(PresenceEngine::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(UnregisteredBuffer::in_memory(1)),
        Arc::new(SystemClock),
        EngineSettings::from(cfg),
    ))
}

pub fn parse_ts(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        None => Ok(Utc::now()),
        Some(s) => Ok(DateTime::parse_from_rfc3339(s.trim())
            .with_context(|| format!("invalid RFC 3339 timestamp: {s}"))?
            .with_timezone(&Utc)),
    }
}

pub fn opt_dt(dt: &Option<DateTime<Utc>>) -> String {
    dt.as_ref().map(|d| d.to_rfc3339()).unwrap_or_default()
}
