//! Offline access to the unregistered-scan snapshot file.
//!
//! Run these with the daemon stopped; the daemon rewrites the file on every
//! push and on shutdown.

use std::path::PathBuf;

use anyhow::{Context, Result};
use beacon_audit::UnregisteredBuffer;
use beacon_config::BeaconConfig;

fn snapshot_path(cfg: &BeaconConfig, path: Option<PathBuf>) -> Result<PathBuf> {
    path.or_else(|| cfg.unregistered.snapshot_path.clone())
        .context("no snapshot path: pass --path or set unregistered.snapshot_path")
}

// ---------------------------------------------------------------------------
// buffer show
// ---------------------------------------------------------------------------

pub async fn buffer_show(cfg: &BeaconConfig, path: Option<PathBuf>, json: bool) -> Result<()> {
    let path = snapshot_path(cfg, path)?;
    let buffer = UnregisteredBuffer::restore(&path, cfg.unregistered.capacity).await;
    let snap = buffer.snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(snap.as_ref())?);
        return Ok(());
    }

    println!("path={}", path.display());
    println!("records={}", snap.len());
    for r in snap.iter() {
        println!("{} token={} {}", r.ts_utc.to_rfc3339(), r.token_id, r.message);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// buffer clear
// ---------------------------------------------------------------------------

pub async fn buffer_clear(cfg: &BeaconConfig, path: Option<PathBuf>, yes: bool) -> Result<()> {
    let path = snapshot_path(cfg, path)?;
    if !yes {
        anyhow::bail!(
            "REFUSING CLEAR: this discards every unregistered record in {}. Re-run with --yes",
            path.display()
        );
    }
    let buffer = UnregisteredBuffer::restore(&path, cfg.unregistered.capacity).await;
    let removed = buffer.clear().await?;
    println!("cleared=true removed={} path={}", removed, path.display());
    Ok(())
}
