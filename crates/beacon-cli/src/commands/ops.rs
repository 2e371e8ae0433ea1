//! Operator commands: sweep, gate inspection, status and audit.

use anyhow::{Context, Result};
use beacon_config::BeaconConfig;
use beacon_schemas::{Status, SubjectId};

use super::{opt_dt, parse_ts, pg_engine};

// ---------------------------------------------------------------------------
// sweep next / sweep run
// ---------------------------------------------------------------------------

pub fn sweep_next(cfg: &BeaconConfig, now: Option<&str>) -> Result<()> {
    let schedule = cfg.sweep.schedule()?;
    let now = parse_ts(now)?;
    let next = schedule.next_fire_after(now);
    println!("sweep_enabled={}", cfg.sweep.enabled);
    println!("timezone={}", schedule.timezone().name());
    println!("next_sweep_utc={}", next.to_rfc3339());
    println!(
        "next_sweep_local={}",
        next.with_timezone(&schedule.timezone()).to_rfc3339()
    );
    Ok(())
}

pub async fn sweep_run(cfg: &BeaconConfig, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "REFUSING SWEEP: this sets every non-Offline subject Offline now. Re-run with --yes"
        );
    }
    let engine = pg_engine(cfg).await?;
    let report = engine.sweep_now().await?;
    println!("ran_at_utc={}", report.ran_at.to_rfc3339());
    println!("examined={}", report.examined);
    println!("set_offline={}", report.set_offline);
    println!("skipped={}", report.skipped);
    println!("failed={}", report.failed);
    Ok(())
}

// ---------------------------------------------------------------------------
// gate check
// ---------------------------------------------------------------------------

/// Evaluate the scan window for a given last scan, without a store.
pub fn gate_check(cfg: &BeaconConfig, last_scan: Option<&str>, now: Option<&str>) -> Result<()> {
    let last_scan = last_scan.map(|s| parse_ts(Some(s))).transpose()?;
    let now = parse_ts(now)?;
    let v = beacon_gate::scan_validity(&cfg.gate.gate_config(), last_scan, now);
    println!("window_secs={}", cfg.gate.window_secs);
    println!("allowed={}", v.allowed);
    println!("last_scan_utc={}", opt_dt(&v.last_scan));
    println!(
        "elapsed_secs={}",
        v.elapsed_secs.map(|s| s.to_string()).unwrap_or_default()
    );
    println!("message={}", v.message);
    Ok(())
}

// ---------------------------------------------------------------------------
// status show / status set
// ---------------------------------------------------------------------------

pub async fn status_show(cfg: &BeaconConfig, subject_id: SubjectId) -> Result<()> {
    let engine = pg_engine(cfg).await?;
    let record = engine.get_status(subject_id).await?;
    let validity = engine.get_scan_validity(subject_id).await?;
    println!("subject_id={}", record.subject_id);
    println!("status={}", record.status);
    println!("last_updated_utc={}", record.last_updated.to_rfc3339());
    println!("can_change_status={}", validity.allowed);
    println!("last_scan_utc={}", opt_dt(&validity.last_scan));
    Ok(())
}

/// Ungated write on behalf of the operator.
pub async fn status_set(cfg: &BeaconConfig, subject_id: SubjectId, status: &str) -> Result<()> {
    let status = Status::parse(status).with_context(|| {
        format!("invalid --status '{status}'. expected one of: Available | Busy | Offline")
    })?;
    let engine = pg_engine(cfg).await?;
    let record = engine.set_status(subject_id, status).await?;
    println!(
        "status_set=true subject_id={} status={} last_updated_utc={}",
        record.subject_id,
        record.status,
        record.last_updated.to_rfc3339()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// audit tail
// ---------------------------------------------------------------------------

pub async fn audit_tail(cfg: &BeaconConfig, limit: Option<usize>) -> Result<()> {
    let engine = pg_engine(cfg).await?;
    for e in engine.get_recent_audit(limit).await? {
        println!(
            "{} subject_id={} kind={} {}",
            e.ts_utc.to_rfc3339(),
            e.subject_id,
            e.kind.as_str(),
            e.message
        );
    }
    Ok(())
}
