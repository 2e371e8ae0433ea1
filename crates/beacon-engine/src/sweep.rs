//! Daily auto-offline sweep driver.
//!
//! The schedule and once-per-day latch are pure (`beacon_gate`); this module
//! only ticks them against the engine clock and runs the sweep when due.

use std::sync::Arc;
use std::time::Duration;

use beacon_gate::{SweepLatch, SweepSchedule};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::PresenceEngine;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub ran_at: DateTime<Utc>,
    /// Subjects listed as non-Offline when the sweep started.
    pub examined: usize,
    pub set_offline: usize,
    /// Already Offline (or gone) by the time the write ran.
    pub skipped: usize,
    pub failed: usize,
}

/// One scheduler tick. Runs the sweep at most once per local date.
///
/// The latch is set before the sweep runs, so a failed sweep is not retried
/// the same day; the failure is logged and the next day's run covers it.
pub async fn run_sweep_tick(
    engine: &PresenceEngine,
    schedule: &SweepSchedule,
    latch: &mut SweepLatch,
) -> Option<(NaiveDate, SweepReport)> {
    let date = latch.poll(schedule, engine.now())?;
    info!(local_date = %date, tz = schedule.timezone().name(), "daily sweep due");
    match engine.sweep_now().await {
        Ok(report) => Some((date, report)),
        Err(err) => {
            error!(local_date = %date, error = %err, "daily sweep failed");
            None
        }
    }
}

/// Spawn the sweep scheduler. Ticks every `interval`; the latch fires when a
/// trigger falls between two ticks.
pub fn spawn_sweep_loop(
    engine: Arc<PresenceEngine>,
    schedule: SweepSchedule,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut latch = SweepLatch::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            hour = schedule.hour(),
            minute = schedule.minute(),
            tz = schedule.timezone().name(),
            next = %schedule.next_fire_after(engine.now()),
            "sweep scheduler started"
        );
        loop {
            ticker.tick().await;
            run_sweep_tick(&engine, &schedule, &mut latch).await;
        }
    })
}
