//! Daemon-wide state handed to every handler as `State<Arc<AppState>>`.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use beacon_engine::PresenceEngine;
use beacon_schemas::AuditEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::auth::PrivilegedAuth;

const BUS_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// BusMsg
// ---------------------------------------------------------------------------

/// One SSE frame on `/v1/stream`. `event_name` is the SSE event field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Audit(AuditEntry),
    /// Operator actions that leave no audit entry (buffer clear, manual sweep summary).
    OperatorNotice { level: String, msg: String },
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Audit(_) => "audit",
            BusMsg::OperatorNotice { .. } => "notice",
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub engine: Arc<PresenceEngine>,
    pub auth: PrivilegedAuth,
}

impl AppState {
    pub fn new(engine: Arc<PresenceEngine>, auth: PrivilegedAuth) -> Self {
        Self {
            bus: broadcast::channel(BUS_CAPACITY).0,
            build: BuildInfo {
                service: "beacon-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            engine,
            auth,
        }
    }

    /// Best effort: no subscribers is not an error.
    pub fn notify(&self, level: &str, msg: impl Into<String>) {
        let _ = self.bus.send(BusMsg::OperatorNotice {
            level: level.to_string(),
            msg: msg.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Seconds since the first call in this process.
pub fn uptime_secs() -> u64 {
    static STARTED: OnceLock<Instant> = OnceLock::new();
    STARTED.get_or_init(Instant::now).elapsed().as_secs()
}

pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let ts_millis = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis });
        }
    })
}

/// Relay committed audit entries onto the bus. A lagging relay drops frames;
/// `/v1/audit` stays authoritative.
pub fn spawn_audit_forwarder(
    engine: &PresenceEngine,
    bus: broadcast::Sender<BusMsg>,
) -> JoinHandle<()> {
    let mut rx = engine.subscribe_audit();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(entry) => {
                    let _ = bus.send(BusMsg::Audit(entry));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "audit forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
