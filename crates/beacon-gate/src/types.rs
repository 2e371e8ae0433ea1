use std::fmt;

use serde::{Deserialize, Serialize};

/// Gate policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateConfig {
    /// A scan older than this many seconds no longer proves presence.
    pub window_secs: i64,
}

impl GateConfig {
    pub fn window_secs(window_secs: i64) -> Self {
        debug_assert!(window_secs > 0);
        Self { window_secs }
    }
}

/// Who is asking. Resolved at the trust boundary (daemon auth, CLI operator),
/// never from a request body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    /// Ordinary client (mobile app, kiosk). Must prove presence.
    Client,
    /// Operator / admin credential. May bypass the scan window.
    Privileged,
}

impl CallerRole {
    pub fn is_privileged(&self) -> bool {
        matches!(self, CallerRole::Privileged)
    }
}

/// Decision returned by [`crate::authorize`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allow(AllowBasis),
    Deny(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow(_))
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            GateDecision::Deny(r) => Some(r),
            GateDecision::Allow(_) => None,
        }
    }
}

/// Why a transition was allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllowBasis {
    /// Privileged caller asked to skip the scan check.
    Bypass,
    /// Requested status does not assert presence (Offline).
    NoPresenceRequired,
    /// A scan inside the window.
    RecentScan { elapsed_secs: i64 },
}

/// Why a transition was refused. Expected outcome, not a fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DenyReason {
    NoScanOnRecord,
    WindowExpired { elapsed_secs: i64, window_secs: i64 },
    /// `bypass` was requested by a non-privileged caller.
    BypassNotPermitted,
}

impl DenyReason {
    /// Seconds since the last scan, when there was one.
    pub fn elapsed_secs(&self) -> Option<i64> {
        match self {
            DenyReason::WindowExpired { elapsed_secs, .. } => Some(*elapsed_secs),
            _ => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::NoScanOnRecord => "no_scan_on_record",
            DenyReason::WindowExpired { .. } => "scan_window_expired",
            DenyReason::BypassNotPermitted => "bypass_not_permitted",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoScanOnRecord => f.write_str("no scan on record"),
            DenyReason::WindowExpired {
                elapsed_secs,
                window_secs,
            } => write!(
                f,
                "last scan was {} ago ({}s); scan again to change status (window {}s)",
                human_elapsed(*elapsed_secs),
                elapsed_secs,
                window_secs
            ),
            DenyReason::BypassNotPermitted => {
                f.write_str("bypass requires a privileged caller")
            }
        }
    }
}

/// `7260` -> `"2h 1m"`, `59` -> `"0m 59s"`.
pub fn human_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    if h > 0 {
        format!("{h}h {m}m")
    } else {
        format!("{m}m {}s", secs % 60)
    }
}

/// Elapsed seconds as hours rounded to two decimals (wire field `hoursAgo`).
pub fn hours_ago(elapsed_secs: i64) -> f64 {
    ((elapsed_secs.max(0) as f64 / 3600.0) * 100.0).round() / 100.0
}
