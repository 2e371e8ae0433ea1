use beacon_schemas::{ScanValidity, Status};
use chrono::{DateTime, Utc};

use crate::{AllowBasis, CallerRole, DenyReason, GateConfig, GateDecision};

fn elapsed_secs(last_scan: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    // A scan stamped slightly ahead of `now` (clock skew between hosts)
    // counts as fresh, never as negative age.
    now.signed_duration_since(last_scan).num_seconds().max(0)
}

/// Decide whether a subject may move to `requested`.
///
/// Inputs:
/// - role: resolved caller role (see [`CallerRole`])
/// - bypass: caller asked to skip the scan check
/// - last_scan: most recent registered scan for the subject, if any
/// - now: evaluation instant supplied by the caller
///
/// Rules, in order:
/// 1. `bypass` from a privileged caller always allows; from anyone else it is refused.
/// 2. Offline never needs a scan.
/// 3. No scan on record denies.
/// 4. `elapsed > window_secs` denies; `elapsed == window_secs` still allows.
pub fn authorize(
    cfg: &GateConfig,
    role: CallerRole,
    requested: Status,
    bypass: bool,
    last_scan: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> GateDecision {
    if bypass {
        return if role.is_privileged() {
            GateDecision::Allow(AllowBasis::Bypass)
        } else {
            GateDecision::Deny(DenyReason::BypassNotPermitted)
        };
    }

    if !requested.requires_presence() {
        return GateDecision::Allow(AllowBasis::NoPresenceRequired);
    }

    let Some(scan_ts) = last_scan else {
        return GateDecision::Deny(DenyReason::NoScanOnRecord);
    };

    let elapsed = elapsed_secs(scan_ts, now);
    if elapsed > cfg.window_secs {
        return GateDecision::Deny(DenyReason::WindowExpired {
            elapsed_secs: elapsed,
            window_secs: cfg.window_secs,
        });
    }

    GateDecision::Allow(AllowBasis::RecentScan {
        elapsed_secs: elapsed,
    })
}

/// Read-only view of the gate for client pre-flight checks.
///
/// Mirrors `authorize(cfg, Client, Available, false, last_scan, now)`.
/// Consistent with the real decision modulo the race between this read and
/// the later write.
pub fn scan_validity(
    cfg: &GateConfig,
    last_scan: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> ScanValidity {
    let decision = authorize(
        cfg,
        CallerRole::Client,
        Status::Available,
        false,
        last_scan,
        now,
    );
    let elapsed = last_scan.map(|ts| elapsed_secs(ts, now));

    let message = match &decision {
        GateDecision::Allow(AllowBasis::RecentScan { elapsed_secs }) => format!(
            "scan valid; {}s remaining",
            (cfg.window_secs - elapsed_secs).max(0)
        ),
        GateDecision::Allow(_) => "scan valid".to_string(),
        GateDecision::Deny(reason) => reason.to_string(),
    };

    ScanValidity {
        allowed: decision.is_allowed(),
        last_scan,
        elapsed_secs: elapsed,
        message,
    }
}
