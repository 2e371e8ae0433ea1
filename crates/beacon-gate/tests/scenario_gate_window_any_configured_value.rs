//! Scenario: the gate window holds for any configured value.
//!
//! # Invariant under test
//!
//! For every window `w > 0`:
//! - a scan at `t` allows a presence status at `t` and at `t + w`;
//! - the same request at `t + w + 1` is denied, and the denial carries the
//!   elapsed seconds.
//!
//! The short test window and the long production window are both just
//! configuration; nothing in the gate special-cases either.

use beacon_gate::*;
use beacon_schemas::Status;
use chrono::{Duration, TimeZone, Utc};

const WINDOWS: &[i64] = &[1, 2, 10, 60, 3_600, 7_200, 86_400];

#[test]
fn scenario_gate_window_any_configured_value() {
    let scan = Utc.with_ymd_and_hms(2026, 1, 5, 7, 30, 0).unwrap();

    for &w in WINDOWS {
        let cfg = GateConfig::window_secs(w);
        for status in [Status::Available, Status::Busy] {
            let now = authorize(&cfg, CallerRole::Client, status, false, Some(scan), scan);
            assert!(now.is_allowed(), "w={w}: immediately after scan must allow");

            let edge = authorize(
                &cfg,
                CallerRole::Client,
                status,
                false,
                Some(scan),
                scan + Duration::seconds(w),
            );
            assert!(edge.is_allowed(), "w={w}: boundary must allow");

            let late = authorize(
                &cfg,
                CallerRole::Client,
                status,
                false,
                Some(scan),
                scan + Duration::seconds(w + 1),
            );
            let reason = late.deny_reason().expect("past window must deny");
            assert_eq!(reason.elapsed_secs(), Some(w + 1));
            assert!(reason.to_string().contains(&format!("({}s)", w + 1)));
        }
    }
}

#[test]
fn scenario_validity_agrees_with_authorize_across_timeline() {
    let cfg = GateConfig::window_secs(30);
    let scan = Utc.with_ymd_and_hms(2026, 1, 5, 7, 30, 0).unwrap();

    for offset in [0_i64, 1, 15, 29, 30, 31, 45, 600] {
        let now = scan + Duration::seconds(offset);
        let d = authorize(&cfg, CallerRole::Client, Status::Available, false, Some(scan), now);
        let v = scan_validity(&cfg, Some(scan), now);
        assert_eq!(d.is_allowed(), v.allowed, "offset={offset}");
        assert_eq!(v.elapsed_secs, Some(offset));
    }
}
