//! Scenario: Window expires between check and write
//!
//! # Invariant under test
//! - The up-front gate check passes, but by the time the write holds the
//!   subject lock the scan window has run out: the write is refused with the
//!   elapsed time seen under the lock, and nothing is written.
//! - The same lag inside the window still applies the write.
//! - Operator bypass is unaffected by the lag.

use beacon_engine::{EngineError, ScanInput};
use beacon_gate::{CallerRole, DenyReason};
use beacon_schemas::{AuditKind, Status};
use beacon_testkit::Harness;
use chrono::Duration;

#[tokio::test]
async fn expiry_under_the_lock_refuses_and_writes_nothing() {
    let h = Harness::with_write_lag(60, Duration::seconds(30));
    let s = h.subject("Dr. Cruz", "CRUZ1").await.unwrap();
    h.engine.accept(ScanInput::token("CRUZ1")).await.unwrap();

    h.clock.advance(Duration::seconds(45));
    let up_front = h
        .engine
        .authorize(s.id, Status::Available, CallerRole::Client, false)
        .await
        .unwrap();
    assert!(up_front.is_allowed(), "45s is inside a 60s window");

    let err = h
        .engine
        .request_status(s.id, Status::Available, CallerRole::Client, false)
        .await
        .unwrap_err();
    match err {
        EngineError::GateDenied(DenyReason::WindowExpired {
            elapsed_secs,
            window_secs,
        }) => {
            assert_eq!(elapsed_secs, 75);
            assert_eq!(window_secs, 60);
        }
        other => panic!("expected WindowExpired, got {other:?}"),
    }

    assert_eq!(h.engine.get_status(s.id).await.unwrap().status, Status::Busy);
    let changes = h
        .engine
        .get_recent_audit(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == AuditKind::StatusChange)
        .count();
    assert_eq!(changes, 0);
}

#[tokio::test]
async fn lag_inside_the_window_still_applies() {
    let h = Harness::with_write_lag(60, Duration::seconds(30));
    let s = h.subject("Dr. Lim", "LIM1").await.unwrap();
    h.engine.accept(ScanInput::token("LIM1")).await.unwrap();

    h.clock.advance(Duration::seconds(10));
    let rec = h
        .engine
        .request_status(s.id, Status::Available, CallerRole::Client, false)
        .await
        .unwrap();
    assert_eq!(rec.status, Status::Available);
}

#[tokio::test]
async fn bypass_ignores_the_lag() {
    let h = Harness::with_write_lag(60, Duration::seconds(30));
    let s = h.subject("Dr. Tan", "TAN1").await.unwrap();
    h.engine.accept(ScanInput::token("TAN1")).await.unwrap();

    h.clock.advance(Duration::seconds(45));
    let rec = h
        .engine
        .request_status(s.id, Status::Available, CallerRole::Privileged, true)
        .await
        .unwrap();
    assert_eq!(rec.status, Status::Available);
}
