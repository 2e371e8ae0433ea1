//! Scenario: Gate bypass
//!
//! # Invariant under test
//! - A privileged caller may set a presence-asserting status with no scan.
//! - The same request from a client is refused (`bypass_not_permitted`),
//!   even when the client has a fresh scan.

use beacon_engine::{EngineError, ScanInput};
use beacon_gate::{CallerRole, DenyReason};
use beacon_schemas::{AuditKind, Status};
use beacon_testkit::Harness;

#[tokio::test]
async fn privileged_bypass_allowed_without_scan() {
    let h = Harness::new();
    let s = h.subject("Admin Override", "ADM1").await.unwrap();

    let rec = h
        .engine
        .request_status(s.id, Status::Available, CallerRole::Privileged, true)
        .await
        .unwrap();
    assert_eq!(rec.status, Status::Available);
    let feed = h.engine.get_recent_audit(Some(1)).await.unwrap();
    assert_eq!(feed[0].kind, AuditKind::StatusChange);
}

#[tokio::test]
async fn client_bypass_refused_even_with_fresh_scan() {
    let h = Harness::new();
    let s = h.subject("Sneaky", "SNK1").await.unwrap();
    h.engine.accept(ScanInput::token("SNK1")).await.unwrap();

    let err = h
        .engine
        .request_status(s.id, Status::Available, CallerRole::Client, true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::GateDenied(DenyReason::BypassNotPermitted)
    ));
    // the scan set Busy; the refused request changed nothing
    assert_eq!(h.engine.get_status(s.id).await.unwrap().status, Status::Busy);
}

#[tokio::test]
async fn privileged_without_bypass_still_needs_scan() {
    let h = Harness::new();
    let s = h.subject("Rule Follower", "RF1").await.unwrap();
    let err = h
        .engine
        .request_status(s.id, Status::Busy, CallerRole::Privileged, false)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::GateDenied(DenyReason::NoScanOnRecord)));
}
