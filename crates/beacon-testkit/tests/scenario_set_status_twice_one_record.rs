//! Scenario: Repeated status writes
//!
//! # Invariant under test
//! Two accepted writes leave one StatusRecord carrying the latest
//! `lastUpdated`, and exactly one audit entry per accepted call.

use beacon_schemas::{AuditKind, Status};
use beacon_testkit::Harness;
use chrono::Duration;

#[tokio::test]
async fn two_writes_one_record_two_entries() {
    let h = Harness::new();
    let s = h.subject("Twice", "TW1").await.unwrap();

    h.engine.set_status(s.id, Status::Busy).await.unwrap();
    h.clock.advance(Duration::seconds(30));
    let second = h.engine.set_status(s.id, Status::Busy).await.unwrap();

    let rec = h.engine.get_status(s.id).await.unwrap();
    assert_eq!(rec, second);
    assert_eq!(rec.last_updated, h.engine.now());

    let changes: Vec<_> = h
        .engine
        .get_recent_audit(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == AuditKind::StatusChange)
        .collect();
    assert_eq!(changes.len(), 2);
    assert!(changes[0].ts_utc > changes[1].ts_utc);
}

#[tokio::test]
async fn last_updated_never_moves_backwards() {
    let h = Harness::new();
    let s = h.subject("Skew", "SKW1").await.unwrap();
    let first = h.engine.set_status(s.id, Status::Busy).await.unwrap();

    h.clock.advance(Duration::seconds(-90));
    let second = h.engine.set_status(s.id, Status::Available).await.unwrap();
    assert_eq!(second.last_updated, first.last_updated);
    assert_eq!(second.status, Status::Available);
}
