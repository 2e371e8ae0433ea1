//! Scenario: Commit failure leaves no partial state
//!
//! # Invariant under test
//! A registered scan writes scan event, ledger, status and audit entry as one
//! unit. When the commit fails, none of them are visible afterwards, and the
//! error is retryable.
//!
//! Run: cargo test -p beacon-db --features testkit --test scenario_memory_store_rollback_on_commit_failure

use beacon_db::{always_proceed, MemoryStore, PresenceStore, StatusMutation};
use beacon_schemas::{AuditKind, NewSubject, Status};
use chrono::{TimeZone, Utc};

#[tokio::test]
async fn failed_scan_commit_is_invisible() {
    let store = MemoryStore::new();
    let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
    let created = store
        .insert_subject(
            &NewSubject {
                display_name: "Bea".into(),
                department: "EE".into(),
                token_id: "CD34".into(),
            },
            "CD34",
            t0,
        )
        .await
        .unwrap();
    let audit_before = store.recent_audit(100).await.unwrap();
    let scans_before = store.scan_event_count().unwrap();

    store.inject_commit_failures(1);
    let err = store
        .record_registered_scan(&created.subject, "CD34", Status::Busy, t0)
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");

    assert_eq!(store.last_scan(created.subject.id).await.unwrap(), None);
    assert_eq!(
        store.get_status(created.subject.id).await.unwrap().unwrap().status,
        Status::Offline
    );
    assert_eq!(store.recent_audit(100).await.unwrap(), audit_before);
    assert_eq!(store.scan_event_count().unwrap(), scans_before);

    // next attempt succeeds
    let ok = store
        .record_registered_scan(&created.subject, "CD34", Status::Busy, t0)
        .await
        .unwrap();
    assert_eq!(ok.record.status, Status::Busy);
    assert_eq!(store.last_scan(created.subject.id).await.unwrap(), Some(t0));
}

#[tokio::test]
async fn failed_status_commit_is_invisible() {
    let store = MemoryStore::new();
    let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
    let created = store
        .insert_subject(
            &NewSubject {
                display_name: "Cid".into(),
                department: "ME".into(),
                token_id: "EF56".into(),
            },
            "EF56",
            t0,
        )
        .await
        .unwrap();

    store.inject_commit_failures(1);
    let res = store
        .apply_status(StatusMutation {
            subject_id: created.subject.id,
            status: Status::Available,
            kind: AuditKind::StatusChange,
            message: "Status changed to Available".into(),
            ts: t0,
            precheck: &always_proceed,
        })
        .await;
    assert!(res.is_err());
    assert_eq!(
        store.get_status(created.subject.id).await.unwrap().unwrap().status,
        Status::Offline
    );
    assert_eq!(store.recent_audit(100).await.unwrap().len(), 1);
}
