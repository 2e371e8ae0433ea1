//! Scenario: HTTP surface over the presence engine
//!
//! # Invariant under test
//!
//! Each route maps 1:1 to an engine operation and the engine's error kinds
//! map to stable HTTP codes:
//!
//! - unregistered tokens answer 200 with `outcome = unregistered`
//! - gate denials answer 403 with the elapsed time since the last scan
//! - operator routes answer 403 `privileged_caller` without the bearer token
//! - invalid input answers 400, unknown subjects 404
//!
//! All tests are pure in-process (MemoryStore + ManualClock); no DB or
//! network required.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use beacon_daemon::{auth::PrivilegedAuth, routes, state::AppState};
use beacon_testkit::Harness;
use chrono::Duration;
use http_body_util::BodyExt;
use tower::ServiceExt; // oneshot

const OPERATOR_TOKEN: &str = "test-operator-token";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn app(h: &Harness) -> Arc<AppState> {
    Arc::new(AppState::new(
        Arc::clone(&h.engine),
        PrivilegedAuth::from_token(OPERATOR_TOKEN),
    ))
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn with_operator(mut req: Request<axum::body::Body>) -> Request<axum::body::Body> {
    req.headers_mut().insert(
        "authorization",
        format!("Bearer {OPERATOR_TOKEN}").parse().unwrap(),
    );
    req
}

// ---------------------------------------------------------------------------
// 1. Health reports the store backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_memory_store() {
    let h = Harness::new();
    let (status, body) = call(routes::build_router(app(&h)), get("/v1/health")).await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "beacon-daemon");
    assert_eq!(json["store"], "memory");
    assert_eq!(json["privileged_auth"], true);
}

// ---------------------------------------------------------------------------
// 2. Scans: registered sets Busy, unregistered lands in the buffer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registered_scan_sets_busy_and_unregistered_is_buffered() {
    let h = Harness::new();
    let s = h.subject("Dr. Reyes", "E200-1AFF").await.unwrap();
    let st = app(&h);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": " e2001aff " })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["outcome"], "registered");
    assert_eq!(json["subject"]["id"], s.id);
    assert_eq!(json["status"]["status"], "Busy");

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": "ZZZ-404" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "unknown token is not an error");
    let json = parse_json(body);
    assert_eq!(json["outcome"], "unregistered");
    assert_eq!(json["record"]["tokenId"], "ZZZ404");

    let (status, body) = call(routes::build_router(Arc::clone(&st)), get("/v1/unregistered")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn blank_token_is_bad_request() {
    let h = Harness::new();
    let (status, body) = call(
        routes::build_router(app(&h)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": " -- " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json = parse_json(body);
    assert_eq!(json["code"], "invalid_input");
    assert_eq!(json["retryable"], false);
}

// ---------------------------------------------------------------------------
// 3. Gate: 403 with elapsed once the window has passed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_window_is_refused_with_elapsed() {
    let h = Harness::new();
    let s = h.subject("Dr. Cruz", "TAG-01").await.unwrap();
    let st = app(&h);
    let uri = format!("/v1/subjects/{}/status", s.id);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json(&uri, serde_json::json!({ "requestedStatus": "Available" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(parse_json(body)["gate"], "no_scan_on_record");

    call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": "TAG-01" })),
    )
    .await;

    h.clock.advance(Duration::minutes(30));
    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json(&uri, serde_json::json!({ "status": "Active" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "legacy Active accepted inside window");
    assert_eq!(parse_json(body)["status"], "Available");

    h.clock.advance(Duration::hours(2));
    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json(&uri, serde_json::json!({ "requestedStatus": "Busy" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let json = parse_json(body);
    assert_eq!(json["gate"], "scan_window_expired");
    assert_eq!(json["elapsed_secs"], 9000);
    assert_eq!(json["hours_ago"], 2.5);

    // Offline never needs a scan.
    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        post_json(&uri, serde_json::json!({ "requestedStatus": "Offline" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bypass_only_for_operator() {
    let h = Harness::new();
    let s = h.subject("Dr. Santos", "TAG-02").await.unwrap();
    let st = app(&h);
    let uri = format!("/v1/subjects/{}/status", s.id);
    let body = serde_json::json!({ "requestedStatus": "Available", "bypass": true });

    let (status, resp) = call(
        routes::build_router(Arc::clone(&st)),
        post_json(&uri, body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(parse_json(resp)["gate"], "bypass_not_permitted");

    let (status, resp) = call(
        routes::build_router(Arc::clone(&st)),
        with_operator(post_json(&uri, body)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(resp)["status"], "Available");
}

#[tokio::test]
async fn unknown_status_is_bad_request_and_unknown_subject_is_404() {
    let h = Harness::new();
    let s = h.subject("Dr. Lim", "TAG-03").await.unwrap();
    let st = app(&h);

    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        post_json(
            &format!("/v1/subjects/{}/status", s.id),
            serde_json::json!({ "requestedStatus": "OnLeave" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/subjects/9999/scan-validity"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(parse_json(body)["code"], "not_found");
}

// ---------------------------------------------------------------------------
// 4. Scan validity wire shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scan_validity_wire_shape() {
    let h = Harness::new();
    let s = h.subject("Dr. Tan", "TAG-04").await.unwrap();
    let st = app(&h);
    let uri = format!("/v1/subjects/{}/scan-validity", s.id);

    let (status, body) = call(routes::build_router(Arc::clone(&st)), get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["canChangeStatus"], false);
    assert!(json["lastScan"].is_null());
    assert!(json["hoursAgo"].is_null());

    call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": "TAG04" })),
    )
    .await;
    h.clock.advance(Duration::minutes(90));

    let (_, body) = call(routes::build_router(Arc::clone(&st)), get(&uri)).await;
    let json = parse_json(body);
    assert_eq!(json["canChangeStatus"], true);
    assert_eq!(json["elapsedSecs"], 5400);
    assert_eq!(json["hoursAgo"], 1.5);
    assert!(json["message"].is_string());
}

// ---------------------------------------------------------------------------
// 5. Operator-only routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn operator_routes_refuse_anonymous_callers() {
    let h = Harness::new();
    let st = app(&h);

    let anon = [
        post_json(
            "/v1/subjects",
            serde_json::json!({ "displayName": "X", "department": "Y", "tokenId": "T1" }),
        ),
        post_json("/v1/sweep/run", serde_json::json!({})),
        Request::builder()
            .method("DELETE")
            .uri("/v1/unregistered")
            .body(axum::body::Body::empty())
            .unwrap(),
    ];
    for req in anon {
        let uri = req.uri().to_string();
        let (status, body) = call(routes::build_router(Arc::clone(&st)), req).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(parse_json(body)["gate"], "privileged_caller", "{uri}");
    }

    // Wrong token is just as anonymous.
    let mut req = post_json("/v1/sweep/run", serde_json::json!({}));
    req.headers_mut()
        .insert("authorization", "Bearer nope".parse().unwrap());
    let (status, _) = call(routes::build_router(Arc::clone(&st)), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn operator_registers_sweeps_and_clears() {
    let h = Harness::new();
    let st = app(&h);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        with_operator(post_json(
            "/v1/subjects",
            serde_json::json!({ "displayName": "Dr. Go", "department": "CS", "tokenId": "tag-05" }),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let json = parse_json(body);
    assert_eq!(json["status"]["status"], "Offline");
    assert_eq!(json["audit"]["kind"], "created");

    call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": "TAG-05" })),
    )
    .await;
    call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": "stray" })),
    )
    .await;

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        with_operator(post_json("/v1/sweep/run", serde_json::json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["setOffline"], 1);

    let (_, body) = call(routes::build_router(Arc::clone(&st)), get("/v1/status-counts")).await;
    let json = parse_json(body);
    assert_eq!(json["offline"], 1);
    assert_eq!(json["busy"], 0);

    let req = Request::builder()
        .method("DELETE")
        .uri("/v1/unregistered")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = call(routes::build_router(Arc::clone(&st)), with_operator(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["removed"], 1);
    assert!(h.engine.unregistered_snapshot().is_empty());
}

// ---------------------------------------------------------------------------
// 6. Audit feed limits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_feed_is_newest_first_and_rejects_zero_limit() {
    let h = Harness::new();
    let s = h.subject("Dr. Uy", "TAG-06").await.unwrap();
    let st = app(&h);

    h.clock.advance(Duration::seconds(1));
    call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": "TAG-06" })),
    )
    .await;

    let (status, body) = call(routes::build_router(Arc::clone(&st)), get("/v1/audit?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"], "scan_registered");
    assert_eq!(entries[0]["subjectId"], s.id);

    let (status, _) = call(routes::build_router(Arc::clone(&st)), get("/v1/audit?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// 7. Committed audit entries reach the SSE bus
// ---------------------------------------------------------------------------

#[tokio::test]
async fn committed_audit_entries_are_forwarded_to_bus() {
    let h = Harness::new();
    let s = h.subject("Dr. Ong", "TAG-07").await.unwrap();
    let st = app(&h);
    let mut rx = st.bus.subscribe();
    let forwarder = beacon_daemon::state::spawn_audit_forwarder(&h.engine, st.bus.clone());

    call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/scans", serde_json::json!({ "tokenId": "TAG-07" })),
    )
    .await;

    let msg = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("no bus message")
        .expect("bus closed");
    match msg {
        beacon_daemon::state::BusMsg::Audit(entry) => {
            assert_eq!(entry.subject_id, s.id);
            assert_eq!(entry.kind, beacon_schemas::AuditKind::ScanRegistered);
        }
        other => panic!("expected audit message, got {other:?}"),
    }
    forwarder.abort();
}
