//! Request and response types for all beacon-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use beacon_schemas::{AuditEntry, ScanValidity, StatusRecord, Subject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// "postgres" | "memory"
    pub store: String,
    pub uptime_secs: u64,
    pub privileged_auth: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

/// Body of a 403. Gate denials carry the elapsed time since the last scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRefusedResponse {
    pub error: String,
    /// "no_scan_on_record" | "scan_window_expired" | "bypass_not_permitted" | "privileged_caller"
    pub gate: String,
    pub elapsed_secs: Option<i64>,
    pub hours_ago: Option<f64>,
}

// ---------------------------------------------------------------------------
// /v1/subjects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSubjectResponse {
    pub subject: Subject,
    pub status: StatusRecord,
    pub audit: AuditEntry,
}

/// Lifecycle event reported by the profile system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectEventRequest {
    /// "created" | "updated" | "deleted"
    pub kind: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveSubjectQuery {
    #[serde(default)]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// /v1/subjects/:id/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeRequest {
    /// Parsed case-insensitively; "Active" is accepted for Available.
    #[serde(alias = "status")]
    pub requested_status: String,
    #[serde(default)]
    pub bypass: bool,
}

// ---------------------------------------------------------------------------
// /v1/subjects/:id/scan-validity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanValidityResponse {
    pub can_change_status: bool,
    pub last_scan: Option<DateTime<Utc>>,
    pub hours_ago: Option<f64>,
    pub elapsed_secs: Option<i64>,
    pub message: String,
}

impl From<ScanValidity> for ScanValidityResponse {
    fn from(v: ScanValidity) -> Self {
        Self {
            can_change_status: v.allowed,
            last_scan: v.last_scan,
            hours_ago: v.elapsed_secs.map(beacon_gate::hours_ago),
            elapsed_secs: v.elapsed_secs,
            message: v.message,
        }
    }
}

// ---------------------------------------------------------------------------
// /v1/audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// /v1/unregistered
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearedResponse {
    pub removed: usize,
}
