//! Shared data model for the presence engine.
//!
//! Everything here is plain data: `Serialize + Deserialize`, no IO, no clock.
//! Field names serialize as camelCase because the pollers that consume them
//! (mobile app, kiosk display) were written against that shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a tracked subject (database `bigserial`).
pub type SubjectId = i64;

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

/// A tracked individual. Owned by the profile system; the engine only reads
/// `id` and `token_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: SubjectId,
    pub display_name: String,
    pub department: String,
    /// Proximity token as registered (raw form; compared after normalization).
    pub token_id: String,
}

/// Input for registering a subject with the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubject {
    pub display_name: String,
    pub department: String,
    pub token_id: String,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Availability state of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Older clients send "Active"; it means the same thing.
    #[serde(alias = "Active", alias = "available", alias = "active")]
    Available,
    #[serde(alias = "busy")]
    Busy,
    #[serde(alias = "offline")]
    Offline,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Available, Status::Busy, Status::Offline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Available => "Available",
            Status::Busy => "Busy",
            Status::Offline => "Offline",
        }
    }

    /// Case-insensitive parse. Accepts the legacy "Active" spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" | "active" => Some(Status::Available),
            "busy" => Some(Status::Busy),
            "offline" => Some(Status::Offline),
            _ => None,
        }
    }

    /// Statuses that assert physical presence and therefore need a scan.
    pub fn requires_presence(&self) -> bool {
        !matches!(self, Status::Offline)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::parse(s).ok_or_else(|| format!("invalid status: {s:?}"))
    }
}

/// Current status of one subject. One row per subject, upserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub subject_id: SubjectId,
    pub status: Status,
    /// Never moves backwards for a given subject.
    pub last_updated: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Scans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanKind {
    Registered,
    Unregistered,
}

/// One proximity-token read. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub subject_id: Option<SubjectId>,
    pub token_id: String,
    pub ts_utc: DateTime<Utc>,
    pub outcome: ScanKind,
}

/// A token read that matched no subject. Lives in the bounded buffer only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregisteredScanRecord {
    /// `<epoch millis>-<random hex>`; unique without a shared counter.
    pub id: String,
    pub token_id: String,
    pub message: String,
    pub ts_utc: DateTime<Utc>,
}

/// Result of ingesting a scan. Both arms are successful outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Registered {
        subject: Subject,
        status: StatusRecord,
        audit: AuditEntry,
    },
    Unregistered {
        record: UnregisteredScanRecord,
    },
}

impl ScanOutcome {
    pub fn kind(&self) -> ScanKind {
        match self {
            ScanOutcome::Registered { .. } => ScanKind::Registered,
            ScanOutcome::Unregistered { .. } => ScanKind::Unregistered,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.kind() == ScanKind::Registered
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    StatusChange,
    ScanRegistered,
    Created,
    Updated,
    Deleted,
    AutoOffline,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::StatusChange => "status_change",
            AuditKind::ScanRegistered => "scan_registered",
            AuditKind::Created => "created",
            AuditKind::Updated => "updated",
            AuditKind::Deleted => "deleted",
            AuditKind::AutoOffline => "auto_offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status_change" => Some(AuditKind::StatusChange),
            "scan_registered" => Some(AuditKind::ScanRegistered),
            "created" => Some(AuditKind::Created),
            "updated" => Some(AuditKind::Updated),
            "deleted" => Some(AuditKind::Deleted),
            "auto_offline" => Some(AuditKind::AutoOffline),
            _ => None,
        }
    }

    /// Lifecycle kinds are the only ones callers may append directly.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            AuditKind::Created | AuditKind::Updated | AuditKind::Deleted
        )
    }
}

/// Append-only audit record. Canonical order: `ts_utc` descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub subject_id: SubjectId,
    pub kind: AuditKind,
    pub message: String,
    pub ts_utc: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// Read-only mirror of the gate decision for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanValidity {
    pub allowed: bool,
    pub last_scan: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<i64>,
    pub message: String,
}

/// Dashboard aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub available: u64,
    pub busy: u64,
    pub offline: u64,
}

impl StatusCounts {
    pub fn bump(&mut self, status: Status) {
        match status {
            Status::Available => self.available += 1,
            Status::Busy => self.busy += 1,
            Status::Offline => self.offline += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.available + self.busy + self.offline
    }
}

/// Subject joined with its current status (if any).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub subject: Subject,
    pub status: Option<StatusRecord>,
}
