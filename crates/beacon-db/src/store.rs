//! Storage seam for the presence engine.
//!
//! Every mutating method is atomic: either all of its rows land or none do.
//! Writers for the same subject are serialized (row lock in Postgres, a
//! per-subject mutex in memory); a second writer waits, it never fails with a
//! conflict.

use async_trait::async_trait;
use beacon_schemas::{
    AuditEntry, AuditKind, NewSubject, RosterEntry, Status, StatusCounts, StatusRecord, Subject,
    SubjectId,
};
use chrono::{DateTime, Utc};

use crate::StoreError;

/// State read under the subject lock, handed to a [`StatusMutation`] precheck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationContext {
    pub last_scan: Option<DateTime<Utc>>,
    pub current: Option<StatusRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precheck {
    Proceed,
    /// Nothing to do (e.g. sweep found the subject already Offline).
    Skip,
    /// Gate re-check failed under the lock.
    Refuse,
}

pub type PrecheckFn<'a> = &'a (dyn Fn(&MutationContext) -> Precheck + Send + Sync);

/// One status write plus its audit entry.
pub struct StatusMutation<'a> {
    pub subject_id: SubjectId,
    pub status: Status,
    pub kind: AuditKind,
    pub message: String,
    pub ts: DateTime<Utc>,
    /// Evaluated after the subject lock is taken and before anything is written.
    pub precheck: PrecheckFn<'a>,
}

/// Precheck that always proceeds.
pub fn always_proceed(_: &MutationContext) -> Precheck {
    Precheck::Proceed
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResult {
    Applied {
        record: StatusRecord,
        audit: AuditEntry,
    },
    Skipped {
        current: Option<StatusRecord>,
    },
    Refused {
        context: MutationContext,
    },
}

/// Result of a committed registered scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredScan {
    pub record: StatusRecord,
    pub audit: AuditEntry,
}

/// Result of a committed subject insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSubject {
    pub subject: Subject,
    pub record: StatusRecord,
    pub audit: AuditEntry,
}

/// `lastUpdated` never moves backwards, even if the caller's clock does.
pub fn next_last_updated(current: Option<&StatusRecord>, now: DateTime<Utc>) -> DateTime<Utc> {
    match current {
        Some(c) if c.last_updated > now => c.last_updated,
        _ => now,
    }
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Short backend label for health output ("postgres", "memory").
    fn backend(&self) -> &'static str;

    // -- subjects ----------------------------------------------------------

    async fn find_subject(&self, id: SubjectId) -> Result<Option<Subject>, StoreError>;

    /// `token_norm` must already be normalized.
    async fn find_subject_by_token(&self, token_norm: &str)
        -> Result<Option<Subject>, StoreError>;

    /// Ordered by id.
    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError>;

    /// Insert the subject, an Offline status row, and a `Created` audit entry.
    /// A token already in use is `StoreError::Constraint`.
    async fn insert_subject(
        &self,
        new: &NewSubject,
        token_norm: &str,
        ts: DateTime<Utc>,
    ) -> Result<CreatedSubject, StoreError>;

    /// Append a `Deleted` audit entry and remove the subject with its status
    /// and ledger rows. Audit history stays.
    async fn delete_subject(
        &self,
        id: SubjectId,
        detail: &str,
        ts: DateTime<Utc>,
    ) -> Result<AuditEntry, StoreError>;

    /// Append a pre-built entry. Used for lifecycle events; status entries
    /// are written by the mutation methods.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    // -- scans -------------------------------------------------------------

    /// Scan event + ledger advance + status write + `ScanRegistered` entry.
    async fn record_registered_scan(
        &self,
        subject: &Subject,
        token_norm: &str,
        status: Status,
        ts: DateTime<Utc>,
    ) -> Result<RegisteredScan, StoreError>;

    /// Scan event with no subject. Touches nothing else.
    async fn record_unregistered_scan(
        &self,
        token_norm: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn last_scan(&self, id: SubjectId) -> Result<Option<DateTime<Utc>>, StoreError>;

    // -- status ------------------------------------------------------------

    async fn apply_status(&self, m: StatusMutation<'_>) -> Result<MutationResult, StoreError>;

    async fn get_status(&self, id: SubjectId) -> Result<Option<StatusRecord>, StoreError>;

    /// Subjects whose current status is Available or Busy, ordered by id.
    async fn list_non_offline(&self) -> Result<Vec<SubjectId>, StoreError>;

    async fn status_counts(&self) -> Result<StatusCounts, StoreError>;

    async fn roster(&self) -> Result<Vec<RosterEntry>, StoreError>;

    // -- audit -------------------------------------------------------------

    /// Newest first; ties broken by insertion order (later first).
    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError>;
}
