//! Audit entry builders.
//!
//! Messages are read by humans on the admin dashboard; keep them short and
//! stable (dashboards filter on the prefix).

use beacon_schemas::{AuditEntry, AuditKind, Status, SubjectId};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn new_entry(
    subject_id: SubjectId,
    kind: AuditKind,
    message: impl Into<String>,
    ts_utc: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry {
        id: Uuid::new_v4(),
        subject_id,
        kind,
        message: message.into(),
        ts_utc,
    }
}

/// Message for a manual or gated transition.
pub fn status_change_message(status: Status) -> String {
    format!("Status changed to {status}")
}

pub const AUTO_OFFLINE_MESSAGE: &str = "Status automatically set to Offline by daily sweep";

/// One entry per registered scan. `status` is the status the scan set.
pub fn scan_registered(
    subject_id: SubjectId,
    token_id: &str,
    status: Status,
    ts_utc: DateTime<Utc>,
) -> AuditEntry {
    new_entry(
        subject_id,
        AuditKind::ScanRegistered,
        format!("Scan registered (token {token_id}); status set to {status}"),
        ts_utc,
    )
}

/// Created / Updated / Deleted. Any other kind is coerced to Updated so a
/// caller bug cannot forge a status entry through this path.
pub fn lifecycle(
    subject_id: SubjectId,
    kind: AuditKind,
    detail: &str,
    ts_utc: DateTime<Utc>,
) -> AuditEntry {
    let kind = if kind.is_lifecycle() {
        kind
    } else {
        AuditKind::Updated
    };
    let verb = match kind {
        AuditKind::Created => "Subject created",
        AuditKind::Deleted => "Subject deleted",
        _ => "Subject updated",
    };
    let message = if detail.trim().is_empty() {
        verb.to_string()
    } else {
        format!("{verb}: {}", detail.trim())
    };
    new_entry(subject_id, kind, message, ts_utc)
}

/// Default message stored with an unregistered scan.
pub fn unregistered_message(token_id: &str) -> String {
    format!("Unregistered token {token_id} scanned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap()
    }

    #[test]
    fn scan_registered_names_token_and_status() {
        let e = scan_registered(7, "AB12", Status::Busy, t0());
        assert_eq!(e.kind, AuditKind::ScanRegistered);
        assert_eq!(e.message, "Scan registered (token AB12); status set to Busy");
        assert_eq!(e.subject_id, 7);
        assert_eq!(status_change_message(Status::Available), "Status changed to Available");
    }

    #[test]
    fn lifecycle_coerces_non_lifecycle_kind() {
        let e = lifecycle(1, AuditKind::AutoOffline, "renamed", t0());
        assert_eq!(e.kind, AuditKind::Updated);
        assert_eq!(e.message, "Subject updated: renamed");
    }

    #[test]
    fn entries_get_distinct_ids() {
        let a = new_entry(1, AuditKind::AutoOffline, AUTO_OFFLINE_MESSAGE, t0());
        let b = new_entry(1, AuditKind::AutoOffline, AUTO_OFFLINE_MESSAGE, t0());
        assert_ne!(a.id, b.id);
    }
}
