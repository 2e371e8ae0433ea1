//! In-process [`PresenceStore`] for single-node runs without Postgres and for
//! tests.
//!
//! Tables live behind one `RwLock`; each mutation builds its rows first and
//! applies them in a single write-locked step, so readers see either none or
//! all of it. Per-subject `tokio::sync::Mutex`es play the part of the
//! Postgres row lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

#[cfg(feature = "testkit")]
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use beacon_audit::{lifecycle, new_entry, scan_registered};
use beacon_schemas::{
    AuditEntry, AuditKind, NewSubject, RosterEntry, ScanEvent, ScanKind, Status, StatusCounts,
    StatusRecord, Subject, SubjectId,
};
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::store::{
    next_last_updated, CreatedSubject, MutationContext, MutationResult, Precheck, PresenceStore,
    RegisteredScan, StatusMutation,
};
use crate::StoreError;

#[derive(Default)]
struct Tables {
    subjects: BTreeMap<SubjectId, (Subject, String)>,
    by_token: HashMap<String, SubjectId>,
    status: BTreeMap<SubjectId, StatusRecord>,
    ledger: HashMap<SubjectId, DateTime<Utc>>,
    scans: Vec<ScanEvent>,
    /// (insertion seq, entry)
    audit: Vec<(u64, AuditEntry)>,
    next_subject_id: SubjectId,
    next_seq: u64,
}

impl Tables {
    fn push_audit(&mut self, entry: AuditEntry) {
        self.next_seq += 1;
        self.audit.push((self.next_seq, entry));
    }

    fn require_subject(&self, id: SubjectId) -> Result<&Subject, StoreError> {
        self.subjects
            .get(&id)
            .map(|(s, _)| s)
            .ok_or_else(|| StoreError::subject_not_found(id))
    }

    fn context(&self, id: SubjectId) -> MutationContext {
        MutationContext {
            last_scan: self.ledger.get(&id).copied(),
            current: self.status.get(&id).cloned(),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    subject_locks: Mutex<HashMap<SubjectId, Arc<tokio::sync::Mutex<()>>>>,
    #[cfg(feature = "testkit")]
    fail_commits: AtomicUsize,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` mutating calls fail at commit with
    /// `StoreError::Unavailable`, leaving state untouched.
    #[cfg(feature = "testkit")]
    pub fn inject_commit_failures(&self, n: usize) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Number of scan events recorded (registered and unregistered).
    pub fn scan_event_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.scans.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| poisoned())
    }

    /// Apply `f` as one atomic step. `f` must validate before it mutates.
    fn commit<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        #[cfg(feature = "testkit")]
        {
            let inject = self
                .fail_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if inject {
                return Err(StoreError::Unavailable("injected commit failure".to_string()));
            }
        }

        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        f(&mut tables)
    }

    async fn lock_subject(&self, id: SubjectId) -> Result<OwnedMutexGuard<()>, StoreError> {
        let lock = {
            let mut locks = self.subject_locks.lock().map_err(|_| poisoned())?;
            locks.entry(id).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    fn forget_lock(&self, id: SubjectId) -> Result<(), StoreError> {
        self.subject_locks
            .lock()
            .map_err(|_| poisoned())?
            .remove(&id);
        Ok(())
    }

    /// A write against a missing subject leaves no lock entry behind.
    fn release_if_missing<R>(
        &self,
        id: SubjectId,
        res: Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        if matches!(res, Err(StoreError::NotFound { .. })) {
            self.forget_lock(id)?;
        }
        res
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn find_subject(&self, id: SubjectId) -> Result<Option<Subject>, StoreError> {
        Ok(self.read()?.subjects.get(&id).map(|(s, _)| s.clone()))
    }

    async fn find_subject_by_token(
        &self,
        token_norm: &str,
    ) -> Result<Option<Subject>, StoreError> {
        let t = self.read()?;
        Ok(t.by_token
            .get(token_norm)
            .and_then(|id| t.subjects.get(id))
            .map(|(s, _)| s.clone()))
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError> {
        Ok(self.read()?.subjects.values().map(|(s, _)| s.clone()).collect())
    }

    async fn insert_subject(
        &self,
        new: &NewSubject,
        token_norm: &str,
        ts: DateTime<Utc>,
    ) -> Result<CreatedSubject, StoreError> {
        if token_norm.is_empty() {
            return Err(StoreError::Constraint("token must not be empty".to_string()));
        }
        self.commit(|t| {
            if t.by_token.contains_key(token_norm) {
                return Err(StoreError::Constraint(format!(
                    "token already registered: {token_norm}"
                )));
            }
            t.next_subject_id += 1;
            let id = t.next_subject_id;
            let subject = Subject {
                id,
                display_name: new.display_name.clone(),
                department: new.department.clone(),
                token_id: new.token_id.clone(),
            };
            let record = StatusRecord {
                subject_id: id,
                status: Status::Offline,
                last_updated: ts,
            };
            let audit = lifecycle(id, AuditKind::Created, &new.display_name, ts);

            t.subjects
                .insert(id, (subject.clone(), token_norm.to_string()));
            t.by_token.insert(token_norm.to_string(), id);
            t.status.insert(id, record.clone());
            t.push_audit(audit.clone());

            Ok(CreatedSubject {
                subject,
                record,
                audit,
            })
        })
    }

    async fn delete_subject(
        &self,
        id: SubjectId,
        detail: &str,
        ts: DateTime<Utc>,
    ) -> Result<AuditEntry, StoreError> {
        let _guard = self.lock_subject(id).await?;
        let res = self.commit(|t| {
            let name = t.require_subject(id)?.display_name.clone();
            let detail = if detail.trim().is_empty() {
                name.as_str()
            } else {
                detail
            };
            let audit = lifecycle(id, AuditKind::Deleted, detail, ts);

            if let Some((_, token_norm)) = t.subjects.remove(&id) {
                t.by_token.remove(&token_norm);
            }
            t.status.remove(&id);
            t.ledger.remove(&id);
            for scan in t.scans.iter_mut().filter(|s| s.subject_id == Some(id)) {
                scan.subject_id = None;
            }
            t.push_audit(audit.clone());
            Ok(audit)
        });
        let audit = self.release_if_missing(id, res)?;
        self.forget_lock(id)?;
        Ok(audit)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.commit(|t| {
            t.push_audit(entry.clone());
            Ok(())
        })
    }

    async fn record_registered_scan(
        &self,
        subject: &Subject,
        token_norm: &str,
        status: Status,
        ts: DateTime<Utc>,
    ) -> Result<RegisteredScan, StoreError> {
        let _guard = self.lock_subject(subject.id).await?;
        let res = self.commit(|t| {
            t.require_subject(subject.id)?;
            let ctx = t.context(subject.id);

            let record = StatusRecord {
                subject_id: subject.id,
                status,
                last_updated: next_last_updated(ctx.current.as_ref(), ts),
            };
            let audit = scan_registered(subject.id, token_norm, status, ts);

            t.scans.push(ScanEvent {
                subject_id: Some(subject.id),
                token_id: token_norm.to_string(),
                ts_utc: ts,
                outcome: ScanKind::Registered,
            });
            let last = t.ledger.entry(subject.id).or_insert(ts);
            if ts > *last {
                *last = ts;
            }
            t.status.insert(subject.id, record.clone());
            t.push_audit(audit.clone());

            Ok(RegisteredScan { record, audit })
        });
        self.release_if_missing(subject.id, res)
    }

    async fn record_unregistered_scan(
        &self,
        token_norm: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.commit(|t| {
            t.scans.push(ScanEvent {
                subject_id: None,
                token_id: token_norm.to_string(),
                ts_utc: ts,
                outcome: ScanKind::Unregistered,
            });
            Ok(())
        })
    }

    async fn last_scan(&self, id: SubjectId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.read()?.ledger.get(&id).copied())
    }

    async fn apply_status(&self, m: StatusMutation<'_>) -> Result<MutationResult, StoreError> {
        let _guard = self.lock_subject(m.subject_id).await?;

        let found = {
            let t = self.read()?;
            t.require_subject(m.subject_id).map(|_| t.context(m.subject_id))
        };
        let ctx = self.release_if_missing(m.subject_id, found)?;

        match (m.precheck)(&ctx) {
            Precheck::Proceed => {}
            Precheck::Skip => {
                return Ok(MutationResult::Skipped {
                    current: ctx.current,
                })
            }
            Precheck::Refuse => return Ok(MutationResult::Refused { context: ctx }),
        }

        let record = StatusRecord {
            subject_id: m.subject_id,
            status: m.status,
            last_updated: next_last_updated(ctx.current.as_ref(), m.ts),
        };
        let audit = new_entry(m.subject_id, m.kind, m.message, m.ts);

        self.commit(|t| {
            t.require_subject(m.subject_id)?;
            t.status.insert(m.subject_id, record.clone());
            t.push_audit(audit.clone());
            Ok(())
        })?;

        Ok(MutationResult::Applied { record, audit })
    }

    async fn get_status(&self, id: SubjectId) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self.read()?.status.get(&id).cloned())
    }

    async fn list_non_offline(&self) -> Result<Vec<SubjectId>, StoreError> {
        Ok(self
            .read()?
            .status
            .values()
            .filter(|r| r.status != Status::Offline)
            .map(|r| r.subject_id)
            .collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for r in self.read()?.status.values() {
            counts.bump(r.status);
        }
        Ok(counts)
    }

    async fn roster(&self) -> Result<Vec<RosterEntry>, StoreError> {
        let t = self.read()?;
        Ok(t.subjects
            .values()
            .map(|(s, _)| RosterEntry {
                subject: s.clone(),
                status: t.status.get(&s.id).cloned(),
            })
            .collect())
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let t = self.read()?;
        let mut rows: Vec<&(u64, AuditEntry)> = t.audit.iter().collect();
        rows.sort_by(|a, b| (b.1.ts_utc, b.0).cmp(&(a.1.ts_utc, a.0)));
        Ok(rows.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }
}
