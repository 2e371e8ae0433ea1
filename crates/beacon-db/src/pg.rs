//! Postgres-backed [`PresenceStore`].
//!
//! Every mutation runs in one transaction that first takes
//! `select .. for update` on the subject row. That row lock is the per-subject
//! serialization point for scans, status writes, sweep and delete.

use anyhow::{Context, Result};
use async_trait::async_trait;
use beacon_audit::{lifecycle, new_entry, scan_registered};
use beacon_schemas::{
    AuditEntry, AuditKind, NewSubject, RosterEntry, ScanKind, Status, StatusCounts, StatusRecord,
    Subject, SubjectId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::map_sqlx;
use crate::store::{
    next_last_updated, CreatedSubject, MutationContext, MutationResult, Precheck, PresenceStore,
    RegisteredScan, StatusMutation,
};
use crate::StoreError;

pub const ENV_DB_URL: &str = "BEACON_DATABASE_URL";

/// Connect to Postgres at `url`.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Connect using BEACON_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_subjects_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'subjects'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_subjects_table: exists,
    })
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_status(raw: &str) -> Result<Status, StoreError> {
    Status::parse(raw).ok_or_else(|| StoreError::Decode(format!("status {raw:?}")))
}

fn decode_kind(raw: &str) -> Result<AuditKind, StoreError> {
    AuditKind::parse(raw).ok_or_else(|| StoreError::Decode(format!("audit kind {raw:?}")))
}

fn subject_from_row(row: &PgRow) -> Result<Subject, StoreError> {
    Ok(Subject {
        id: row.try_get("subject_id")?,
        display_name: row.try_get("display_name")?,
        department: row.try_get("department")?,
        token_id: row.try_get("token_id")?,
    })
}

fn status_from_row(row: &PgRow) -> Result<StatusRecord, StoreError> {
    let raw: String = row.try_get("status")?;
    Ok(StatusRecord {
        subject_id: row.try_get("subject_id")?,
        status: decode_status(&raw)?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let raw: String = row.try_get("kind")?;
    Ok(AuditEntry {
        id: row.try_get("audit_id")?,
        subject_id: row.try_get("subject_id")?,
        kind: decode_kind(&raw)?,
        message: row.try_get("message")?,
        ts_utc: row.try_get("ts_utc")?,
    })
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

/// Take the per-subject row lock. Missing subject = NotFound.
async fn lock_subject(
    tx: &mut Transaction<'_, Postgres>,
    id: SubjectId,
) -> Result<Subject, StoreError> {
    let row = sqlx::query(
        r#"
        select subject_id, display_name, department, token_id
        from subjects
        where subject_id = $1
        for update
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(r) => subject_from_row(&r),
        None => Err(StoreError::subject_not_found(id)),
    }
}

async fn read_context(
    tx: &mut Transaction<'_, Postgres>,
    id: SubjectId,
) -> Result<MutationContext, StoreError> {
    let last_scan: Option<DateTime<Utc>> =
        sqlx::query_scalar("select last_scan_utc from scan_ledger where subject_id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

    let current = sqlx::query(
        "select subject_id, status, last_updated from user_status where subject_id = $1",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .map(|r| status_from_row(&r))
    .transpose()?;

    Ok(MutationContext { last_scan, current })
}

async fn upsert_status(
    tx: &mut Transaction<'_, Postgres>,
    record: &StatusRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into user_status (subject_id, status, last_updated)
        values ($1, $2, $3)
        on conflict (subject_id) do update
          set status = excluded.status,
              last_updated = excluded.last_updated
        "#,
    )
    .bind(record.subject_id)
    .bind(record.status.as_str())
    .bind(record.last_updated)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_audit(
    tx: &mut Transaction<'_, Postgres>,
    entry: &AuditEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into audit_entries (audit_id, subject_id, kind, message, ts_utc)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(entry.id)
    .bind(entry.subject_id)
    .bind(entry.kind.as_str())
    .bind(&entry.message)
    .bind(entry.ts_utc)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx(e, "audit entry"))?;
    Ok(())
}

async fn insert_scan_event(
    tx: &mut Transaction<'_, Postgres>,
    subject_id: Option<SubjectId>,
    token_norm: &str,
    outcome: ScanKind,
    ts: DateTime<Utc>,
) -> Result<(), StoreError> {
    let outcome = match outcome {
        ScanKind::Registered => "Registered",
        ScanKind::Unregistered => "Unregistered",
    };
    sqlx::query(
        r#"
        insert into scan_events (subject_id, token_id, ts_utc, outcome)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(subject_id)
    .bind(token_norm)
    .bind(ts)
    .bind(outcome)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// PresenceStore
// ---------------------------------------------------------------------------

#[async_trait]
impl PresenceStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn find_subject(&self, id: SubjectId) -> Result<Option<Subject>, StoreError> {
        sqlx::query(
            "select subject_id, display_name, department, token_id from subjects where subject_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(|r| subject_from_row(&r))
        .transpose()
    }

    async fn find_subject_by_token(
        &self,
        token_norm: &str,
    ) -> Result<Option<Subject>, StoreError> {
        sqlx::query(
            "select subject_id, display_name, department, token_id from subjects where token_norm = $1",
        )
        .bind(token_norm)
        .fetch_optional(&self.pool)
        .await?
        .map(|r| subject_from_row(&r))
        .transpose()
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError> {
        let rows = sqlx::query(
            "select subject_id, display_name, department, token_id from subjects order by subject_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subject_from_row).collect()
    }

    async fn insert_subject(
        &self,
        new: &NewSubject,
        token_norm: &str,
        ts: DateTime<Utc>,
    ) -> Result<CreatedSubject, StoreError> {
        let mut tx = self.pool.begin().await?;

        let id: SubjectId = sqlx::query_scalar(
            r#"
            insert into subjects (display_name, department, token_id, token_norm)
            values ($1, $2, $3, $4)
            returning subject_id
            "#,
        )
        .bind(&new.display_name)
        .bind(&new.department)
        .bind(&new.token_id)
        .bind(token_norm)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx(e, "token already registered"))?;

        let record = StatusRecord {
            subject_id: id,
            status: Status::Offline,
            last_updated: ts,
        };
        upsert_status(&mut tx, &record).await?;

        let audit = lifecycle(id, AuditKind::Created, &new.display_name, ts);
        insert_audit(&mut tx, &audit).await?;

        tx.commit().await?;

        Ok(CreatedSubject {
            subject: Subject {
                id,
                display_name: new.display_name.clone(),
                department: new.department.clone(),
                token_id: new.token_id.clone(),
            },
            record,
            audit,
        })
    }

    async fn delete_subject(
        &self,
        id: SubjectId,
        detail: &str,
        ts: DateTime<Utc>,
    ) -> Result<AuditEntry, StoreError> {
        let mut tx = self.pool.begin().await?;
        let subject = lock_subject(&mut tx, id).await?;

        let detail = if detail.trim().is_empty() {
            subject.display_name.as_str()
        } else {
            detail
        };
        let audit = lifecycle(id, AuditKind::Deleted, detail, ts);
        insert_audit(&mut tx, &audit).await?;

        sqlx::query("delete from subjects where subject_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(audit)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_registered_scan(
        &self,
        subject: &Subject,
        token_norm: &str,
        status: Status,
        ts: DateTime<Utc>,
    ) -> Result<RegisteredScan, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_subject(&mut tx, subject.id).await?;
        let ctx = read_context(&mut tx, subject.id).await?;

        insert_scan_event(&mut tx, Some(subject.id), token_norm, ScanKind::Registered, ts).await?;

        sqlx::query(
            r#"
            insert into scan_ledger (subject_id, last_scan_utc)
            values ($1, $2)
            on conflict (subject_id) do update
              set last_scan_utc = greatest(scan_ledger.last_scan_utc, excluded.last_scan_utc)
            "#,
        )
        .bind(subject.id)
        .bind(ts)
        .execute(&mut *tx)
        .await?;

        let record = StatusRecord {
            subject_id: subject.id,
            status,
            last_updated: next_last_updated(ctx.current.as_ref(), ts),
        };
        upsert_status(&mut tx, &record).await?;

        let audit = scan_registered(subject.id, token_norm, status, ts);
        insert_audit(&mut tx, &audit).await?;

        tx.commit().await?;
        Ok(RegisteredScan { record, audit })
    }

    async fn record_unregistered_scan(
        &self,
        token_norm: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_scan_event(&mut tx, None, token_norm, ScanKind::Unregistered, ts).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn last_scan(&self, id: SubjectId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let ts = sqlx::query_scalar("select last_scan_utc from scan_ledger where subject_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ts)
    }

    async fn apply_status(&self, m: StatusMutation<'_>) -> Result<MutationResult, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_subject(&mut tx, m.subject_id).await?;
        let ctx = read_context(&mut tx, m.subject_id).await?;

        // Dropping `tx` without commit rolls back and releases the row lock.
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
        upsert_status(&mut tx, &record).await?;

        let audit = new_entry(m.subject_id, m.kind, m.message, m.ts);
        insert_audit(&mut tx, &audit).await?;

        tx.commit().await?;
        Ok(MutationResult::Applied { record, audit })
    }

    async fn get_status(&self, id: SubjectId) -> Result<Option<StatusRecord>, StoreError> {
        sqlx::query(
            "select subject_id, status, last_updated from user_status where subject_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(|r| status_from_row(&r))
        .transpose()
    }

    async fn list_non_offline(&self) -> Result<Vec<SubjectId>, StoreError> {
        let ids = sqlx::query_scalar(
            "select subject_id from user_status where status <> 'Offline' order by subject_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "select status, count(*)::bigint from user_status group by status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (raw, n) in rows {
            let n = u64::try_from(n).unwrap_or(0);
            match decode_status(&raw)? {
                Status::Available => counts.available = n,
                Status::Busy => counts.busy = n,
                Status::Offline => counts.offline = n,
            }
        }
        Ok(counts)
    }

    async fn roster(&self) -> Result<Vec<RosterEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            select s.subject_id, s.display_name, s.department, s.token_id,
                   u.status, u.last_updated
            from subjects s
            left join user_status u on u.subject_id = s.subject_id
            order by s.subject_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            let subject = subject_from_row(r)?;
            let raw: Option<String> = r.try_get("status")?;
            let status = match raw {
                Some(raw) => Some(StatusRecord {
                    subject_id: subject.id,
                    status: decode_status(&raw)?,
                    last_updated: r.try_get("last_updated")?,
                }),
                None => None,
            };
            out.push(RosterEntry { subject, status });
        }
        Ok(out)
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            select audit_id, subject_id, kind, message, ts_utc
            from audit_entries
            order by ts_utc desc, seq desc
            limit $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }
}
