//! Test fixtures for cross-crate presence scenarios.
//!
//! - [`ManualClock`]: time only moves when a test says so.
//! - [`Harness`]: engine over a fresh [`MemoryStore`] and in-memory buffer.
//! - [`LateWriteStore`]: moves the clock on just before each status write.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use beacon_audit::{UnregisteredBuffer, DEFAULT_CAPACITY};
use beacon_db::{
    CreatedSubject, MemoryStore, MutationResult, PresenceStore, RegisteredScan, StatusMutation,
    StoreError,
};
use beacon_engine::{Clock, EngineSettings, PresenceEngine};
use beacon_gate::GateConfig;
use beacon_schemas::{
    AuditEntry, NewSubject, RosterEntry, Status, StatusCounts, StatusRecord, Subject, SubjectId,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Monday 2026-03-02 09:00 Asia/Manila.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0)
        .single()
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, ts: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = ts;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct Harness {
    pub engine: Arc<PresenceEngine>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// Production settings, clock at [`t0`].
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_window_secs(window_secs: i64) -> Self {
        Self::with_settings(EngineSettings {
            gate: GateConfig::window_secs(window_secs),
            ..EngineSettings::default()
        })
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        Self::with_buffer(settings, UnregisteredBuffer::in_memory(DEFAULT_CAPACITY))
    }

    pub fn with_buffer(settings: EngineSettings, buffer: UnregisteredBuffer) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        Self::assemble(store.clone(), store, clock, settings, buffer)
    }

    /// Every status write first moves the clock on by `lag`, as if the write
    /// queued behind another writer that long.
    pub fn with_write_lag(window_secs: i64, lag: Duration) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let late = Arc::new(LateWriteStore {
            inner: store.clone(),
            clock: clock.clone(),
            lag,
        });
        let settings = EngineSettings {
            gate: GateConfig::window_secs(window_secs),
            ..EngineSettings::default()
        };
        Self::assemble(
            late,
            store,
            clock,
            settings,
            UnregisteredBuffer::in_memory(DEFAULT_CAPACITY),
        )
    }

    fn assemble(
        engine_store: Arc<dyn PresenceStore>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        settings: EngineSettings,
        buffer: UnregisteredBuffer,
    ) -> Self {
        let engine = Arc::new(PresenceEngine::new(
            engine_store,
            Arc::new(buffer),
            clock.clone(),
            settings,
        ));
        Self {
            engine,
            store,
            clock,
        }
    }

    /// Register a subject with the given token.
    pub async fn subject(&self, name: &str, token: &str) -> Result<Subject> {
        let created = self
            .engine
            .register_subject(NewSubject {
                display_name: name.to_string(),
                department: "Faculty".to_string(),
                token_id: token.to_string(),
            })
            .await
            .with_context(|| format!("register subject {name}"))?;
        Ok(created.subject)
    }
}

// ---------------------------------------------------------------------------
// LateWriteStore
// ---------------------------------------------------------------------------

/// [`MemoryStore`] whose `apply_status` advances a [`ManualClock`] before it
/// takes the subject lock. Everything else passes through.
pub struct LateWriteStore {
    inner: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    lag: Duration,
}

#[async_trait]
impl PresenceStore for LateWriteStore {
    fn backend(&self) -> &'static str {
        "memory-late-write"
    }

    async fn find_subject(&self, id: SubjectId) -> Result<Option<Subject>, StoreError> {
        self.inner.find_subject(id).await
    }

    async fn find_subject_by_token(
        &self,
        token_norm: &str,
    ) -> Result<Option<Subject>, StoreError> {
        self.inner.find_subject_by_token(token_norm).await
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, StoreError> {
        self.inner.list_subjects().await
    }

    async fn insert_subject(
        &self,
        new: &NewSubject,
        token_norm: &str,
        ts: DateTime<Utc>,
    ) -> Result<CreatedSubject, StoreError> {
        self.inner.insert_subject(new, token_norm, ts).await
    }

    async fn delete_subject(
        &self,
        id: SubjectId,
        detail: &str,
        ts: DateTime<Utc>,
    ) -> Result<AuditEntry, StoreError> {
        self.inner.delete_subject(id, detail, ts).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.inner.append_audit(entry).await
    }

    async fn record_registered_scan(
        &self,
        subject: &Subject,
        token_norm: &str,
        status: Status,
        ts: DateTime<Utc>,
    ) -> Result<RegisteredScan, StoreError> {
        self.inner
            .record_registered_scan(subject, token_norm, status, ts)
            .await
    }

    async fn record_unregistered_scan(
        &self,
        token_norm: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.record_unregistered_scan(token_norm, ts).await
    }

    async fn last_scan(&self, id: SubjectId) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.last_scan(id).await
    }

    async fn apply_status(&self, m: StatusMutation<'_>) -> Result<MutationResult, StoreError> {
        self.clock.advance(self.lag);
        self.inner.apply_status(m).await
    }

    async fn get_status(&self, id: SubjectId) -> Result<Option<StatusRecord>, StoreError> {
        self.inner.get_status(id).await
    }

    async fn list_non_offline(&self) -> Result<Vec<SubjectId>, StoreError> {
        self.inner.list_non_offline().await
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        self.inner.status_counts().await
    }

    async fn roster(&self) -> Result<Vec<RosterEntry>, StoreError> {
        self.inner.roster().await
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        self.inner.recent_audit(limit).await
    }
}
