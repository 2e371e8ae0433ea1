//! The presence engine: scan ingestion, gated status writes, sweep and the
//! read-only poll APIs.
//!
//! The engine owns no tables. It resolves "now" from its [`Clock`], asks the
//! gate for a decision, and hands atomic units of work to the store. Every
//! committed audit entry is also published on a broadcast channel for push
//! observers; polling the store stays authoritative.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon_audit::{
    lifecycle, status_change_message, unregistered_message, UnregisteredBuffer,
    AUTO_OFFLINE_MESSAGE,
};
use beacon_config::BeaconConfig;
use beacon_db::{
    always_proceed, CreatedSubject, MutationContext, MutationResult, Precheck, PresenceStore,
    StatusMutation, StoreError,
};
use beacon_gate::{CallerRole, DenyReason, GateConfig, GateDecision};
use beacon_schemas::{
    AuditEntry, AuditKind, NewSubject, RosterEntry, ScanOutcome, ScanValidity, Status,
    StatusCounts, StatusRecord, Subject, SubjectId, UnregisteredScanRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{Clock, EngineError, SweepReport};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub gate: GateConfig,
    /// Status a registered scan sets.
    pub scan_default_status: Status,
    pub audit_default_page: usize,
    pub audit_max_page: usize,
    /// Upper bound on one store call.
    pub store_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&BeaconConfig::default())
    }
}

impl From<&BeaconConfig> for EngineSettings {
    fn from(cfg: &BeaconConfig) -> Self {
        Self {
            gate: cfg.gate.gate_config(),
            scan_default_status: cfg.gate.scan_default_status,
            audit_default_page: cfg.audit.default_page,
            audit_max_page: cfg.audit.max_page,
            store_timeout: cfg.storage.timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Inbound scan as sent by a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanInput {
    pub token_id: String,
    /// Resolve by id instead of by token. An unknown id is `NotFound`.
    #[serde(default)]
    pub subject_id: Option<SubjectId>,
    /// Stored with an unregistered record instead of the default message.
    #[serde(default)]
    pub message: Option<String>,
}

impl ScanInput {
    pub fn token(token_id: impl Into<String>) -> Self {
        Self {
            token_id: token_id.into(),
            ..Self::default()
        }
    }
}

const AUDIT_BUS_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct PresenceEngine {
    store: Arc<dyn PresenceStore>,
    buffer: Arc<UnregisteredBuffer>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    audit_tx: broadcast::Sender<AuditEntry>,
}

impl PresenceEngine {
    pub fn new(
        store: Arc<dyn PresenceStore>,
        buffer: Arc<UnregisteredBuffer>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let (audit_tx, _rx) = broadcast::channel(AUDIT_BUS_CAPACITY);
        Self {
            store,
            buffer,
            clock,
            settings,
            audit_tx,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn buffer(&self) -> &Arc<UnregisteredBuffer> {
        &self.buffer
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Committed audit entries, in commit order per subject.
    pub fn subscribe_audit(&self) -> broadcast::Receiver<AuditEntry> {
        self.audit_tx.subscribe()
    }

    fn publish(&self, entry: &AuditEntry) {
        // No subscribers is fine.
        let _ = self.audit_tx.send(entry.clone());
    }

    /// Run one store call under the configured timeout.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let res = match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} timed out after {}ms",
                self.settings.store_timeout.as_millis()
            ))),
        };
        res.map_err(|err| {
            let err = EngineError::from(err);
            if err.is_retryable() {
                error!(op, error = %err, "store call failed");
            }
            err
        })
    }

    async fn require_subject(&self, id: SubjectId) -> Result<Subject, EngineError> {
        self.call("find_subject", self.store.find_subject(id))
            .await?
            .ok_or_else(|| EngineError::subject_not_found(id))
    }

    // -----------------------------------------------------------------------
    // Scan ingestion
    // -----------------------------------------------------------------------

    /// Resolve a scan by subject id if given, else by token. An unmatched
    /// token is a successful `Unregistered` outcome, never an error.
    pub async fn accept(&self, input: ScanInput) -> Result<ScanOutcome, EngineError> {
        let token = beacon_gate::normalize_token(&input.token_id);
        if token.is_empty() {
            return Err(EngineError::InvalidInput(
                "tokenId must contain at least one letter or digit".to_string(),
            ));
        }
        let now = self.clock.now();

        // An explicit id wins over the token.
        let found = match input.subject_id {
            Some(id) => Some(self.require_subject(id).await?),
            None => {
                self.call("find_subject_by_token", self.store.find_subject_by_token(&token))
                    .await?
            }
        };

        let Some(subject) = found else {
            return Ok(self.accept_unregistered(&token, input.message, now).await);
        };

        let status = self.settings.scan_default_status;
        let scan = self
            .call(
                "record_registered_scan",
                self.store.record_registered_scan(&subject, &token, status, now),
            )
            .await?;
        info!(subject_id = subject.id, token = %token, status = %status, "registered scan");
        self.publish(&scan.audit);

        Ok(ScanOutcome::Registered {
            subject,
            status: scan.record,
            audit: scan.audit,
        })
    }

    async fn accept_unregistered(
        &self,
        token: &str,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> ScanOutcome {
        // The buffer is the record of unmatched tokens; the scan-event row is
        // secondary and its failure does not fail the scan.
        if let Err(err) = self
            .call(
                "record_unregistered_scan",
                self.store.record_unregistered_scan(token, now),
            )
            .await
        {
            warn!(token = %token, error = %err, "unregistered scan event not persisted");
        }

        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| unregistered_message(token));
        let record = self.buffer.push(token, message, now).await;
        warn!(token = %token, record_id = %record.id, "unregistered token scanned");
        ScanOutcome::Unregistered { record }
    }

    // -----------------------------------------------------------------------
    // Gate
    // -----------------------------------------------------------------------

    /// Gate decision for `subject_id` moving to `requested`. Read-only.
    pub async fn authorize(
        &self,
        subject_id: SubjectId,
        requested: Status,
        role: CallerRole,
        bypass: bool,
    ) -> Result<GateDecision, EngineError> {
        self.require_subject(subject_id).await?;
        let last_scan = self
            .call("last_scan", self.store.last_scan(subject_id))
            .await?;
        Ok(beacon_gate::authorize(
            &self.settings.gate,
            role,
            requested,
            bypass,
            last_scan,
            self.clock.now(),
        ))
    }

    /// Client-requested transition. The gate runs twice: once up front for a
    /// cheap refusal, and again under the subject lock against the ledger as
    /// it stands at write time.
    pub async fn request_status(
        &self,
        subject_id: SubjectId,
        requested: Status,
        role: CallerRole,
        bypass: bool,
    ) -> Result<StatusRecord, EngineError> {
        if let GateDecision::Deny(reason) =
            self.authorize(subject_id, requested, role, bypass).await?
        {
            return Err(self.denied(subject_id, requested, reason));
        }

        // Re-decided under the subject lock against the committed ledger and
        // the clock as it reads then.
        let cfg = self.settings.gate;
        let now = self.clock.now();
        let clock = Arc::clone(&self.clock);
        let refusal: Mutex<Option<DenyReason>> = Mutex::new(None);
        let precheck = |ctx: &MutationContext| {
            match beacon_gate::authorize(&cfg, role, requested, bypass, ctx.last_scan, clock.now())
            {
                GateDecision::Allow(_) => Precheck::Proceed,
                GateDecision::Deny(reason) => {
                    if let Ok(mut slot) = refusal.lock() {
                        *slot = Some(reason);
                    }
                    Precheck::Refuse
                }
            }
        };

        let res = self
            .call(
                "apply_status",
                self.store.apply_status(StatusMutation {
                    subject_id,
                    status: requested,
                    kind: AuditKind::StatusChange,
                    message: status_change_message(requested),
                    ts: now,
                    precheck: &precheck,
                }),
            )
            .await?;

        match res {
            MutationResult::Applied { record, audit } => {
                info!(subject_id, status = %requested, bypass, "status changed");
                self.publish(&audit);
                Ok(record)
            }
            MutationResult::Refused { context } => {
                let reason = refusal
                    .lock()
                    .ok()
                    .and_then(|mut slot| slot.take())
                    .unwrap_or(DenyReason::NoScanOnRecord);
                debug!(subject_id, last_scan = ?context.last_scan, "refused under subject lock");
                Err(self.denied(subject_id, requested, reason))
            }
            MutationResult::Skipped { current } => current
                .ok_or_else(|| EngineError::subject_not_found(subject_id)),
        }
    }

    fn denied(&self, subject_id: SubjectId, requested: Status, reason: DenyReason) -> EngineError {
        info!(
            subject_id,
            requested = %requested,
            code = reason.code(),
            elapsed_secs = ?reason.elapsed_secs(),
            "status change denied"
        );
        EngineError::GateDenied(reason)
    }

    /// Ungated write. Callers are trusted (operator CLI, post-authorization).
    pub async fn set_status(
        &self,
        subject_id: SubjectId,
        status: Status,
    ) -> Result<StatusRecord, EngineError> {
        let now = self.clock.now();
        let res = self
            .call(
                "apply_status",
                self.store.apply_status(StatusMutation {
                    subject_id,
                    status,
                    kind: AuditKind::StatusChange,
                    message: status_change_message(status),
                    ts: now,
                    precheck: &always_proceed,
                }),
            )
            .await?;
        match res {
            MutationResult::Applied { record, audit } => {
                info!(subject_id, status = %status, "status set");
                self.publish(&audit);
                Ok(record)
            }
            MutationResult::Skipped { current } => current
                .ok_or_else(|| EngineError::subject_not_found(subject_id)),
            MutationResult::Refused { .. } => Err(EngineError::InvalidInput(
                "unconditional write was refused".to_string(),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Sweep
    // -----------------------------------------------------------------------

    /// Move every non-Offline subject to Offline, one `AutoOffline` entry
    /// each. A subject that went Offline between listing and writing is
    /// skipped. Per-subject failures are counted and logged; the sweep
    /// continues.
    pub async fn sweep_now(&self) -> Result<SweepReport, EngineError> {
        let now = self.clock.now();
        let ids = self
            .call("list_non_offline", self.store.list_non_offline())
            .await?;

        let skip_offline = |ctx: &MutationContext| match &ctx.current {
            Some(r) if r.status != Status::Offline => Precheck::Proceed,
            _ => Precheck::Skip,
        };

        let mut report = SweepReport {
            ran_at: now,
            examined: ids.len(),
            ..SweepReport::default()
        };
        for id in ids {
            let res = self
                .call(
                    "apply_status",
                    self.store.apply_status(StatusMutation {
                        subject_id: id,
                        status: Status::Offline,
                        kind: AuditKind::AutoOffline,
                        message: AUTO_OFFLINE_MESSAGE.to_string(),
                        ts: now,
                        precheck: &skip_offline,
                    }),
                )
                .await;
            match res {
                Ok(MutationResult::Applied { audit, .. }) => {
                    self.publish(&audit);
                    report.set_offline += 1;
                }
                Ok(_) | Err(EngineError::NotFound { .. }) => report.skipped += 1,
                Err(err) => {
                    error!(subject_id = id, error = %err, "sweep write failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            set_offline = report.set_offline,
            skipped = report.skipped,
            failed = report.failed,
            "sweep finished"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Poll APIs
    // -----------------------------------------------------------------------

    pub async fn get_status(&self, subject_id: SubjectId) -> Result<StatusRecord, EngineError> {
        self.call("get_status", self.store.get_status(subject_id))
            .await?
            .ok_or_else(|| EngineError::NotFound {
                entity: "status",
                id: subject_id.to_string(),
            })
    }

    /// Newest first. `None` uses the default page; larger requests are capped.
    pub async fn get_recent_audit(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>, EngineError> {
        let limit = match limit {
            None => self.settings.audit_default_page,
            Some(0) => return Err(EngineError::InvalidInput("limit must be >= 1".to_string())),
            Some(n) => n.min(self.settings.audit_max_page),
        };
        self.call("recent_audit", self.store.recent_audit(limit))
            .await
    }

    pub async fn get_scan_validity(
        &self,
        subject_id: SubjectId,
    ) -> Result<ScanValidity, EngineError> {
        self.require_subject(subject_id).await?;
        let last_scan = self
            .call("last_scan", self.store.last_scan(subject_id))
            .await?;
        Ok(beacon_gate::scan_validity(
            &self.settings.gate,
            last_scan,
            self.clock.now(),
        ))
    }

    pub async fn status_counts(&self) -> Result<StatusCounts, EngineError> {
        self.call("status_counts", self.store.status_counts()).await
    }

    pub async fn roster(&self) -> Result<Vec<RosterEntry>, EngineError> {
        self.call("roster", self.store.roster()).await
    }

    /// Newest first.
    pub fn unregistered_snapshot(&self) -> Arc<Vec<UnregisteredScanRecord>> {
        self.buffer.snapshot()
    }

    /// Returns how many records were removed.
    pub async fn clear_unregistered(&self) -> Result<usize, EngineError> {
        let removed = self.buffer.clear().await?;
        info!(removed, "unregistered buffer cleared");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Subject lifecycle
    // -----------------------------------------------------------------------

    /// New subjects start Offline with a `Created` entry.
    pub async fn register_subject(&self, new: NewSubject) -> Result<CreatedSubject, EngineError> {
        if new.display_name.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "displayName must not be empty".to_string(),
            ));
        }
        let token = beacon_gate::normalize_token(&new.token_id);
        if token.is_empty() {
            return Err(EngineError::InvalidInput(
                "tokenId must contain at least one letter or digit".to_string(),
            ));
        }
        let now = self.clock.now();
        let created = self
            .call(
                "insert_subject",
                self.store.insert_subject(&new, &token, now),
            )
            .await?;
        info!(subject_id = created.subject.id, token = %token, "subject registered");
        self.publish(&created.audit);
        Ok(created)
    }

    /// Append a Created / Updated / Deleted entry reported by the profile
    /// system. `Deleted` is accepted for subjects already gone.
    pub async fn record_subject_event(
        &self,
        subject_id: SubjectId,
        kind: AuditKind,
        detail: &str,
    ) -> Result<AuditEntry, EngineError> {
        if !kind.is_lifecycle() {
            return Err(EngineError::InvalidInput(format!(
                "{} is not a lifecycle event",
                kind.as_str()
            )));
        }
        if kind != AuditKind::Deleted {
            self.require_subject(subject_id).await?;
        }
        let entry = lifecycle(subject_id, kind, detail, self.clock.now());
        self.call("append_audit", self.store.append_audit(&entry))
            .await?;
        debug!(subject_id, kind = kind.as_str(), "lifecycle event recorded");
        self.publish(&entry);
        Ok(entry)
    }

    pub async fn remove_subject(
        &self,
        subject_id: SubjectId,
        detail: &str,
    ) -> Result<AuditEntry, EngineError> {
        let now = self.clock.now();
        let entry = self
            .call(
                "delete_subject",
                self.store.delete_subject(subject_id, detail, now),
            )
            .await?;
        info!(subject_id, "subject removed");
        self.publish(&entry);
        Ok(entry)
    }
}
