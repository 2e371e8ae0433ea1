//! Bounded buffer of unregistered scans.
//!
//! - Newest first. Inserting into a full buffer evicts the oldest record.
//! - One writer at a time: prepend, truncate, and snapshot rewrite happen
//!   under a single lock, so the file always matches some committed state.
//! - Readers never take the writer lock; they clone the last published
//!   snapshot out of a `watch` channel.
//! - Persistence is best-effort for `push` (a failed rewrite is logged and the
//!   in-memory state stands) and strict for `clear` / `flush`.
//!
//! The snapshot file is a JSON array rewritten wholesale via tmp + rename.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use beacon_schemas::UnregisteredScanRecord;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, Mutex};

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("unregistered snapshot io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unregistered snapshot encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct UnregisteredBuffer {
    records: Mutex<VecDeque<UnregisteredScanRecord>>,
    published: watch::Sender<Arc<Vec<UnregisteredScanRecord>>>,
    capacity: usize,
    snapshot_path: Option<PathBuf>,
}

impl std::fmt::Debug for UnregisteredBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnregisteredBuffer")
            .field("capacity", &self.capacity)
            .field("snapshot_path", &self.snapshot_path)
            .field("len", &self.published.borrow().len())
            .finish()
    }
}

impl UnregisteredBuffer {
    /// Memory-only buffer (tests, or `snapshot_path: null`).
    pub fn in_memory(capacity: usize) -> Self {
        Self::from_records(Vec::new(), capacity, None)
    }

    /// Load the snapshot at `path`. A missing file starts empty; an unreadable
    /// or corrupt file also starts empty (logged), since the buffer is
    /// diagnostic data and must not block startup.
    pub async fn restore(path: impl AsRef<Path>, capacity: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<UnregisteredScanRecord>>(&bytes) {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "unregistered snapshot corrupt; starting empty");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unregistered snapshot unreadable; starting empty");
                Vec::new()
            }
        };
        let buffer = Self::from_records(records, capacity, Some(path));
        tracing::info!(
            restored = buffer.len(),
            capacity = buffer.capacity,
            "unregistered buffer restored"
        );
        buffer
    }

    fn from_records(
        mut records: Vec<UnregisteredScanRecord>,
        capacity: usize,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        let capacity = capacity.max(1);
        records.truncate(capacity);
        let (published, _) = watch::channel(Arc::new(records.clone()));
        Self {
            records: Mutex::new(records.into()),
            published,
            capacity,
            snapshot_path,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.published.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest first.
    pub fn snapshot(&self) -> Arc<Vec<UnregisteredScanRecord>> {
        self.published.borrow().clone()
    }

    /// Record an unmatched token. Never fails; a snapshot write error is logged.
    pub async fn push(
        &self,
        token_id: &str,
        message: String,
        ts_utc: DateTime<Utc>,
    ) -> UnregisteredScanRecord {
        let record = UnregisteredScanRecord {
            id: record_id(ts_utc),
            token_id: token_id.to_string(),
            message,
            ts_utc,
        };

        let mut records = self.records.lock().await;
        records.push_front(record.clone());
        records.truncate(self.capacity);
        let snap = self.publish(&records);
        if let Err(err) = self.persist(&snap).await {
            tracing::warn!(error = %err, "unregistered snapshot write failed; keeping in-memory state");
        }
        record
    }

    /// Empty the buffer and rewrite the snapshot immediately.
    pub async fn clear(&self) -> Result<usize, BufferError> {
        let mut records = self.records.lock().await;
        let removed = records.len();
        records.clear();
        let snap = self.publish(&records);
        self.persist(&snap).await?;
        Ok(removed)
    }

    /// Rewrite the snapshot from current state (shutdown hook).
    pub async fn flush(&self) -> Result<(), BufferError> {
        let records = self.records.lock().await;
        let snap = self.publish(&records);
        self.persist(&snap).await
    }

    fn publish(&self, records: &VecDeque<UnregisteredScanRecord>) -> Arc<Vec<UnregisteredScanRecord>> {
        let snap = Arc::new(records.iter().cloned().collect::<Vec<_>>());
        self.published.send_replace(snap.clone());
        snap
    }

    async fn persist(&self, records: &[UnregisteredScanRecord]) -> Result<(), BufferError> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };
        let io_err = |source| BufferError::Io {
            path: path.to_path_buf(),
            source,
        };

        let bytes = serde_json::to_vec_pretty(records)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        Ok(())
    }
}

/// `{unix_millis}-{16 hex}`. Unique under concurrent pushes within the same
/// millisecond without a shared counter.
fn record_id(ts_utc: DateTime<Utc>) -> String {
    format!("{}-{:016x}", ts_utc.timestamp_millis(), rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, sec).unwrap()
    }

    #[tokio::test]
    async fn newest_first_and_bounded() {
        let buf = UnregisteredBuffer::in_memory(3);
        for i in 0..5 {
            buf.push(&format!("TOK{i}"), "m".into(), t(i)).await;
        }
        let snap = buf.snapshot();
        let tokens: Vec<_> = snap.iter().map(|r| r.token_id.as_str()).collect();
        assert_eq!(tokens, vec!["TOK4", "TOK3", "TOK2"]);
    }

    #[test]
    fn record_ids_differ_within_same_millisecond() {
        let ts = t(0);
        assert_ne!(record_id(ts), record_id(ts));
        assert!(record_id(ts).starts_with(&ts.timestamp_millis().to_string()));
    }
}
