//! Typed view over the merged config JSON.
//!
//! Every section is optional; defaults are the production values. Every key
//! the default config serializes counts as consumed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use beacon_gate::{GateConfig, SweepSchedule};
use beacon_schemas::Status;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub gate: GateSettings,
    pub sweep: SweepSettings,
    pub unregistered: UnregisteredSettings,
    pub audit: AuditSettings,
    pub auth: AuthSettings,
    pub storage: StorageSettings,
    pub daemon: DaemonSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub window_secs: i64,
    /// Status a registered scan sets. Must assert presence.
    pub scan_default_status: Status,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            window_secs: 2 * 60 * 60,
            scan_default_status: Status::Busy,
        }
    }
}

impl GateSettings {
    pub fn gate_config(&self) -> GateConfig {
        GateConfig::window_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,
    pub timezone: String,
    pub check_interval_secs: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: 18,
            minute: 0,
            timezone: "Asia/Manila".to_string(),
            check_interval_secs: 60,
        }
    }
}

impl SweepSettings {
    pub fn schedule(&self) -> Result<SweepSchedule> {
        let grace = i64::try_from(self.check_interval_secs).unwrap_or(i64::MAX);
        Ok(SweepSchedule::new(self.hour, self.minute, &self.timezone)?.with_grace_secs(grace)?)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnregisteredSettings {
    pub capacity: usize,
    /// `None` keeps the buffer in memory only.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for UnregisteredSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            snapshot_path: Some(PathBuf::from("data/unregistered_scans.json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub default_page: usize,
    pub max_page: usize,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            default_page: 20,
            max_page: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// NAME of the env var holding the privileged bearer token.
    pub privileged_token_env: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            privileged_token_env: "BEACON_PRIVILEGED_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Upper bound on a single store call; exceeded calls fail as retryable.
    pub timeout_ms: u64,
    /// NAME of the env var holding the Postgres URL. Unset var = in-memory store.
    pub database_url_env: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            database_url_env: "BEACON_DATABASE_URL".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub addr: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8899".to_string(),
        }
    }
}

impl BeaconConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gate.window_secs <= 0 {
            bail!(
                "CONFIG_INVALID gate.window_secs must be > 0 (got {})",
                self.gate.window_secs
            );
        }
        if !self.gate.scan_default_status.requires_presence() {
            bail!("CONFIG_INVALID gate.scan_default_status must not be Offline");
        }
        if self.sweep.check_interval_secs == 0 {
            bail!("CONFIG_INVALID sweep.check_interval_secs must be > 0");
        }
        self.sweep
            .schedule()
            .context("CONFIG_INVALID sweep schedule")?;
        if self.unregistered.capacity == 0 {
            bail!("CONFIG_INVALID unregistered.capacity must be > 0");
        }
        if self.audit.default_page == 0 || self.audit.default_page > self.audit.max_page {
            bail!(
                "CONFIG_INVALID audit.default_page must be in 1..=max_page ({} / {})",
                self.audit.default_page,
                self.audit.max_page
            );
        }
        if self.storage.timeout_ms == 0 {
            bail!("CONFIG_INVALID storage.timeout_ms must be > 0");
        }
        if self.auth.privileged_token_env.trim().is_empty() {
            bail!("CONFIG_INVALID auth.privileged_token_env must name an env var");
        }
        Ok(())
    }
}
