//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"BEACON_PRIVILEGED_TOKEN"`).
//! - At startup, callers invoke [`resolve_secrets`] once and pass the result
//!   into constructors; no other module reads these env vars.
//! - `Debug` redacts values. Error messages reference the NAME, never the value.

use crate::BeaconConfig;

/// Secrets resolved from the environment for one process.
/// **Values are redacted in `Debug` output.**
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    /// Bearer token that grants the privileged caller role. `None` = no
    /// caller can be privileged over HTTP.
    pub privileged_token: Option<String>,
    /// Postgres URL. `None` = in-memory store.
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "privileged_token",
                &self.privileged_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Unset or blank = `None`.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

pub fn resolve_secrets(cfg: &BeaconConfig) -> ResolvedSecrets {
    ResolvedSecrets {
        privileged_token: resolve_env(&cfg.auth.privileged_token_env),
        database_url: resolve_env(&cfg.storage.database_url_env),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_values() {
        let s = ResolvedSecrets {
            privileged_token: Some("hunter2-admin".into()),
            database_url: None,
        };
        let out = format!("{s:?}");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<REDACTED>"));
    }

    #[test]
    fn missing_env_resolves_to_none() {
        let mut cfg = BeaconConfig::default();
        cfg.auth.privileged_token_env = "BEACON_TEST_SURELY_UNSET_7F3A".into();
        cfg.storage.database_url_env = "BEACON_TEST_SURELY_UNSET_9C1D".into();
        let s = resolve_secrets(&cfg);
        assert!(s.privileged_token.is_none());
        assert!(s.database_url.is_none());
    }
}
