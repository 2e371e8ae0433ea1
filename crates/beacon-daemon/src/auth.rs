//! Privileged-caller resolution.
//!
//! The caller role is decided here, from the `Authorization` header, and
//! nowhere else. A request body can ask for `bypass`, but only a bearer token
//! whose SHA-256 matches the configured credential makes the caller
//! privileged. Only the digest is kept in memory.

use axum::http::{header, HeaderMap};
use beacon_config::ResolvedSecrets;
use beacon_gate::CallerRole;
use sha2::{Digest, Sha256};

#[derive(Clone, Default)]
pub struct PrivilegedAuth {
    digest: Option<[u8; 32]>,
}

impl std::fmt::Debug for PrivilegedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegedAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

impl PrivilegedAuth {
    /// No credential configured: every caller is a client.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() {
            return Self::disabled();
        }
        Self {
            digest: Some(sha256(token.as_bytes())),
        }
    }

    pub fn from_secrets(secrets: &ResolvedSecrets) -> Self {
        secrets
            .privileged_token
            .as_deref()
            .map(Self::from_token)
            .unwrap_or_default()
    }

    pub fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }

    pub fn role_for(&self, headers: &HeaderMap) -> CallerRole {
        let Some(expected) = &self.digest else {
            return CallerRole::Client;
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        match presented {
            Some(token) if digests_match(&sha256(token.as_bytes()), expected) => {
                CallerRole::Privileged
            }
            _ => CallerRole::Client,
        }
    }
}

/// Compares every byte regardless of where the first mismatch is.
fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
