//! beacon-db
//!
//! Persistence for subjects, status, scan ledger and audit trail behind the
//! [`PresenceStore`] trait. Two backends:
//! - [`PgStore`]: Postgres via sqlx, schema in `migrations/`.
//! - [`MemoryStore`]: in-process tables, same atomicity and ordering rules.

mod error;
mod memory;
mod pg;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use pg::{connect, connect_from_env, migrate, status, DbStatus, PgStore, ENV_DB_URL};
pub use store::{
    always_proceed, next_last_updated, CreatedSubject, MutationContext, MutationResult, Precheck,
    PrecheckFn, PresenceStore, RegisteredScan, StatusMutation,
};

/// Pool for DB-backed tests: connects with BEACON_DATABASE_URL and migrates.
pub async fn testkit_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}
