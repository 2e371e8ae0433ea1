//! beacon-engine
//!
//! Presence engine over a [`beacon_db::PresenceStore`]:
//! - scan ingestion ([`PresenceEngine::accept`])
//! - gated and ungated status writes
//! - the daily auto-offline sweep ([`sweep`])
//! - poll APIs (status, scan validity, audit feed, counts, roster,
//!   unregistered buffer)
//!
//! Time comes from a [`Clock`] so every rule is testable without sleeping.

mod clock;
mod engine;
mod error;
pub mod sweep;

pub use clock::{Clock, SystemClock};
pub use engine::{EngineSettings, PresenceEngine, ScanInput};
pub use error::EngineError;
pub use sweep::{run_sweep_tick, spawn_sweep_loop, SweepReport};
