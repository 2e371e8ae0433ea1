//! beacon-gate
//!
//! Status gate + sweep schedule.
//!
//! - A presence-asserting status needs a scan inside the gate window.
//! - Only a privileged caller may bypass the window.
//! - The daily sweep fires once per local calendar day.
//!
//! Pure deterministic logic. No IO, no wall-clock. Callers provide `now`.

mod engine;
mod schedule;
mod token;
mod types;

pub use engine::{authorize, scan_validity};
pub use schedule::{ScheduleError, SweepLatch, SweepSchedule};
pub use token::normalize_token;
pub use types::*;
