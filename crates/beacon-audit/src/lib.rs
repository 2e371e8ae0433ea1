//! beacon-audit
//!
//! Two append-only records of what happened:
//! - [`entries`]: builders for the per-subject audit trail. Persistence is the
//!   store's job; this module only fixes the wording and shape.
//! - [`buffer`]: the bounded, newest-first buffer of scans whose token matched
//!   no subject, with a JSON snapshot that survives restarts.

pub mod buffer;
pub mod entries;

pub use buffer::{BufferError, UnregisteredBuffer, DEFAULT_CAPACITY};
pub use entries::{
    lifecycle, new_entry, scan_registered, status_change_message, unregistered_message,
    AUTO_OFFLINE_MESSAGE,
};
