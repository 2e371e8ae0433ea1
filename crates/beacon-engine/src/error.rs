use beacon_audit::BufferError;
use beacon_db::StoreError;
use beacon_gate::DenyReason;
use beacon_schemas::SubjectId;
use thiserror::Error;

/// Engine error taxonomy.
///
/// `InvalidInput` and `GateDenied` are terminal: retrying the same request
/// gives the same answer. Storage faults are the only retryable kind.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Expected outcome of the status gate, not a fault.
    #[error("status change denied: {0}")]
    GateDenied(DenyReason),

    #[error("storage failure: {0}")]
    Storage(StoreError),

    #[error("unregistered snapshot failure: {0}")]
    Snapshot(#[from] BufferError),

    /// Reserved. Same-subject writers block on the subject lock instead.
    #[error("concurrent modification of subject {0}")]
    ConcurrencyConflict(SubjectId),
}

impl EngineError {
    pub fn subject_not_found(id: SubjectId) -> Self {
        EngineError::NotFound {
            entity: "subject",
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_) | EngineError::Snapshot(_))
    }

    /// Stable machine-readable code for wire responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::NotFound { .. } => "not_found",
            EngineError::GateDenied(_) => "gate_denied",
            EngineError::Storage(_) | EngineError::Snapshot(_) => "storage_error",
            EngineError::ConcurrencyConflict(_) => "concurrency_conflict",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            StoreError::Constraint(msg) => EngineError::InvalidInput(msg),
            other => EngineError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_is_retryable() {
        assert!(EngineError::Storage(StoreError::Unavailable("x".into())).is_retryable());
        assert!(!EngineError::GateDenied(DenyReason::NoScanOnRecord).is_retryable());
        assert!(!EngineError::InvalidInput("x".into()).is_retryable());
        assert!(!EngineError::subject_not_found(3).is_retryable());
    }

    #[test]
    fn store_not_found_and_constraint_are_not_storage_faults() {
        let e: EngineError = StoreError::subject_not_found(9).into();
        assert!(matches!(e, EngineError::NotFound { .. }));
        let e: EngineError = StoreError::Constraint("dup".into()).into();
        assert!(matches!(e, EngineError::InvalidInput(_)));
    }

    #[test]
    fn gate_denial_message_carries_elapsed() {
        let e = EngineError::GateDenied(DenyReason::WindowExpired {
            elapsed_secs: 7201,
            window_secs: 7200,
        });
        assert!(e.to_string().contains("7201s"), "{e}");
    }
}
