use thiserror::Error;

/// Storage-layer failure. Everything except `NotFound` and `Constraint` is a
/// transient fault the caller may retry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("stored value could not be decoded: {0}")]
    Decode(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn subject_not_found(id: i64) -> Self {
        StoreError::NotFound {
            entity: "subject",
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Sqlx(_) | StoreError::Unavailable(_))
    }
}

/// SQLSTATE 23505 (unique_violation) becomes `Constraint`; everything else
/// stays a driver error.
pub(crate) fn map_sqlx(err: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Constraint(format!("{what}: {}", db_err.message()));
        }
    }
    StoreError::Sqlx(err)
}
