use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Row was updated or deleted by another transaction: [{entity}#{id}]")]
    StaleObjectState { entity: String, id: String },

    #[error("Newer version [{latest}] of entity [{entity}#{id}] found in database")]
    OptimisticLock {
        entity: String,
        id: String,
        latest: String,
    },

    #[error("cannot recreate collection while filter is enabled: {0}")]
    FilteredCollectionRecreate(String),

    #[error("A different object with the same identifier was already associated with the session: [{0}]")]
    NonUniqueObject(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Assertion failure: {0}")]
    AssertionFailure(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown collection role: {0}")]
    UnknownCollectionRole(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    /// Engine bug, never part of normal control flow.
    pub fn is_assertion_failure(&self) -> bool {
        matches!(self, DbError::AssertionFailure(_))
    }

    /// Errors raised by a cache region. These degrade cache consistency but
    /// never undo a database write.
    pub fn is_cache_error(&self) -> bool {
        matches!(self, DbError::Cache(_))
    }

    /// Caller-visible business errors that abort the flush or commit.
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            DbError::StaleObjectState { .. }
                | DbError::OptimisticLock { .. }
                | DbError::FilteredCollectionRecreate(_)
                | DbError::NonUniqueObject(_)
                | DbError::ConstraintViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DbError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for DbError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
