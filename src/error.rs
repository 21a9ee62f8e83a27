use thiserror::Error;

/// Failure talking to a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// The session catalog could not be read. Fatal for a whole run.
#[derive(Debug, Error)]
#[error("failed to load eligible sessions: {source}")]
pub struct RetrievalError {
    #[from]
    pub source: StoreError,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("session {session_id} ends before it starts")]
    InvertedWindow { session_id: String },
}

/// A single record could not be written.
#[derive(Debug, Error)]
#[error("failed to write attendance for student {student_id} in session {session_id}: {source}")]
pub struct PersistenceError {
    pub session_id: String,
    pub student_id: String,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: {reason}")]
    Row { row: usize, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
