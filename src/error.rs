//! Error taxonomy for the acquisition pipeline.
//!
//! Library code returns [`Result`]; the binary wraps these in `anyhow`.
//! Which variants are fatal and which are recoverable is decided by the
//! caller (see [`ScoutError::is_fatal_to_run`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoutError {
    /// Missing or invalid settings, credentials or site descriptor.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Login or navigation failed outright; ends the current run.
    #[error("session error: {0}")]
    Session(String),

    /// Timeout, missing selector or missing dropdown.
    #[error("page error: {0}")]
    TransientPage(String),

    /// The model response could not be turned into records.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// A value failed a record invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// A single storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[source] sqlx::Error),

    /// A storage contract was violated (e.g. a run completed twice).
    #[error("storage error: {0}")]
    StorageContract(String),

    /// The connection pool could not be established.
    #[error("database connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ScoutError {
    /// Errors that must end a run with status `failed`.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            ScoutError::Configuration(_) | ScoutError::Session(_) | ScoutError::Connection(_)
        )
    }
}

impl From<sqlx::Error> for ScoutError {
    fn from(err: sqlx::Error) -> Self {
        ScoutError::Storage(err)
    }
}

impl From<sqlx::migrate::MigrateError> for ScoutError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ScoutError::Storage(sqlx::Error::Migrate(Box::new(err)))
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
