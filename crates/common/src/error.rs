use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    /// The recipient directory could not be read after its own retry budget.
    #[error("Recipient directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The tracking store rejected every batch; nothing was committed.
    #[error("Tracking store unavailable: {0}")]
    StoreUnavailable(String),

    /// Some batches committed, the listed ones did not.
    #[error(
        "Partial write failure: {created} rows created, batches {failed_batches:?} of {total_batches} failed"
    )]
    PartialWriteFailure {
        created: u64,
        failed_batches: Vec<usize>,
        total_batches: usize,
    },

    /// A workflow step ran out of attempts.
    #[error("Step '{step}' failed after {attempts} attempt(s): {source}")]
    StepExhausted {
        step: String,
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether re-invoking the failed operation can succeed.
    ///
    /// Store and directory outages are transient; malformed input and
    /// misconfiguration fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::DirectoryUnavailable(_)
            | AppError::StoreUnavailable(_)
            | AppError::PartialWriteFailure { .. }
            | AppError::Database(_)
            | AppError::Redis(_) => true,
            AppError::StepExhausted { .. }
            | AppError::Config(_)
            | AppError::Validation(_)
            | AppError::Internal(_) => false,
        }
    }

    /// Short machine-readable label, used in logs and the step journal.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::DirectoryUnavailable(_) => "directory_unavailable",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::PartialWriteFailure { .. } => "partial_write_failure",
            AppError::StepExhausted { .. } => "step_exhausted",
            AppError::Database(_) => "database",
            AppError::Redis(_) => "redis",
            AppError::Config(_) => "config",
            AppError::Validation(_) => "validation",
            AppError::Internal(_) => "internal",
        }
    }
}
