use std::str::FromStr;

use serde::Deserialize;

use crate::error::AppError;

/// Largest tracking batch that fits in one Postgres statement.
pub const MAX_TRACKING_BATCH_SIZE: usize = 5000;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Recipients fetched per directory page (default: 1000)
    pub directory_page_size: u32,

    /// Attempts per directory page before the directory is reported unavailable (default: 3)
    pub directory_page_attempts: u32,

    /// Tracking rows written per batch (default: 100)
    pub tracking_batch_size: usize,

    /// Tracking batches allowed in flight at once (default: 4)
    pub tracking_max_concurrent_batches: usize,

    /// Whole-activity attempts before the step is declared failed (default: 3)
    pub activity_max_attempts: u32,

    /// Delay before the first activity retry in milliseconds (default: 5000)
    pub activity_backoff_ms: u64,

    /// Multiplier applied to the delay after each failed attempt (default: 2.0)
    pub activity_backoff_coefficient: f64,

    /// Upper bound for a single retry delay in milliseconds (default: 60000)
    pub activity_max_backoff_ms: u64,

    /// Redis list the prep worker pops notification ids from
    pub prep_queue_key: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| {
                    AppError::Config("DATABASE_URL environment variable is required".into())
                })?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 20)?,
            directory_page_size: env_or("DIRECTORY_PAGE_SIZE", 1000)?,
            directory_page_attempts: env_or("DIRECTORY_PAGE_ATTEMPTS", 3)?,
            tracking_batch_size: env_or("TRACKING_BATCH_SIZE", 100)?,
            tracking_max_concurrent_batches: env_or("TRACKING_MAX_CONCURRENT_BATCHES", 4)?,
            activity_max_attempts: env_or("ACTIVITY_MAX_ATTEMPTS", 3)?,
            activity_backoff_ms: env_or("ACTIVITY_BACKOFF_MS", 5000)?,
            activity_backoff_coefficient: env_or("ACTIVITY_BACKOFF_COEFFICIENT", 2.0)?,
            activity_max_backoff_ms: env_or("ACTIVITY_MAX_BACKOFF_MS", 60_000)?,
            prep_queue_key: std::env::var("HERALD_PREP_QUEUE")
                .unwrap_or_else(|_| "herald:prep:queue".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline stall or never write.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.directory_page_size == 0 {
            return Err(AppError::Config(
                "DIRECTORY_PAGE_SIZE must be greater than zero".to_string(),
            ));
        }
        if self.directory_page_attempts == 0 {
            return Err(AppError::Config(
                "DIRECTORY_PAGE_ATTEMPTS must be greater than zero".to_string(),
            ));
        }
        if self.tracking_batch_size == 0 {
            return Err(AppError::Config(
                "TRACKING_BATCH_SIZE must be greater than zero".to_string(),
            ));
        }
        // 11 bind parameters per row, Postgres allows 65535 per statement
        if self.tracking_batch_size > MAX_TRACKING_BATCH_SIZE {
            return Err(AppError::Config(format!(
                "TRACKING_BATCH_SIZE must not exceed {}",
                MAX_TRACKING_BATCH_SIZE
            )));
        }
        if self.tracking_max_concurrent_batches == 0 {
            return Err(AppError::Config(
                "TRACKING_MAX_CONCURRENT_BATCHES must be greater than zero".to_string(),
            ));
        }
        if self.activity_max_attempts == 0 {
            return Err(AppError::Config(
                "ACTIVITY_MAX_ATTEMPTS must be greater than zero".to_string(),
            ));
        }
        if self.activity_backoff_coefficient < 1.0 {
            return Err(AppError::Config(
                "ACTIVITY_BACKOFF_COEFFICIENT must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read and parse an optional environment variable, falling back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::Config(format!(
                "{} must be a valid {}",
                key,
                std::any::type_name::<T>()
            ))
        }),
        Err(_) => Ok(default),
    }
}
