//! Step journal. Records which workflow steps have completed or failed.
//!
//! The invoker consults the journal before running a step so a replayed
//! workflow run does not re-execute a step that already completed. The
//! Redis journal stores one JSON record per `(instance, step)` under
//! `herald:step:{instance}:{step}` with a retention TTL.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use async_trait::async_trait;
use herald_common::error::AppError;

/// Default retention for journal records (7 days).
const DEFAULT_RETENTION_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Final status of a step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Completed => write!(f, "completed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What the journal knows about one step of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn completed(attempts: u32) -> Self {
        Self {
            status: StepStatus::Completed,
            attempts,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(attempts: u32, error: &AppError) -> Self {
        Self {
            status: StepStatus::Failed,
            attempts,
            error: Some(error.to_string()),
            recorded_at: Utc::now(),
        }
    }
}

/// Durable record of step outcomes.
#[async_trait]
pub trait StepJournal: Send + Sync {
    async fn get(&self, instance: &str, step: &str) -> Result<Option<StepRecord>, AppError>;

    async fn record(
        &self,
        instance: &str,
        step: &str,
        record: &StepRecord,
    ) -> Result<(), AppError>;
}

/// Redis-backed step journal.
#[derive(Clone)]
pub struct RedisStepJournal {
    redis: ConnectionManager,
    retention_secs: u64,
}

impl RedisStepJournal {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            retention_secs: DEFAULT_RETENTION_SECONDS,
        }
    }

    fn key(instance: &str, step: &str) -> String {
        format!("herald:step:{}:{}", instance, step)
    }
}

#[async_trait]
impl StepJournal for RedisStepJournal {
    async fn get(&self, instance: &str, step: &str) -> Result<Option<StepRecord>, AppError> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(Self::key(instance, step)).await?;

        match raw {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|e| {
                AppError::Internal(format!(
                    "corrupt journal record for {}/{}: {}",
                    instance, step, e
                ))
            }),
            None => Ok(None),
        }
    }

    async fn record(
        &self,
        instance: &str,
        step: &str,
        record: &StepRecord,
    ) -> Result<(), AppError> {
        let json = serde_json::to_string(record)
            .map_err(|e| AppError::Internal(format!("journal record encode: {}", e)))?;

        // SET key json EX retention
        let mut redis = self.redis.clone();
        redis
            .set_ex::<_, _, ()>(Self::key(instance, step), json, self.retention_secs)
            .await?;

        tracing::debug!(
            instance,
            step,
            status = %record.status,
            attempts = record.attempts,
            "Step journaled"
        );
        Ok(())
    }
}
