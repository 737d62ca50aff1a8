//! Prep queue messages.
//!
//! A message names one workflow run of a notification:
//!
//! ```json
//! {"notification_id": "n-100", "run_id": "6f1c..."}
//! ```
//!
//! Redelivering the same message replays that run. A bare notification id is
//! also accepted and starts a fresh run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::NotificationId;

/// One run of the preparation workflow for a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepRequest {
    pub notification_id: NotificationId,
    pub run_id: String,
}

impl PrepRequest {
    /// Start a new run with a generated run id.
    pub fn new(notification_id: NotificationId) -> Self {
        Self {
            notification_id,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Decode a raw queue message.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let raw = raw.trim();
        if !raw.starts_with('{') {
            return Ok(Self::new(NotificationId::new(raw)?));
        }

        let request: PrepRequest = serde_json::from_str(raw)
            .map_err(|e| AppError::Validation(format!("malformed prep message: {}", e)))?;
        if request.run_id.trim().is_empty() {
            return Err(AppError::Validation("run id must not be empty".to_string()));
        }
        Ok(request)
    }
}
