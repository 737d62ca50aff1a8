use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::preparer::{PrepOutcome, Preparer};
use crate::request::PrepRequest;

/// Seconds a `BLPOP` waits before the loop checks in again.
const POP_TIMEOUT_SECS: f64 = 5.0;

/// Queue consumer that prepares each notification it pops.
pub struct PrepWorker {
    redis: ConnectionManager,
    queue_key: String,
    preparer: Preparer,
    error_backoff: Duration,
}

impl PrepWorker {
    pub fn new(redis: ConnectionManager, queue_key: String, preparer: Preparer) -> Self {
        Self {
            redis,
            queue_key,
            preparer,
            error_backoff: Duration::from_secs(1),
        }
    }

    /// Start the consume loop. Runs indefinitely until the task is cancelled.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        tracing::info!(queue = %self.queue_key, "Prep worker started");

        loop {
            let popped: Option<(String, String)> = match self
                .redis
                .blpop(&self.queue_key, POP_TIMEOUT_SECS)
                .await
            {
                Ok(popped) => popped,
                Err(e) => {
                    tracing::warn!(error = %e, "Queue pop failed, backing off");
                    tokio::time::sleep(self.error_backoff).await;
                    continue;
                }
            };

            let Some((_, message)) = popped else {
                continue;
            };

            self.handle(&message).await;
        }
    }

    /// Prepare the notification named by one queue message. Failures are
    /// logged, never fatal to the loop.
    pub async fn handle(&self, message: &str) {
        let request = match PrepRequest::parse(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(message, error = %e, "Dropping invalid queue message");
                return;
            }
        };

        match self.preparer.prepare(&request).await {
            Ok(PrepOutcome::Initialized(report)) => {
                tracing::info!(
                    notification_id = %report.notification_id,
                    run_id = %request.run_id,
                    recipients = report.recipients,
                    created = report.created,
                    "Notification prepared"
                );
            }
            Ok(PrepOutcome::AlreadyInitialized) => {
                tracing::info!(
                    notification_id = %request.notification_id,
                    run_id = %request.run_id,
                    "Run already prepared"
                );
            }
            Err(e) => {
                tracing::error!(
                    notification_id = %request.notification_id,
                    run_id = %request.run_id,
                    kind = e.kind(),
                    error = %e,
                    "Notification failed at recipient initialization"
                );
            }
        }
    }
}
