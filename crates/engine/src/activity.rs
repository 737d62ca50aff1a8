//! Recipient initialization activity.
//!
//! Prepares a broadcast to all users by creating one `pending` tracking row
//! per directory recipient:
//! 1. Read the complete recipient directory (via `DirectoryReader`)
//! 2. Bulk-initialize tracking rows for the notification (via `TrackingInitializer`)
//!
//! The activity keeps no progress between invocations. A failed run is
//! retried from the start and relies on create-if-absent writes to avoid
//! duplicates.

use herald_common::error::AppError;
use herald_common::types::{NotificationId, Recipient};

use crate::directory::DirectoryReader;
use crate::invoker::{StepInvoker, StepOutcome};
use crate::retry::RetryPolicy;
use crate::tracking::TrackingInitializer;

/// Journal name of this step.
pub const STEP_NAME: &str = "recipient_initialization";

/// Per-invocation state.
#[derive(Debug)]
pub enum ActivityState {
    Start,
    ReadingDirectory,
    InitializingTracking(Vec<Recipient>),
    Completed(InitializationReport),
    Failed(AppError),
}

impl ActivityState {
    pub fn name(&self) -> &'static str {
        match self {
            ActivityState::Start => "start",
            ActivityState::ReadingDirectory => "reading_directory",
            ActivityState::InitializingTracking(_) => "initializing_tracking",
            ActivityState::Completed(_) => "completed",
            ActivityState::Failed(_) => "failed",
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationReport {
    pub notification_id: NotificationId,
    /// Recipients returned by the directory.
    pub recipients: usize,
    /// Tracking rows created by this run.
    pub created: u64,
}

/// Reads all recipients and initializes their tracking rows.
#[derive(Clone)]
pub struct RecipientInitializationActivity {
    directory: DirectoryReader,
    initializer: TrackingInitializer,
}

impl RecipientInitializationActivity {
    pub fn new(directory: DirectoryReader, initializer: TrackingInitializer) -> Self {
        Self {
            directory,
            initializer,
        }
    }

    /// Execute one attempt of the activity.
    pub async fn run(
        &self,
        notification_id: &NotificationId,
    ) -> Result<InitializationReport, AppError> {
        let mut state = ActivityState::Start;

        loop {
            state = match state {
                ActivityState::Start => ActivityState::ReadingDirectory,
                ActivityState::ReadingDirectory => {
                    match self.directory.list_all_recipients().await {
                        Ok(recipients) => ActivityState::InitializingTracking(recipients),
                        Err(err) => ActivityState::Failed(err),
                    }
                }
                ActivityState::InitializingTracking(recipients) => {
                    match self
                        .initializer
                        .initialize_tracking_rows(notification_id, &recipients)
                        .await
                    {
                        Ok(summary) => ActivityState::Completed(InitializationReport {
                            notification_id: notification_id.clone(),
                            recipients: recipients.len(),
                            created: summary.created,
                        }),
                        Err(err) => ActivityState::Failed(err),
                    }
                }
                ActivityState::Completed(report) => {
                    tracing::info!(
                        notification_id = %notification_id,
                        recipients = report.recipients,
                        created = report.created,
                        "Recipient initialization completed"
                    );
                    return Ok(report);
                }
                ActivityState::Failed(err) => {
                    tracing::warn!(
                        notification_id = %notification_id,
                        kind = err.kind(),
                        error = %err,
                        "Recipient initialization failed"
                    );
                    return Err(err);
                }
            };

            tracing::debug!(
                notification_id = %notification_id,
                state = state.name(),
                "Activity state changed"
            );
        }
    }

    /// Run the activity as a step of workflow run `run_id` under `policy`.
    ///
    /// The journal is keyed by `run_id`, so only a redelivery of the same run
    /// is skipped. Each new run re-reads the directory and adds rows for
    /// recipients that joined since the previous run.
    pub async fn run_with_retry(
        &self,
        invoker: &StepInvoker,
        policy: &RetryPolicy,
        run_id: &str,
        notification_id: &NotificationId,
    ) -> Result<StepOutcome<InitializationReport>, AppError> {
        invoker
            .call_with_retry(run_id, STEP_NAME, policy, || self.run(notification_id))
            .await
    }
}
