//! Workflow step invoker.
//!
//! Runs a step under a [`RetryPolicy`] and journals the outcome. The whole
//! step is re-invoked on every retry; steps must therefore be idempotent.

use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use herald_common::error::AppError;

use crate::journal::{StepJournal, StepRecord, StepStatus};
use crate::retry::{self, RetryPolicy};

/// How a step invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    /// The step ran to completion in this invocation.
    Ran(T),
    /// The journal already held a completed record; nothing was executed.
    Replayed(StepRecord),
}

impl<T> StepOutcome<T> {
    pub fn is_replayed(&self) -> bool {
        matches!(self, StepOutcome::Replayed(_))
    }
}

/// Calls workflow steps with retry and records the result.
#[derive(Clone)]
pub struct StepInvoker {
    journal: Arc<dyn StepJournal>,
}

impl StepInvoker {
    pub fn new(journal: Arc<dyn StepJournal>) -> Self {
        Self { journal }
    }

    /// Run `step` for workflow `instance`, retrying per `policy`.
    ///
    /// `instance` names one workflow run. A redelivery of the same run finds
    /// the completed record and is skipped; a new run of the same campaign
    /// uses a fresh instance and executes the step again.
    ///
    /// Returns `StepExhausted` once the policy runs out or a non-retryable
    /// error occurs; the failure is journaled before returning.
    pub async fn call_with_retry<T, F, Fut>(
        &self,
        instance: &str,
        step: &str,
        policy: &RetryPolicy,
        mut op: F,
    ) -> Result<StepOutcome<T>, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(record) = self.journal.get(instance, step).await?
            && record.status == StepStatus::Completed
        {
            tracing::info!(
                instance,
                step,
                recorded_at = %record.recorded_at,
                "Step already completed, skipping"
            );
            return Ok(StepOutcome::Replayed(record));
        }

        let invocation_id = Uuid::new_v4();
        tracing::info!(
            instance,
            step,
            invocation_id = %invocation_id,
            max_attempts = policy.max_attempts,
            "Invoking step"
        );

        let mut attempts = 0u32;
        let result = retry::run_with_backoff(policy, step, || {
            attempts += 1;
            op()
        })
        .await;

        match result {
            Ok(value) => {
                self.journal
                    .record(instance, step, &StepRecord::completed(attempts))
                    .await?;
                tracing::info!(
                    instance,
                    step,
                    invocation_id = %invocation_id,
                    attempts,
                    "Step completed"
                );
                Ok(StepOutcome::Ran(value))
            }
            Err(exhausted) => {
                let record = StepRecord::failed(exhausted.attempts, &exhausted.last_error);
                if let Err(e) = self.journal.record(instance, step, &record).await {
                    tracing::error!(
                        instance,
                        step,
                        error = %e,
                        "Failed to journal step failure"
                    );
                }
                tracing::error!(
                    instance,
                    step,
                    invocation_id = %invocation_id,
                    attempts = exhausted.attempts,
                    kind = exhausted.last_error.kind(),
                    error = %exhausted.last_error,
                    "Step failed permanently"
                );
                Err(AppError::StepExhausted {
                    step: step.to_string(),
                    attempts: exhausted.attempts,
                    source: Box::new(exhausted.last_error),
                })
            }
        }
    }
}
