//! Prepares one notification for sending by running the recipient
//! initialization step under the configured retry policy.

use std::sync::Arc;

use sqlx::PgPool;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_engine::activity::{InitializationReport, RecipientInitializationActivity};
use herald_engine::directory::DirectoryReader;
use herald_engine::invoker::{StepInvoker, StepOutcome};
use herald_engine::journal::StepJournal;
use herald_engine::postgres::{PgRecipientDirectory, PgTrackingStore};
use herald_engine::retry::RetryPolicy;
use herald_engine::tracking::TrackingInitializer;

use crate::request::PrepRequest;

/// Result of preparing a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepOutcome {
    /// Tracking rows were initialized in this call.
    Initialized(InitializationReport),
    /// This run was delivered before and already completed the step.
    AlreadyInitialized,
}

/// Runs the preparation pipeline for queued prep requests.
#[derive(Clone)]
pub struct Preparer {
    activity: RecipientInitializationActivity,
    invoker: StepInvoker,
    policy: RetryPolicy,
}

impl Preparer {
    pub fn new(
        activity: RecipientInitializationActivity,
        invoker: StepInvoker,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            activity,
            invoker,
            policy,
        }
    }

    /// Wire the Postgres stores and the given journal from configuration.
    pub fn postgres(pool: PgPool, journal: Arc<dyn StepJournal>, config: &AppConfig) -> Self {
        let directory = DirectoryReader::from_config(
            Arc::new(PgRecipientDirectory::new(pool.clone())),
            config,
        );
        let initializer =
            TrackingInitializer::from_config(Arc::new(PgTrackingStore::new(pool)), config);

        Self::new(
            RecipientInitializationActivity::new(directory, initializer),
            StepInvoker::new(journal),
            RetryPolicy::activity_from_config(config),
        )
    }

    /// Initialize tracking rows for the notification named in `request`.
    pub async fn prepare(&self, request: &PrepRequest) -> Result<PrepOutcome, AppError> {
        let outcome = self
            .activity
            .run_with_retry(
                &self.invoker,
                &self.policy,
                &request.run_id,
                &request.notification_id,
            )
            .await?;

        Ok(match outcome {
            StepOutcome::Ran(report) => PrepOutcome::Initialized(report),
            StepOutcome::Replayed(_) => PrepOutcome::AlreadyInitialized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use herald_common::types::{DeliveryStatus, NotificationId, Recipient};
    use herald_engine::memory::{InMemoryDirectory, InMemoryStepJournal, InMemoryTrackingStore};

    fn preparer(
        directory: Arc<InMemoryDirectory>,
        store: Arc<InMemoryTrackingStore>,
    ) -> Preparer {
        Preparer::new(
            RecipientInitializationActivity::new(
                DirectoryReader::new(directory, 10, RetryPolicy::no_retry()),
                TrackingInitializer::new(store, 10, 2),
            ),
            StepInvoker::new(Arc::new(InMemoryStepJournal::default())),
            RetryPolicy::fixed(2, Duration::from_millis(1)),
        )
    }

    fn request(notification_id: &str, run_id: &str) -> PrepRequest {
        PrepRequest {
            notification_id: NotificationId::new(notification_id).unwrap(),
            run_id: run_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_prepare_then_replay() {
        let directory = Arc::new(InMemoryDirectory::with_ids(&["u1", "u2"]));
        let store = Arc::new(InMemoryTrackingStore::default());
        let preparer = preparer(directory, store.clone());
        let request = request("n-7", "run-1");

        let first = preparer.prepare(&request).await.unwrap();
        match first {
            PrepOutcome::Initialized(report) => {
                assert_eq!(report.notification_id.as_str(), "n-7");
                assert_eq!(report.created, 2);
            }
            other => panic!("expected Initialized, got {:?}", other),
        }

        let second = preparer.prepare(&request).await.unwrap();
        assert_eq!(second, PrepOutcome::AlreadyInitialized);
        assert_eq!(store.rows_for("n-7").len(), 2);
    }

    #[tokio::test]
    async fn test_new_run_picks_up_directory_growth() {
        let directory = Arc::new(InMemoryDirectory::with_ids(&["u1", "u2", "u3"]));
        let store = Arc::new(InMemoryTrackingStore::default());
        let preparer = preparer(directory.clone(), store.clone());

        preparer.prepare(&request("n-100", "run-1")).await.unwrap();
        store.set_status("n-100", "u1", DeliveryStatus::Sent);
        directory.upsert(Recipient::new("u4"));

        let outcome = preparer
            .prepare(&PrepRequest::parse("n-100").unwrap())
            .await
            .unwrap();

        match outcome {
            PrepOutcome::Initialized(report) => assert_eq!(report.created, 1),
            other => panic!("expected Initialized, got {:?}", other),
        }
        assert_eq!(store.rows_for("n-100").len(), 4);
        assert_eq!(store.row("n-100", "u1").unwrap().status, DeliveryStatus::Sent);
        assert_eq!(store.row("n-100", "u4").unwrap().status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn test_directory_outage_surfaces_as_exhausted_step() {
        let directory = Arc::new(InMemoryDirectory::with_ids(&["u1"]));
        directory.set_offline(true);
        let store = Arc::new(InMemoryTrackingStore::default());
        let preparer = preparer(directory, store.clone());

        let err = preparer.prepare(&request("n-7", "run-1")).await.unwrap_err();

        match err {
            AppError::StepExhausted { attempts, source, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, AppError::DirectoryUnavailable(_)));
            }
            other => panic!("expected StepExhausted, got {:?}", other),
        }
        assert!(store.rows_for("n-7").is_empty());
    }
}
