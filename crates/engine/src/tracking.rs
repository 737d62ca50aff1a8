//! Tracking store initializer: idempotent bulk creation of `pending` rows.
//!
//! Recipients are turned into [`TrackingRow`]s and written in fixed-size
//! batches. Each batch is a single create-if-absent write, so a row either
//! exists in full or not at all, and rows the delivery stage has already
//! advanced are never touched.
//!
//! Batches run with bounded concurrency, but results are consumed in batch
//! order and every batch is attempted before the outcome is decided:
//!
//! | committed batches | outcome                 |
//! |-------------------|-------------------------|
//! | all               | `Ok(summary)`           |
//! | none              | `StoreUnavailable`      |
//! | some              | `PartialWriteFailure`   |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::types::{NotificationId, Recipient, TrackingRow};

/// A store able to create tracking rows that do not exist yet.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Atomically insert every row whose `(notification_id, recipient_id)`
    /// key is absent. Returns how many rows were created.
    async fn insert_batch(&self, rows: &[TrackingRow]) -> Result<u64, AppError>;
}

/// Result of a fully successful initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializationSummary {
    /// Rows created by this call.
    pub created: u64,
    /// Recipients whose row already existed.
    pub already_present: u64,
    pub batches: usize,
}

/// Writes tracking rows for a notification in batches.
#[derive(Clone)]
pub struct TrackingInitializer {
    store: Arc<dyn TrackingStore>,
    batch_size: usize,
    max_concurrent: usize,
}

impl TrackingInitializer {
    pub fn new(store: Arc<dyn TrackingStore>, batch_size: usize, max_concurrent: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(store: Arc<dyn TrackingStore>, config: &AppConfig) -> Self {
        Self::new(
            store,
            config.tracking_batch_size,
            config.tracking_max_concurrent_batches,
        )
    }

    /// Create one `pending` row per recipient for `notification_id`,
    /// skipping keys that already exist.
    ///
    /// Safe to call again after any failure: committed batches become no-ops
    /// and only the missing keys are written.
    pub async fn initialize_tracking_rows(
        &self,
        notification_id: &NotificationId,
        recipients: &[Recipient],
    ) -> Result<InitializationSummary, AppError> {
        if recipients.is_empty() {
            tracing::info!(notification_id = %notification_id, "No recipients to initialize");
            return Ok(InitializationSummary {
                created: 0,
                already_present: 0,
                batches: 0,
            });
        }

        let now = Utc::now();
        let rows: Vec<TrackingRow> = recipients
            .iter()
            .map(|recipient| TrackingRow::initialize(notification_id, recipient, now))
            .collect();

        let store = &*self.store;
        let results: Vec<(usize, usize, Result<u64, AppError>)> =
            stream::iter(rows.chunks(self.batch_size).enumerate())
                .map(|(index, batch)| async move {
                    (index, batch.len(), store.insert_batch(batch).await)
                })
                .buffered(self.max_concurrent)
                .collect()
                .await;

        let total_batches = results.len();
        let mut created = 0u64;
        let mut committed_rows = 0u64;
        let mut failed_batches = Vec::new();
        let mut first_error: Option<AppError> = None;

        for (index, len, result) in results {
            match result {
                Ok(n) => {
                    created += n;
                    committed_rows += len as u64;
                    tracing::debug!(
                        notification_id = %notification_id,
                        batch = index,
                        rows = len,
                        created = n,
                        "Tracking batch committed"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        notification_id = %notification_id,
                        batch = index,
                        rows = len,
                        error = %err,
                        "Tracking batch failed"
                    );
                    failed_batches.push(index);
                    first_error.get_or_insert(err);
                }
            }
        }

        if failed_batches.is_empty() {
            tracing::info!(
                notification_id = %notification_id,
                recipients = recipients.len(),
                created,
                batches = total_batches,
                "Tracking rows initialized"
            );
            return Ok(InitializationSummary {
                created,
                already_present: committed_rows.saturating_sub(created),
                batches: total_batches,
            });
        }

        if failed_batches.len() == total_batches {
            let cause = first_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(AppError::StoreUnavailable(format!(
                "all {} batch(es) failed for notification {}: {}",
                total_batches, notification_id, cause
            )));
        }

        Err(AppError::PartialWriteFailure {
            created,
            failed_batches,
            total_batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_common::types::DeliveryStatus;

    use crate::memory::InMemoryTrackingStore;

    fn recipients(ids: &[&str]) -> Vec<Recipient> {
        ids.iter().map(|id| Recipient::new(*id)).collect()
    }

    fn nid(id: &str) -> NotificationId {
        NotificationId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_creates_one_pending_row_per_recipient() {
        let store = Arc::new(InMemoryTrackingStore::default());
        let init = TrackingInitializer::new(store.clone(), 2, 2);

        let summary = init
            .initialize_tracking_rows(&nid("n-100"), &recipients(&["u1", "u2", "u3"]))
            .await
            .unwrap();

        assert_eq!(summary.created, 3);
        assert_eq!(summary.already_present, 0);
        assert_eq!(summary.batches, 2);

        let rows = store.rows_for("n-100");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == DeliveryStatus::Pending));
    }

    #[tokio::test]
    async fn test_second_call_creates_nothing() {
        let store = Arc::new(InMemoryTrackingStore::default());
        let init = TrackingInitializer::new(store.clone(), 2, 2);
        let list = recipients(&["u1", "u2", "u3"]);

        init.initialize_tracking_rows(&nid("n-1"), &list).await.unwrap();
        let again = init.initialize_tracking_rows(&nid("n-1"), &list).await.unwrap();

        assert_eq!(again.created, 0);
        assert_eq!(again.already_present, 3);
        assert_eq!(store.rows_for("n-1").len(), 3);
    }

    #[tokio::test]
    async fn test_existing_rows_keep_their_status() {
        let store = Arc::new(InMemoryTrackingStore::default());
        let init = TrackingInitializer::new(store.clone(), 10, 1);

        init.initialize_tracking_rows(&nid("n-1"), &recipients(&["u1"]))
            .await
            .unwrap();
        store.set_status("n-1", "u1", DeliveryStatus::Sent);

        init.initialize_tracking_rows(&nid("n-1"), &recipients(&["u1", "u2"]))
            .await
            .unwrap();

        assert_eq!(store.row("n-1", "u1").unwrap().status, DeliveryStatus::Sent);
        assert_eq!(store.row("n-1", "u2").unwrap().status, DeliveryStatus::Pending);
    }

    #[tokio::test]
    async fn test_partial_failure_names_failed_batch() {
        let store = Arc::new(InMemoryTrackingStore::default());
        let init = TrackingInitializer::new(store.clone(), 2, 2);
        store.fail_once_on("u3");

        let err = init
            .initialize_tracking_rows(&nid("n-1"), &recipients(&["u1", "u2", "u3", "u4"]))
            .await
            .unwrap_err();

        match err {
            AppError::PartialWriteFailure {
                created,
                failed_batches,
                total_batches,
            } => {
                assert_eq!(created, 2);
                assert_eq!(failed_batches, vec![1]);
                assert_eq!(total_batches, 2);
            }
            other => panic!("expected PartialWriteFailure, got {:?}", other),
        }
        // failed batch left nothing behind
        assert_eq!(store.rows_for("n-1").len(), 2);
        assert!(store.row("n-1", "u3").is_none());
    }

    #[tokio::test]
    async fn test_all_batches_failing_is_store_unavailable() {
        let store = Arc::new(InMemoryTrackingStore::default());
        store.set_offline(true);
        let init = TrackingInitializer::new(store.clone(), 2, 2);

        let err = init
            .initialize_tracking_rows(&nid("n-1"), &recipients(&["u1", "u2", "u3"]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert!(store.rows_for("n-1").is_empty());
    }

    #[tokio::test]
    async fn test_every_batch_attempted_after_early_failure() {
        let store = Arc::new(InMemoryTrackingStore::default());
        let init = TrackingInitializer::new(store.clone(), 1, 1);
        store.fail_once_on("u1");

        let err = init
            .initialize_tracking_rows(&nid("n-1"), &recipients(&["u1", "u2", "u3"]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PartialWriteFailure { .. }));
        assert_eq!(store.insert_calls(), 3);
        assert_eq!(store.rows_for("n-1").len(), 2);
    }

    #[tokio::test]
    async fn test_campaigns_are_isolated() {
        let store = Arc::new(InMemoryTrackingStore::default());
        let init = TrackingInitializer::new(store.clone(), 10, 2);

        init.initialize_tracking_rows(&nid("n-1"), &recipients(&["u1", "u2"]))
            .await
            .unwrap();
        let other = init
            .initialize_tracking_rows(&nid("n-2"), &recipients(&["u1"]))
            .await
            .unwrap();

        assert_eq!(other.created, 1);
        assert_eq!(store.rows_for("n-1").len(), 2);
        assert_eq!(store.rows_for("n-2").len(), 1);
    }

    #[tokio::test]
    async fn test_empty_recipient_list_writes_nothing() {
        let store = Arc::new(InMemoryTrackingStore::default());
        let init = TrackingInitializer::new(store.clone(), 10, 2);

        let summary = init
            .initialize_tracking_rows(&nid("n-1"), &[])
            .await
            .unwrap();

        assert_eq!(summary.batches, 0);
        assert_eq!(store.insert_calls(), 0);
    }
}
