//! Recipient directory reader.
//!
//! Presents a paginated directory store as one logical "all recipients" read.
//! Pages are walked with a keyset cursor on `recipient_id`; each page gets its
//! own retry budget before the whole read is reported as
//! `DirectoryUnavailable`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::types::Recipient;

use crate::retry::{self, RetryPolicy};

/// A store that can list recipients in `recipient_id` order.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Return up to `limit` recipients whose id sorts strictly after `after`.
    async fn fetch_page(
        &self,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Recipient>, AppError>;
}

/// Reads the complete recipient set from a [`RecipientDirectory`].
#[derive(Clone)]
pub struct DirectoryReader {
    source: Arc<dyn RecipientDirectory>,
    page_size: u32,
    page_retry: RetryPolicy,
}

impl DirectoryReader {
    pub fn new(
        source: Arc<dyn RecipientDirectory>,
        page_size: u32,
        page_retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
            page_retry,
        }
    }

    pub fn from_config(source: Arc<dyn RecipientDirectory>, config: &AppConfig) -> Self {
        Self::new(
            source,
            config.directory_page_size,
            RetryPolicy::exponential(
                config.directory_page_attempts,
                Duration::from_millis(500),
                2.0,
                Duration::from_secs(10),
            ),
        )
    }

    /// Fetch every recipient currently in the directory.
    ///
    /// Each call re-reads the store, so two calls may differ if the directory
    /// changed in between. A recipient id seen on an earlier page is skipped.
    pub async fn list_all_recipients(&self) -> Result<Vec<Recipient>, AppError> {
        let mut recipients = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let after = cursor.clone();
            let page = retry::run_with_backoff(&self.page_retry, "directory_page", || {
                self.source.fetch_page(after.as_deref(), self.page_size)
            })
            .await
            .map_err(|exhausted| {
                tracing::error!(
                    page = pages,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Recipient directory read failed"
                );
                AppError::DirectoryUnavailable(format!(
                    "page {} after {} attempt(s): {}",
                    pages, exhausted.attempts, exhausted.last_error
                ))
            })?;
            pages += 1;

            let fetched = page.len();
            let Some(last_id) = page.last().map(|r| r.recipient_id.clone()) else {
                break;
            };

            if cursor.as_deref().is_some_and(|prev| last_id.as_str() <= prev) {
                return Err(AppError::DirectoryUnavailable(format!(
                    "pagination did not advance past '{}'",
                    last_id
                )));
            }
            cursor = Some(last_id);

            for recipient in page {
                if seen.insert(recipient.recipient_id.clone()) {
                    recipients.push(recipient);
                }
            }

            if fetched < self.page_size as usize {
                break;
            }
        }

        tracing::info!(
            recipients = recipients.len(),
            pages,
            "Recipient directory read complete"
        );

        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::memory::InMemoryDirectory;

    fn reader(directory: &Arc<InMemoryDirectory>, page_size: u32) -> DirectoryReader {
        DirectoryReader::new(
            directory.clone(),
            page_size,
            RetryPolicy::fixed(3, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_reads_all_pages() {
        let ids: Vec<String> = (0..25).map(|i| format!("u{:03}", i)).collect();
        let directory = Arc::new(InMemoryDirectory::with_ids(&ids));

        let recipients = reader(&directory, 10).list_all_recipients().await.unwrap();

        let got: Vec<&str> = recipients.iter().map(|r| r.recipient_id.as_str()).collect();
        assert_eq!(got, ids.iter().map(String::as_str).collect::<Vec<_>>());
        // 10 + 10 + 5: the short page ends the scan
        assert_eq!(directory.page_calls(), 3);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_trailing_empty_page() {
        let directory = Arc::new(InMemoryDirectory::with_ids(&["a", "b", "c", "d"]));

        let recipients = reader(&directory, 2).list_all_recipients().await.unwrap();

        assert_eq!(recipients.len(), 4);
        assert_eq!(directory.page_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let directory = Arc::new(InMemoryDirectory::default());
        let recipients = reader(&directory, 10).list_all_recipients().await.unwrap();
        assert!(recipients.is_empty());
    }

    #[tokio::test]
    async fn test_transient_page_failure_is_retried() {
        let directory = Arc::new(InMemoryDirectory::with_ids(&["u1", "u2", "u3"]));
        directory.fail_next_pages(2);

        let recipients = reader(&directory, 10).list_all_recipients().await.unwrap();

        assert_eq!(recipients.len(), 3);
        assert_eq!(directory.page_calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_page_budget_is_directory_unavailable() {
        let directory = Arc::new(InMemoryDirectory::with_ids(&["u1"]));
        directory.set_offline(true);

        let err = reader(&directory, 10).list_all_recipients().await.unwrap_err();

        assert!(matches!(err, AppError::DirectoryUnavailable(_)));
        assert_eq!(directory.page_calls(), 3);
    }
}
