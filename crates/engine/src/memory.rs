//! In-memory directory, tracking store and step journal.
//!
//! Used by the unit tests and for running the pipeline without Postgres or
//! Redis. Each store supports fault injection so outage and partial-write
//! paths can be exercised deterministically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use herald_common::error::AppError;
use herald_common::types::{DeliveryStatus, Recipient, TrackingRow};

use crate::directory::RecipientDirectory;
use crate::journal::{StepJournal, StepRecord};
use crate::tracking::TrackingStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recipient directory held in a sorted map.
#[derive(Default)]
pub struct InMemoryDirectory {
    recipients: Mutex<BTreeMap<String, Recipient>>,
    offline: AtomicBool,
    failures_remaining: AtomicU32,
    page_calls: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn with_ids<S: AsRef<str>>(ids: &[S]) -> Self {
        let directory = Self::default();
        for id in ids {
            directory.upsert(Recipient::new(id.as_ref()));
        }
        directory
    }

    pub fn upsert(&self, recipient: Recipient) {
        lock(&self.recipients).insert(recipient.recipient_id.clone(), recipient);
    }

    pub fn remove(&self, recipient_id: &str) {
        lock(&self.recipients).remove(recipient_id);
    }

    /// Fail every page fetch while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` page fetches, then recover.
    pub fn fail_next_pages(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn fetch_page(
        &self,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Recipient>, AppError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) || self.take_failure() {
            return Err(AppError::DirectoryUnavailable(
                "in-memory directory offline".to_string(),
            ));
        }

        let recipients = lock(&self.recipients);
        let page = match after {
            Some(cursor) => recipients
                .range::<str, _>((
                    std::ops::Bound::Excluded(cursor),
                    std::ops::Bound::Unbounded,
                ))
                .take(limit as usize)
                .map(|(_, r)| r.clone())
                .collect(),
            None => recipients
                .values()
                .take(limit as usize)
                .cloned()
                .collect(),
        };

        Ok(page)
    }
}

/// Tracking rows keyed by `(notification_id, recipient_id)`.
#[derive(Default)]
pub struct InMemoryTrackingStore {
    rows: Mutex<BTreeMap<(String, String), TrackingRow>>,
    offline: AtomicBool,
    fail_once: Mutex<HashSet<String>>,
    insert_calls: AtomicUsize,
}

impl InMemoryTrackingStore {
    /// Fail every batch write while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next batch that contains `recipient_id`, once.
    pub fn fail_once_on(&self, recipient_id: &str) {
        lock(&self.fail_once).insert(recipient_id.to_string());
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Rows for one notification, ordered by recipient id.
    pub fn rows_for(&self, notification_id: &str) -> Vec<TrackingRow> {
        lock(&self.rows)
            .values()
            .filter(|row| row.notification_id == notification_id)
            .cloned()
            .collect()
    }

    pub fn row(&self, notification_id: &str, recipient_id: &str) -> Option<TrackingRow> {
        lock(&self.rows)
            .get(&(notification_id.to_string(), recipient_id.to_string()))
            .cloned()
    }

    /// Simulate the delivery stage advancing a row.
    pub fn set_status(&self, notification_id: &str, recipient_id: &str, status: DeliveryStatus) {
        if let Some(row) = lock(&self.rows)
            .get_mut(&(notification_id.to_string(), recipient_id.to_string()))
        {
            row.status = status;
            row.send_attempts += 1;
        }
    }
}

#[async_trait]
impl TrackingStore for InMemoryTrackingStore {
    async fn insert_batch(&self, rows: &[TrackingRow]) -> Result<u64, AppError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable(
                "in-memory tracking store offline".to_string(),
            ));
        }

        {
            let mut fail_once = lock(&self.fail_once);
            if let Some(hit) = rows.iter().find(|r| fail_once.contains(&r.recipient_id)) {
                let recipient_id = hit.recipient_id.clone();
                fail_once.remove(&recipient_id);
                return Err(AppError::StoreUnavailable(format!(
                    "injected failure on batch containing {}",
                    recipient_id
                )));
            }
        }

        let mut stored = lock(&self.rows);
        let mut created = 0u64;
        for row in rows {
            let key = (row.notification_id.clone(), row.recipient_id.clone());
            if !stored.contains_key(&key) {
                stored.insert(key, row.clone());
                created += 1;
            }
        }

        Ok(created)
    }
}

/// Step journal held in a map.
#[derive(Default)]
pub struct InMemoryStepJournal {
    records: Mutex<HashMap<(String, String), StepRecord>>,
}

#[async_trait]
impl StepJournal for InMemoryStepJournal {
    async fn get(&self, instance: &str, step: &str) -> Result<Option<StepRecord>, AppError> {
        Ok(lock(&self.records)
            .get(&(instance.to_string(), step.to_string()))
            .cloned())
    }

    async fn record(
        &self,
        instance: &str,
        step: &str,
        record: &StepRecord,
    ) -> Result<(), AppError> {
        lock(&self.records).insert((instance.to_string(), step.to_string()), record.clone());
        Ok(())
    }
}
