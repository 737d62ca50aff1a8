//! PostgreSQL implementations of the directory and tracking capabilities.
//!
//! - `users` is read with keyset pagination on `recipient_id` in byte order.
//! - `sent_notifications` rows are written with one multi-row
//!   `INSERT ... ON CONFLICT DO NOTHING` per batch, which Postgres applies
//!   atomically.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use herald_common::error::AppError;
use herald_common::types::{Recipient, TrackingRow};

use crate::directory::RecipientDirectory;
use crate::tracking::TrackingStore;

/// Recipient directory backed by the `users` table.
#[derive(Clone)]
pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn fetch_page(
        &self,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Recipient>, AppError> {
        let recipients: Vec<Recipient> = sqlx::query_as(
            r#"
            SELECT recipient_id, user_id, conversation_id, service_url, tenant_id, user_type
            FROM users
            WHERE ($1::text IS NULL OR recipient_id > $1 COLLATE "C")
            ORDER BY recipient_id COLLATE "C"
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(recipients)
    }
}

/// Tracking store backed by the `sent_notifications` table.
#[derive(Clone)]
pub struct PgTrackingStore {
    pool: PgPool,
}

impl PgTrackingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of tracking rows for a notification.
    pub async fn count_for(&self, notification_id: &str) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sent_notifications WHERE notification_id = $1")
                .bind(notification_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// All tracking rows for a notification, ordered by recipient id.
    pub async fn rows_for(&self, notification_id: &str) -> Result<Vec<TrackingRow>, AppError> {
        let rows: Vec<TrackingRow> = sqlx::query_as(
            r#"
            SELECT notification_id, recipient_id, recipient_type, status, status_code,
                   total_sends, send_attempts, user_id, conversation_id, service_url,
                   tenant_id, error_detail, sent_at, created_at
            FROM sent_notifications
            WHERE notification_id = $1
            ORDER BY recipient_id
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl TrackingStore for PgTrackingStore {
    async fn insert_batch(&self, rows: &[TrackingRow]) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO sent_notifications (notification_id, recipient_id, recipient_type, \
             status, total_sends, send_attempts, user_id, conversation_id, service_url, \
             tenant_id, created_at) ",
        );

        builder.push_values(rows, |mut b, row| {
            b.push_bind(&row.notification_id)
                .push_bind(&row.recipient_id)
                .push_bind(row.recipient_type.to_string())
                .push_bind(row.status.to_string())
                .push_bind(row.total_sends)
                .push_bind(row.send_attempts)
                .push_bind(&row.user_id)
                .push_bind(&row.conversation_id)
                .push_bind(&row.service_url)
                .push_bind(&row.tenant_id)
                .push_bind(row.created_at);
        });
        builder.push(" ON CONFLICT (notification_id, recipient_id) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
