use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Identifier of one broadcast campaign.
///
/// Assigned upstream and never changed; every tracking row produced for the
/// campaign is partitioned by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NotificationId(String);

impl NotificationId {
    /// Wrap a raw identifier, rejecting blank values.
    pub fn new(id: impl Into<String>) -> Result<Self, AppError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation(
                "notification id must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NotificationId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NotificationId> for String {
    fn from(id: NotificationId) -> Self {
        id.0
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of recipient a tracking row addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum RecipientType {
    User,
}

impl std::fmt::Display for RecipientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientType::User => write!(f, "user"),
        }
    }
}

/// Notification delivery status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Throttled,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Throttled => write!(f, "throttled"),
        }
    }
}

/// An addressable user from the recipient directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipient {
    /// Directory key (AAD object id). Unique across the directory.
    pub recipient_id: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub service_url: Option<String>,
    pub tenant_id: Option<String>,
    pub user_type: Option<String>,
}

impl Recipient {
    /// A recipient with only its directory key set.
    pub fn new(recipient_id: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            user_id: None,
            conversation_id: None,
            service_url: None,
            tenant_id: None,
            user_type: None,
        }
    }
}

/// Per-(notification, recipient) delivery record.
///
/// Only the identity and channel metadata are written here. Status,
/// counters and timestamps past `created_at` belong to the delivery stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TrackingRow {
    pub notification_id: String,
    pub recipient_id: String,
    pub recipient_type: RecipientType,
    pub status: DeliveryStatus,
    pub status_code: Option<i32>,
    pub total_sends: i32,
    pub send_attempts: i32,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub service_url: Option<String>,
    pub tenant_id: Option<String>,
    pub error_detail: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TrackingRow {
    /// Initial `pending` row for a recipient.
    pub fn initialize(
        notification_id: &NotificationId,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            notification_id: notification_id.as_str().to_string(),
            recipient_id: recipient.recipient_id.clone(),
            recipient_type: RecipientType::User,
            status: DeliveryStatus::Pending,
            status_code: None,
            total_sends: 0,
            send_attempts: 0,
            user_id: recipient.user_id.clone(),
            conversation_id: recipient.conversation_id.clone(),
            service_url: recipient.service_url.clone(),
            tenant_id: recipient.tenant_id.clone(),
            error_detail: None,
            sent_at: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_id_trims() {
        let id = NotificationId::new("  n-100 ").unwrap();
        assert_eq!(id.as_str(), "n-100");
        assert_eq!(id.to_string(), "n-100");
    }

    #[test]
    fn test_blank_notification_id_rejected() {
        assert!(matches!(
            NotificationId::new("   "),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_notification_id_deserialize_validates() {
        let ok: NotificationId = serde_json::from_str("\"n-1\"").unwrap();
        assert_eq!(ok.as_str(), "n-1");
        assert!(serde_json::from_str::<NotificationId>("\"\"").is_err());
    }

    #[test]
    fn test_initialized_row_is_pending() {
        let id = NotificationId::new("n-100").unwrap();
        let mut recipient = Recipient::new("u1");
        recipient.conversation_id = Some("conv-1".to_string());

        let row = TrackingRow::initialize(&id, &recipient, Utc::now());
        assert_eq!(row.notification_id, "n-100");
        assert_eq!(row.recipient_id, "u1");
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert_eq!(row.recipient_type, RecipientType::User);
        assert_eq!(row.total_sends, 0);
        assert_eq!(row.conversation_id.as_deref(), Some("conv-1"));
        assert!(row.sent_at.is_none());
    }
}
