use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use talento_core::types::{Notification, NotificationType};
use talento_storage::{Database, NewNotification, NotificationError};

/// Listing page size when the caller does not ask for one.
const DEFAULT_LIST_LIMIT: i64 = 50;

/// Read-model operations over a user's notification mailbox, plus the
/// manual append used by operators and auxiliary services.
#[derive(Clone)]
pub struct MailboxService {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

/// A notification appended outside the dispatch pipeline.
#[derive(Debug, Deserialize)]
pub struct NewNotificationRequest {
    pub recipient_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub application_id: Option<i64>,
    #[serde(default)]
    pub campaign_id: Option<i64>,
}

/// Optional narrowing of a mailbox listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub only_unread: Option<bool>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// One mailbox page: the newest matching notifications and the unread
/// total over the whole mailbox, not just the page.
#[derive(Debug, Serialize)]
pub struct MailboxPage {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

impl MailboxService {
    pub fn new(database: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Appends one notification directly to a user's mailbox.
    pub async fn append(
        &self,
        request: &NewNotificationRequest,
    ) -> Result<Notification, MailboxError> {
        let kind: NotificationType = request
            .kind
            .parse()
            .map_err(|_| MailboxError::InvalidType(request.kind.clone()))?;

        let record = NewNotification {
            recipient_id: request.recipient_id,
            kind,
            title: &request.title,
            message: &request.message,
            metadata: request.metadata.as_ref(),
            application_id: request.application_id,
            campaign_id: request.campaign_id,
            created_at: self.now(),
        };

        let mut tx = self.database.begin().await?;
        let notification = self.database.notifications().append(&mut tx, &record).await?;
        tx.commit().await?;

        counter!("mailbox_updates_total", "op" => "append").increment(1);
        info!(
            stage = "mailbox",
            notification_id = notification.id,
            recipient_id = notification.recipient_id,
            kind = kind.as_str(),
            "notification appended"
        );
        Ok(notification)
    }

    /// Lists a user's newest notifications together with the mailbox-wide
    /// unread total.
    pub async fn list(
        &self,
        user_id: i64,
        options: &ListOptions,
    ) -> Result<MailboxPage, MailboxError> {
        let kind = options
            .kind
            .as_deref()
            .map(|raw| {
                raw.parse::<NotificationType>()
                    .map_err(|_| MailboxError::InvalidType(raw.to_string()))
            })
            .transpose()?;
        let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(0);
        let only_unread = options.only_unread.unwrap_or(false);

        let notifications = self
            .database
            .notifications()
            .list_for_user(user_id, only_unread, kind, limit)
            .await?;
        let unread_count = self.database.notifications().count_unread(user_id).await?;

        Ok(MailboxPage {
            notifications,
            unread_count,
        })
    }

    /// Marks one of the user's notifications as read. Repeating the call
    /// is a no-op that returns the row as it stands.
    pub async fn mark_read(&self, id: i64, user_id: i64) -> Result<Notification, MailboxError> {
        let outcome = self
            .database
            .notifications()
            .mark_read(id, user_id, self.now())
            .await?;
        if !outcome.is_unchanged() {
            counter!("mailbox_updates_total", "op" => "read").increment(1);
            debug!(stage = "mailbox", notification_id = id, user_id, "notification read");
        }
        Ok(outcome.into_notification())
    }

    /// Marks every unread notification of the user as read and reports
    /// how many rows changed.
    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, MailboxError> {
        let updated = self
            .database
            .notifications()
            .mark_all_read(user_id, self.now())
            .await?;
        counter!("mailbox_updates_total", "op" => "read_all").increment(updated);
        debug!(stage = "mailbox", user_id, updated, "mailbox marked read");
        Ok(updated)
    }

    /// Archives one of the user's notifications. Idempotent like
    /// [`mark_read`](Self::mark_read).
    pub async fn archive(&self, id: i64, user_id: i64) -> Result<Notification, MailboxError> {
        let outcome = self
            .database
            .notifications()
            .archive(id, user_id, self.now())
            .await?;
        if !outcome.is_unchanged() {
            counter!("mailbox_updates_total", "op" => "archive").increment(1);
            debug!(stage = "mailbox", notification_id = id, user_id, "notification archived");
        }
        Ok(outcome.into_notification())
    }

    /// Removes one of the user's notifications for good.
    pub async fn delete(&self, id: i64, user_id: i64) -> Result<(), MailboxError> {
        self.database.notifications().delete(id, user_id).await?;
        counter!("mailbox_updates_total", "op" => "delete").increment(1);
        debug!(stage = "mailbox", notification_id = id, user_id, "notification deleted");
        Ok(())
    }
}

/// Errors surfaced by mailbox operations.
#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("unknown notification type: {0}")]
    InvalidType(String),
    #[error("notification not found")]
    NotFound,
    #[error("recipient user not found")]
    RecipientNotFound,
    #[error("invalid notification metadata json: {0}")]
    Metadata(serde_json::Error),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<NotificationError> for MailboxError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::NotFound => Self::NotFound,
            NotificationError::MissingRecipient => Self::RecipientNotFound,
            NotificationError::Metadata(err) => Self::Metadata(err),
            NotificationError::Database(err) => Self::Database(err),
        }
    }
}

impl From<sqlx::Error> for MailboxError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}
