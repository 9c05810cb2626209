use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::debug;

use talento_core::dispatch::{Composer, DomainEvent};
use talento_core::types::Notification;
use talento_storage::{CampaignError, Database, NewNotification, NotificationError, ProfileError};

/// Turns domain events into mailbox rows inside the caller's transaction.
///
/// The coordinator resolves the recipient set for the event, invokes the
/// composer per recipient and appends the drafts. It never commits: the
/// caller's commit or rollback decides whether the notifications exist,
/// so a reader can never observe the state change without them.
#[derive(Clone)]
pub struct DispatchCoordinator {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl DispatchCoordinator {
    pub fn new(database: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Appends one notification per resolved recipient of `event`,
    /// returning the created rows in recipient order.
    pub async fn dispatch(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        event: &DomainEvent<'_>,
    ) -> Result<Vec<Notification>, DispatchError> {
        let recipients = self.resolve_recipients(tx, event).await?;
        let created_at = self.now();
        let mut created = Vec::with_capacity(recipients.len());

        for recipient_id in recipients {
            let Some(draft) = Composer::compose(recipient_id, event) else {
                continue;
            };
            let record = NewNotification {
                recipient_id: draft.recipient_id,
                kind: draft.kind,
                title: &draft.title,
                message: &draft.message,
                metadata: draft.metadata.as_ref(),
                application_id: draft.application_id,
                campaign_id: draft.campaign_id,
                created_at,
            };
            let notification = self.database.notifications().append(tx, &record).await?;
            counter!("notifications_dispatched_total", "type" => notification.kind.as_str())
                .increment(1);
            created.push(notification);
        }

        debug!(
            stage = "dispatch",
            count = created.len(),
            "notifications appended"
        );
        Ok(created)
    }

    async fn resolve_recipients(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        event: &DomainEvent<'_>,
    ) -> Result<Vec<i64>, DispatchError> {
        match *event {
            DomainEvent::ApplicationCreated { campaign_id, .. } => {
                let campaign = self
                    .database
                    .campaigns()
                    .fetch_dispatch_info(tx, campaign_id)
                    .await?;
                Ok(vec![campaign.organization_user_id])
            }
            DomainEvent::ApplicationTransitioned { applicant_id, .. } => {
                let applicant = self
                    .database
                    .profiles()
                    .fetch_applicant_identity(tx, applicant_id)
                    .await?;
                Ok(vec![applicant.user_id])
            }
            DomainEvent::CampaignUpdated { campaign_id, .. } => Ok(self
                .database
                .campaigns()
                .list_live_applicant_users(tx, campaign_id)
                .await?),
        }
    }

    /// Notifies every user with a live application on the campaign that
    /// its published details changed. Opens its own transaction since no
    /// other state change rides along with this event.
    pub async fn notify_campaign_updated(
        &self,
        campaign_id: i64,
        changes: &[String],
    ) -> Result<Vec<Notification>, DispatchError> {
        let mut tx = self.database.begin().await?;
        let campaign = self
            .database
            .campaigns()
            .fetch_dispatch_info(&mut tx, campaign_id)
            .await?;
        let event = DomainEvent::CampaignUpdated {
            campaign_id: campaign.id,
            campaign_name: &campaign.name,
            changes,
        };
        let notifications = self.dispatch(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(notifications)
    }
}

/// Errors raised while resolving recipients or appending notifications.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("campaign lookup failed: {0}")]
    Campaign(#[from] CampaignError),
    #[error("profile lookup failed: {0}")]
    Profile(#[from] ProfileError),
    #[error("notification append failed: {0}")]
    Notification(#[from] NotificationError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
