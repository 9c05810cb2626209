use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use talento_core::dispatch::DomainEvent;
use talento_core::types::{
    Application, ApplicationDetail, ApplicationListItem, ApplicationStats, ApplicationStatus,
    Availability, Notification, RegistrySettings, ValidationError,
};
use talento_storage::{ApplicationError, CampaignError, Database, NewApplication, ProfileError};

use crate::dispatch::{DispatchCoordinator, DispatchError};

/// Runs application lifecycle operations, each as one transaction that
/// covers both the state change and the notifications it produces.
#[derive(Clone)]
pub struct ApplicationRegistry {
    database: Database,
    dispatch: DispatchCoordinator,
    settings: RegistrySettings,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

/// Applicant-supplied fields of a new application.
#[derive(Debug, Deserialize)]
pub struct NewApplicationRequest {
    pub campaign_id: i64,
    pub motivation_letter: String,
    pub experience: String,
    pub availability: String,
    #[serde(default)]
    pub cv_file: Option<String>,
}

/// Reviewer-supplied fields of a status change.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub internal_notes: Option<String>,
}

/// Optional narrowing of the organization listing.
#[derive(Debug, Default, Deserialize)]
pub struct ApplicationFilter {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<i64>,
}

/// What a lifecycle operation produced: the application row after the
/// change and the notifications created alongside it.
#[derive(Debug, Serialize)]
pub struct RegistryOutcome {
    pub application: Application,
    pub notifications: Vec<Notification>,
}

/// An organization's application board: the (possibly filtered) listing
/// plus per-status totals over the same campaign scope.
#[derive(Debug, Serialize)]
pub struct OrganizationApplications {
    pub applications: Vec<ApplicationListItem>,
    pub stats: ApplicationStats,
}

impl ApplicationRegistry {
    pub fn new(
        database: Database,
        settings: RegistrySettings,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        let dispatch = DispatchCoordinator::new(database.clone(), clock.clone());
        Self {
            database,
            dispatch,
            settings,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Submits an application on behalf of the given user account.
    ///
    /// The uniqueness pre-check and the insert run in one transaction;
    /// a concurrent submitter losing the race on the unique index is
    /// reported as `Duplicate`, the same as a sequential repeat. When the
    /// reapply policy allows it, a previously rejected application is
    /// revived in place instead of inserting a second row.
    pub async fn create(
        &self,
        applicant_user_id: i64,
        request: &NewApplicationRequest,
    ) -> Result<RegistryOutcome, RegistryError> {
        self.settings
            .validate_submission(&request.motivation_letter, &request.experience)?;
        let availability: Availability = request
            .availability
            .parse()
            .map_err(|_| RegistryError::InvalidAvailability(request.availability.clone()))?;

        let mut tx = self.database.begin().await?;

        let applicant = self
            .database
            .profiles()
            .fetch_applicant_by_user(&mut tx, applicant_user_id)
            .await
            .map_err(|err| match err {
                ProfileError::NotFound => RegistryError::ApplicantNotFound,
                ProfileError::Database(err) => RegistryError::Database(err),
            })?;
        let campaign = self
            .database
            .campaigns()
            .fetch_dispatch_info(&mut tx, request.campaign_id)
            .await
            .map_err(|err| match err {
                CampaignError::NotFound => RegistryError::CampaignNotFound,
                CampaignError::Database(err) => RegistryError::Database(err),
            })?;

        let submitted_at = self.now();
        let record = NewApplication {
            applicant_id: applicant.id,
            campaign_id: campaign.id,
            motivation_letter: &request.motivation_letter,
            experience: &request.experience,
            availability,
            cv_file: request.cv_file.as_deref(),
            submitted_at,
        };

        let applications = self.database.applications();
        let existing = applications
            .find_for_applicant(&mut tx, applicant.id, campaign.id)
            .await?;
        let application = match existing {
            Some(previous)
                if previous.status == ApplicationStatus::Rejected
                    && self.settings.reapply_after_rejection =>
            {
                applications.resubmit(&mut tx, previous.id, &record).await?
            }
            Some(_) => return Err(RegistryError::Duplicate),
            None => applications.insert(&mut tx, &record).await?,
        };

        let event = DomainEvent::ApplicationCreated {
            application_id: application.id,
            campaign_id: campaign.id,
            campaign_name: &campaign.name,
            applicant_name: &applicant.name,
            submitted_at,
        };
        let notifications = self.dispatch.dispatch(&mut tx, &event).await?;

        tx.commit().await?;

        counter!("applications_created_total").increment(1);
        info!(
            stage = "registry",
            application_id = application.id,
            campaign_id = campaign.id,
            applicant_id = applicant.id,
            "application created"
        );

        Ok(RegistryOutcome {
            application,
            notifications,
        })
    }

    /// Moves an application along the status machine and notifies the
    /// applicant, atomically.
    pub async fn transition(
        &self,
        application_id: i64,
        request: &TransitionRequest,
    ) -> Result<RegistryOutcome, RegistryError> {
        let next: ApplicationStatus = request
            .status
            .parse()
            .map_err(|_| RegistryError::InvalidStatus(request.status.clone()))?;

        let mut tx = self.database.begin().await?;

        let applications = self.database.applications();
        let application = applications
            .fetch(&mut tx, application_id)
            .await?
            .ok_or(RegistryError::NotFound)?;

        if !application.status.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                from: application.status,
                to: next,
            });
        }

        let previous = application.status;
        let rejection_reason = if next == ApplicationStatus::Rejected {
            request.rejection_reason.clone()
        } else {
            None
        };
        let internal_notes = request
            .internal_notes
            .clone()
            .or_else(|| application.internal_notes.clone());
        let decided_at = next.is_terminal().then(|| self.now());

        applications
            .apply_transition(
                &mut tx,
                application_id,
                next,
                rejection_reason.as_deref(),
                internal_notes.as_deref(),
                decided_at,
            )
            .await?;

        let campaign = self
            .database
            .campaigns()
            .fetch_dispatch_info(&mut tx, application.campaign_id)
            .await
            .map_err(|err| match err {
                CampaignError::NotFound => RegistryError::CampaignNotFound,
                CampaignError::Database(err) => RegistryError::Database(err),
            })?;

        let event = DomainEvent::ApplicationTransitioned {
            application_id,
            applicant_id: application.applicant_id,
            campaign_id: campaign.id,
            campaign_name: &campaign.name,
            previous,
            next,
            rejection_reason: rejection_reason.as_deref(),
        };
        let notifications = self.dispatch.dispatch(&mut tx, &event).await?;

        tx.commit().await?;

        counter!("application_transitions_total", "status" => next.as_str()).increment(1);
        info!(
            stage = "registry",
            application_id,
            from = previous.as_str(),
            to = next.as_str(),
            "application status changed"
        );

        let mut application = application;
        application.status = next;
        application.rejection_reason = rejection_reason;
        application.internal_notes = internal_notes;
        application.decided_at = decided_at;

        Ok(RegistryOutcome {
            application,
            notifications,
        })
    }

    /// Lists the applications of every campaign owned by the given user's
    /// organization, with per-status totals over the same campaign scope.
    /// The status filter narrows the listing only, never the totals.
    pub async fn list_for_organization(
        &self,
        organization_user_id: i64,
        filter: &ApplicationFilter,
    ) -> Result<OrganizationApplications, RegistryError> {
        let organization = self
            .database
            .profiles()
            .fetch_organization_by_user(organization_user_id)
            .await
            .map_err(|err| match err {
                ProfileError::NotFound => RegistryError::OrganizationNotFound,
                ProfileError::Database(err) => RegistryError::Database(err),
            })?;

        let status = filter
            .status
            .as_deref()
            .map(|raw| {
                raw.parse::<ApplicationStatus>()
                    .map_err(|_| RegistryError::InvalidStatus(raw.to_string()))
            })
            .transpose()?;

        let applications = self
            .database
            .applications()
            .list_for_organization(organization.id, status, filter.campaign_id)
            .await?;
        let stats = self
            .database
            .applications()
            .count_stats(organization.id, filter.campaign_id)
            .await?;

        Ok(OrganizationApplications {
            applications,
            stats,
        })
    }

    /// Loads the full review view of one application.
    pub async fn detail(&self, application_id: i64) -> Result<ApplicationDetail, RegistryError> {
        self.database
            .applications()
            .fetch_detail(application_id)
            .await?
            .ok_or(RegistryError::NotFound)
    }
}

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid submission: {0}")]
    Validation(#[from] ValidationError),
    #[error("unknown availability: {0}")]
    InvalidAvailability(String),
    #[error("unknown application status: {0}")]
    InvalidStatus(String),
    #[error("cannot transition application from {from} to {to}")]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    #[error("an application for this campaign already exists")]
    Duplicate,
    #[error("applicant profile not found")]
    ApplicantNotFound,
    #[error("organization profile not found")]
    OrganizationNotFound,
    #[error("campaign not found")]
    CampaignNotFound,
    #[error("application not found")]
    NotFound,
    #[error("notification dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<ApplicationError> for RegistryError {
    fn from(err: ApplicationError) -> Self {
        match err {
            ApplicationError::Duplicate => Self::Duplicate,
            ApplicationError::MissingParent => Self::CampaignNotFound,
            ApplicationError::NotFound => Self::NotFound,
            ApplicationError::Database(err) => Self::Database(err),
        }
    }
}
