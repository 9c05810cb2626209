use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{
    migrate::MigrateError, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use talento_core::types::{
    ApplicantSummary, Application, ApplicationDetail, ApplicationListItem, ApplicationStats,
    ApplicationStatus, Availability, CampaignBrief, CampaignSummary, GuardianSummary,
    Notification, NotificationStatus, NotificationType,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a SQLite transaction.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for reading applicant and organization profiles.
    pub fn profiles(&self) -> ProfileRepository {
        ProfileRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for reading campaign metadata.
    pub fn campaigns(&self) -> CampaignRepository {
        CampaignRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on applications.
    pub fn applications(&self) -> ApplicationRepository {
        ApplicationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle to operate on the notification mailbox.
    pub fn notifications(&self) -> NotificationRepository {
        NotificationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository used to resolve applicant and organization profiles together
/// with their linked user accounts.
#[derive(Clone)]
pub struct ProfileRepository {
    pool: SqlitePool,
}

impl ProfileRepository {
    /// Loads the applicant's display name and user account id.
    pub async fn fetch_applicant_identity(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        applicant_id: i64,
    ) -> Result<ApplicantIdentity, ProfileError> {
        let row = sqlx::query("SELECT id, name, user_id FROM applicants WHERE id = ?")
            .bind(applicant_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(ProfileError::NotFound)?;

        Ok(ApplicantIdentity {
            id: row.get("id"),
            name: row.get("name"),
            user_id: row.get("user_id"),
        })
    }

    /// Loads the applicant profile owned by a user account.
    pub async fn fetch_applicant_by_user(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_id: i64,
    ) -> Result<ApplicantIdentity, ProfileError> {
        let row = sqlx::query("SELECT id, name, user_id FROM applicants WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(ProfileError::NotFound)?;

        Ok(ApplicantIdentity {
            id: row.get("id"),
            name: row.get("name"),
            user_id: row.get("user_id"),
        })
    }

    /// Loads the organization profile owned by a user account.
    pub async fn fetch_organization_by_user(
        &self,
        user_id: i64,
    ) -> Result<OrganizationIdentity, ProfileError> {
        let row = sqlx::query("SELECT id, name, user_id FROM organizations WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ProfileError::NotFound)?;

        Ok(OrganizationIdentity {
            id: row.get("id"),
            name: row.get("name"),
            user_id: row.get("user_id"),
        })
    }
}

/// Applicant row reduced to what dispatch needs.
#[derive(Debug, Clone)]
pub struct ApplicantIdentity {
    pub id: i64,
    pub name: String,
    pub user_id: i64,
}

/// Organization row reduced to id and ownership.
#[derive(Debug, Clone)]
pub struct OrganizationIdentity {
    pub id: i64,
    pub name: String,
    pub user_id: i64,
}

/// Errors that can occur while resolving profiles.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("applicant not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository used to resolve campaigns and their owners.
#[derive(Clone)]
pub struct CampaignRepository {
    pool: SqlitePool,
}

impl CampaignRepository {
    /// Loads the campaign name together with the owning organization's user id.
    pub async fn fetch_dispatch_info(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        campaign_id: i64,
    ) -> Result<CampaignDispatchInfo, CampaignError> {
        let row = sqlx::query(
            "SELECT c.id, c.name, c.organization_id, o.user_id AS organization_user_id \
               FROM campaigns AS c \
               JOIN organizations AS o ON o.id = c.organization_id \
              WHERE c.id = ?",
        )
        .bind(campaign_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(CampaignError::NotFound)?;

        Ok(CampaignDispatchInfo {
            id: row.get("id"),
            name: row.get("name"),
            organization_id: row.get("organization_id"),
            organization_user_id: row.get("organization_user_id"),
        })
    }

    /// Lists user ids of applicants whose application on the campaign is not rejected.
    pub async fn list_live_applicant_users(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        campaign_id: i64,
    ) -> Result<Vec<i64>, CampaignError> {
        let user_ids = sqlx::query_scalar(
            "SELECT DISTINCT ap.user_id \
               FROM applications AS a \
               JOIN applicants AS ap ON ap.id = a.applicant_id \
              WHERE a.campaign_id = ? \
                AND a.status != 'rejected' \
              ORDER BY ap.user_id",
        )
        .bind(campaign_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(user_ids)
    }
}

/// Campaign row reduced to what dispatch needs.
#[derive(Debug, Clone)]
pub struct CampaignDispatchInfo {
    pub id: i64,
    pub name: String,
    pub organization_id: i64,
    pub organization_user_id: i64,
}

/// Errors that can occur while resolving campaigns.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("campaign not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for application rows.
#[derive(Clone)]
pub struct ApplicationRepository {
    pool: SqlitePool,
}

impl ApplicationRepository {
    /// Inserts a new pending application.
    ///
    /// The unique index on `(applicant_id, campaign_id)` arbitrates
    /// concurrent submissions; the loser surfaces as `Duplicate`.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewApplication<'_>,
    ) -> Result<Application, ApplicationError> {
        let result = sqlx::query(
            "INSERT INTO applications \
             (applicant_id, campaign_id, motivation_letter, experience, availability, cv_file, status, submitted_at) \
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?) \
             RETURNING id",
        )
        .bind(record.applicant_id)
        .bind(record.campaign_id)
        .bind(record.motivation_letter)
        .bind(record.experience)
        .bind(record.availability.as_str())
        .bind(record.cv_file)
        .bind(to_rfc3339(record.submitted_at))
        .fetch_one(&mut **tx)
        .await;

        let row = result.map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("2067") {
                    ApplicationError::Duplicate
                } else if db_err.code().as_deref() == Some("787") {
                    ApplicationError::MissingParent
                } else {
                    ApplicationError::Database(sqlx::Error::Database(db_err))
                }
            }
            other => ApplicationError::Database(other),
        })?;

        Ok(Application {
            id: row.get("id"),
            applicant_id: record.applicant_id,
            campaign_id: record.campaign_id,
            motivation_letter: record.motivation_letter.to_string(),
            experience: record.experience.to_string(),
            availability: record.availability,
            cv_file: record.cv_file.map(str::to_string),
            status: ApplicationStatus::Pending,
            rejection_reason: None,
            internal_notes: None,
            submitted_at: record.submitted_at,
            decided_at: None,
        })
    }

    /// Fetches an application by id inside a transaction.
    pub async fn fetch(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<Option<Application>, ApplicationError> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            "SELECT id, applicant_id, campaign_id, motivation_letter, experience, availability, \
                    cv_file, status, rejection_reason, internal_notes, submitted_at, decided_at \
               FROM applications \
              WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(ApplicationRow::into_domain))
    }

    /// Fetches the application an applicant holds on a campaign, if any.
    pub async fn find_for_applicant(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        applicant_id: i64,
        campaign_id: i64,
    ) -> Result<Option<Application>, ApplicationError> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            "SELECT id, applicant_id, campaign_id, motivation_letter, experience, availability, \
                    cv_file, status, rejection_reason, internal_notes, submitted_at, decided_at \
               FROM applications \
              WHERE applicant_id = ? AND campaign_id = ?",
        )
        .bind(applicant_id)
        .bind(campaign_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(ApplicationRow::into_domain))
    }

    /// Rewrites a rejected application back to a fresh pending submission.
    pub async fn resubmit(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        record: &NewApplication<'_>,
    ) -> Result<Application, ApplicationError> {
        let result = sqlx::query(
            "UPDATE applications \
                SET motivation_letter = ?, experience = ?, availability = ?, cv_file = ?, \
                    status = 'pending', rejection_reason = NULL, internal_notes = NULL, \
                    submitted_at = ?, decided_at = NULL \
              WHERE id = ?",
        )
        .bind(record.motivation_letter)
        .bind(record.experience)
        .bind(record.availability.as_str())
        .bind(record.cv_file)
        .bind(to_rfc3339(record.submitted_at))
        .bind(id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApplicationError::NotFound);
        }

        Ok(Application {
            id,
            applicant_id: record.applicant_id,
            campaign_id: record.campaign_id,
            motivation_letter: record.motivation_letter.to_string(),
            experience: record.experience.to_string(),
            availability: record.availability,
            cv_file: record.cv_file.map(str::to_string),
            status: ApplicationStatus::Pending,
            rejection_reason: None,
            internal_notes: None,
            submitted_at: record.submitted_at,
            decided_at: None,
        })
    }

    /// Writes the outcome of a status transition.
    ///
    /// All four mutable columns are set verbatim; the caller computes the
    /// final values from the row it fetched in the same transaction.
    pub async fn apply_transition(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        status: ApplicationStatus,
        rejection_reason: Option<&str>,
        internal_notes: Option<&str>,
        decided_at: Option<DateTime<Utc>>,
    ) -> Result<(), ApplicationError> {
        let result = sqlx::query(
            "UPDATE applications \
                SET status = ?, rejection_reason = ?, internal_notes = ?, decided_at = ? \
              WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(rejection_reason)
        .bind(internal_notes)
        .bind(decided_at.map(to_rfc3339))
        .bind(id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApplicationError::NotFound);
        }

        Ok(())
    }

    /// Lists applications across an organization's campaigns, newest first.
    ///
    /// The status filter narrows the listing only; stats are computed
    /// separately so the caller can show totals next to a filtered page.
    pub async fn list_for_organization(
        &self,
        organization_id: i64,
        status: Option<ApplicationStatus>,
        campaign_id: Option<i64>,
    ) -> Result<Vec<ApplicationListItem>, ApplicationError> {
        let status_str = status.map(ApplicationStatus::as_str);
        let rows = sqlx::query_as::<_, ApplicationListRow>(
            "SELECT a.id, a.applicant_id, a.campaign_id, a.motivation_letter, a.experience, \
                    a.availability, a.cv_file, a.status, a.rejection_reason, a.internal_notes, \
                    a.submitted_at, a.decided_at, \
                    ap.name AS applicant_name, u.email AS applicant_email, \
                    u.phone AS applicant_phone, ap.accumulated_hours, \
                    g.name AS guardian_name, g.phone AS guardian_phone, \
                    g.relationship AS guardian_relationship, \
                    c.name AS campaign_name \
               FROM applications AS a \
               JOIN applicants AS ap ON ap.id = a.applicant_id \
               JOIN users AS u ON u.id = ap.user_id \
               LEFT JOIN guardians AS g ON g.id = ap.guardian_id \
               JOIN campaigns AS c ON c.id = a.campaign_id \
              WHERE c.organization_id = ? \
                AND (? IS NULL OR a.status = ?) \
                AND (? IS NULL OR a.campaign_id = ?) \
              ORDER BY a.submitted_at DESC, a.id DESC",
        )
        .bind(organization_id)
        .bind(status_str)
        .bind(status_str)
        .bind(campaign_id)
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(ApplicationListRow::into_domain)
            .collect())
    }

    /// Computes per-status totals for an organization's applications.
    pub async fn count_stats(
        &self,
        organization_id: i64,
        campaign_id: Option<i64>,
    ) -> Result<ApplicationStats, ApplicationError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(CASE WHEN a.status = 'pending' THEN 1 ELSE 0 END), 0) AS pending, \
                    COALESCE(SUM(CASE WHEN a.status = 'under_review' THEN 1 ELSE 0 END), 0) AS under_review, \
                    COUNT(*) AS total \
               FROM applications AS a \
               JOIN campaigns AS c ON c.id = a.campaign_id \
              WHERE c.organization_id = ? \
                AND (? IS NULL OR a.campaign_id = ?)",
        )
        .bind(organization_id)
        .bind(campaign_id)
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ApplicationStats {
            pending: row.get("pending"),
            under_review: row.get("under_review"),
            total: row.get("total"),
        })
    }

    /// Loads the full detail view for one application.
    pub async fn fetch_detail(
        &self,
        id: i64,
    ) -> Result<Option<ApplicationDetail>, ApplicationError> {
        let row = sqlx::query_as::<_, ApplicationDetailRow>(
            "SELECT a.id, a.applicant_id, a.campaign_id, a.motivation_letter, a.experience, \
                    a.availability, a.cv_file, a.status, a.rejection_reason, a.internal_notes, \
                    a.submitted_at, a.decided_at, \
                    ap.name AS applicant_name, u.email AS applicant_email, \
                    u.phone AS applicant_phone, ap.accumulated_hours, \
                    g.name AS guardian_name, g.phone AS guardian_phone, \
                    g.relationship AS guardian_relationship, \
                    c.name AS campaign_name, c.description AS campaign_description, \
                    o.name AS organization_name \
               FROM applications AS a \
               JOIN applicants AS ap ON ap.id = a.applicant_id \
               JOIN users AS u ON u.id = ap.user_id \
               LEFT JOIN guardians AS g ON g.id = ap.guardian_id \
               JOIN campaigns AS c ON c.id = a.campaign_id \
               JOIN organizations AS o ON o.id = c.organization_id \
              WHERE a.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApplicationDetailRow::into_domain))
    }
}

/// Data required to create a new application row.
pub struct NewApplication<'a> {
    pub applicant_id: i64,
    pub campaign_id: i64,
    pub motivation_letter: &'a str,
    pub experience: &'a str,
    pub availability: Availability,
    pub cv_file: Option<&'a str>,
    pub submitted_at: DateTime<Utc>,
}

/// Flat application row as stored.
#[derive(Debug, sqlx::FromRow)]
struct ApplicationRow {
    id: i64,
    applicant_id: i64,
    campaign_id: i64,
    motivation_letter: String,
    experience: String,
    availability: String,
    cv_file: Option<String>,
    status: String,
    rejection_reason: Option<String>,
    internal_notes: Option<String>,
    submitted_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
}

impl ApplicationRow {
    fn into_domain(self) -> Application {
        Application {
            id: self.id,
            applicant_id: self.applicant_id,
            campaign_id: self.campaign_id,
            motivation_letter: self.motivation_letter,
            experience: self.experience,
            availability: self.availability.parse().unwrap_or(Availability::Flexible),
            cv_file: self.cv_file,
            status: self.status.parse().unwrap_or(ApplicationStatus::Pending),
            rejection_reason: self.rejection_reason,
            internal_notes: self.internal_notes,
            submitted_at: self.submitted_at,
            decided_at: self.decided_at,
        }
    }
}

/// Application row joined with applicant, guardian and campaign names.
#[derive(Debug, sqlx::FromRow)]
struct ApplicationListRow {
    #[sqlx(flatten)]
    application: ApplicationRow,
    applicant_name: String,
    applicant_email: String,
    applicant_phone: Option<String>,
    accumulated_hours: i64,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    guardian_relationship: Option<String>,
    campaign_name: String,
}

impl ApplicationListRow {
    fn into_domain(self) -> ApplicationListItem {
        let application = self.application.into_domain();
        let campaign = CampaignBrief {
            id: application.campaign_id,
            name: self.campaign_name,
        };
        ApplicationListItem {
            application,
            applicant: ApplicantSummary {
                name: self.applicant_name,
                email: self.applicant_email,
                phone: self.applicant_phone,
                accumulated_hours: self.accumulated_hours,
            },
            guardian: self.guardian_name.map(|name| GuardianSummary {
                name,
                phone: self.guardian_phone,
                relationship: self.guardian_relationship,
            }),
            campaign,
        }
    }
}

/// Application row joined with everything the detail view shows.
#[derive(Debug, sqlx::FromRow)]
struct ApplicationDetailRow {
    #[sqlx(flatten)]
    application: ApplicationRow,
    applicant_name: String,
    applicant_email: String,
    applicant_phone: Option<String>,
    accumulated_hours: i64,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    guardian_relationship: Option<String>,
    campaign_name: String,
    campaign_description: Option<String>,
    organization_name: String,
}

impl ApplicationDetailRow {
    fn into_domain(self) -> ApplicationDetail {
        let application = self.application.into_domain();
        let campaign = CampaignSummary {
            id: application.campaign_id,
            name: self.campaign_name,
            description: self.campaign_description,
            organization_name: self.organization_name,
        };
        ApplicationDetail {
            application,
            applicant: ApplicantSummary {
                name: self.applicant_name,
                email: self.applicant_email,
                phone: self.applicant_phone,
                accumulated_hours: self.accumulated_hours,
            },
            guardian: self.guardian_name.map(|name| GuardianSummary {
                name,
                phone: self.guardian_phone,
                relationship: self.guardian_relationship,
            }),
            campaign,
        }
    }
}

/// Errors that can occur while mutating applications.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("an application for this applicant and campaign already exists")]
    Duplicate,
    #[error("applicant or campaign is missing for the new application")]
    MissingParent,
    #[error("application not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for ApplicationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

/// Repository for the notification mailbox.
#[derive(Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, type AS kind, title, message, metadata, application_id, campaign_id, \
     status, created_at, read_at";

impl NotificationRepository {
    /// Appends an unread entry to the recipient's mailbox.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewNotification<'_>,
    ) -> Result<Notification, NotificationError> {
        let metadata_json = record.metadata.map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            "INSERT INTO notifications \
             (recipient_id, type, title, message, metadata, application_id, campaign_id, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'unread', ?) \
             RETURNING id",
        )
        .bind(record.recipient_id)
        .bind(record.kind.as_str())
        .bind(record.title)
        .bind(record.message)
        .bind(&metadata_json)
        .bind(record.application_id)
        .bind(record.campaign_id)
        .bind(to_rfc3339(record.created_at))
        .fetch_one(&mut **tx)
        .await;

        let row = result.map_err(|err| match err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("787") {
                    NotificationError::MissingRecipient
                } else {
                    NotificationError::Database(sqlx::Error::Database(db_err))
                }
            }
            other => NotificationError::Database(other),
        })?;

        Ok(Notification {
            id: row.get("id"),
            recipient_id: record.recipient_id,
            kind: record.kind,
            title: record.title.to_string(),
            message: record.message.to_string(),
            metadata: record.metadata.cloned(),
            application_id: record.application_id,
            campaign_id: record.campaign_id,
            status: NotificationStatus::Unread,
            created_at: record.created_at,
            read_at: None,
        })
    }

    /// Lists a recipient's mailbox, newest first, hiding archived entries.
    pub async fn list_for_user(
        &self,
        user_id: i64,
        only_unread: bool,
        kind: Option<NotificationType>,
        limit: i64,
    ) -> Result<Vec<Notification>, NotificationError> {
        let unread_flag = if only_unread { 1 } else { 0 };
        let kind_str = kind.map(NotificationType::as_str);
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} \
               FROM notifications \
              WHERE recipient_id = ? \
                AND status != 'archived' \
                AND (? = 0 OR status = 'unread') \
                AND (? IS NULL OR type = ?) \
              ORDER BY created_at DESC, id DESC \
              LIMIT ?"
        ))
        .bind(user_id)
        .bind(unread_flag)
        .bind(kind_str)
        .bind(kind_str)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationRow::into_domain).collect()
    }

    /// Counts unread entries for a recipient.
    pub async fn count_unread(&self, user_id: i64) -> Result<i64, NotificationError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND status = 'unread'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Marks one entry read on behalf of its recipient.
    ///
    /// The `(id, recipient_id)` pair is the ownership predicate: an entry
    /// belonging to somebody else behaves exactly like a missing one.
    pub async fn mark_read(
        &self,
        id: i64,
        user_id: i64,
        read_at: DateTime<Utc>,
    ) -> Result<NotificationUpdateOutcome, NotificationError> {
        let updated = sqlx::query_as::<_, NotificationRow>(&format!(
            "UPDATE notifications \
                SET status = 'read', read_at = ? \
              WHERE id = ? AND recipient_id = ? AND status = 'unread' \
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(to_rfc3339(read_at))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => Ok(NotificationUpdateOutcome::Updated(row.into_domain()?)),
            None => self.fetch_unchanged(id, user_id).await,
        }
    }

    /// Marks every unread entry of a recipient read, returning how many changed.
    pub async fn mark_all_read(
        &self,
        user_id: i64,
        read_at: DateTime<Utc>,
    ) -> Result<u64, NotificationError> {
        let result = sqlx::query(
            "UPDATE notifications \
                SET status = 'read', read_at = ? \
              WHERE recipient_id = ? AND status = 'unread'",
        )
        .bind(to_rfc3339(read_at))
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Archives one entry, recording a read timestamp if it never had one.
    pub async fn archive(
        &self,
        id: i64,
        user_id: i64,
        archived_at: DateTime<Utc>,
    ) -> Result<NotificationUpdateOutcome, NotificationError> {
        let updated = sqlx::query_as::<_, NotificationRow>(&format!(
            "UPDATE notifications \
                SET status = 'archived', read_at = COALESCE(read_at, ?) \
              WHERE id = ? AND recipient_id = ? AND status != 'archived' \
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(to_rfc3339(archived_at))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(row) => Ok(NotificationUpdateOutcome::Updated(row.into_domain()?)),
            None => self.fetch_unchanged(id, user_id).await,
        }
    }

    /// Deletes one entry on behalf of its recipient.
    pub async fn delete(&self, id: i64, user_id: i64) -> Result<(), NotificationError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND recipient_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(NotificationError::NotFound);
        }

        Ok(())
    }

    async fn fetch_unchanged(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<NotificationUpdateOutcome, NotificationError> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} \
               FROM notifications \
              WHERE id = ? AND recipient_id = ?"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(NotificationError::NotFound)?;

        Ok(NotificationUpdateOutcome::Unchanged(row.into_domain()?))
    }
}

/// Data required to append a mailbox entry.
pub struct NewNotification<'a> {
    pub recipient_id: i64,
    pub kind: NotificationType,
    pub title: &'a str,
    pub message: &'a str,
    pub metadata: Option<&'a Value>,
    pub application_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Result of a mailbox state change.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationUpdateOutcome {
    /// The row changed as part of this call.
    Updated(Notification),
    /// The row was already in the requested state.
    Unchanged(Notification),
}

impl NotificationUpdateOutcome {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged(_))
    }

    pub fn into_notification(self) -> Notification {
        match self {
            Self::Updated(notification) | Self::Unchanged(notification) => notification,
        }
    }
}

/// Flat notification row as stored.
#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    recipient_id: i64,
    kind: String,
    title: String,
    message: String,
    metadata: Option<String>,
    application_id: Option<i64>,
    campaign_id: Option<i64>,
    status: String,
    created_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
}

impl NotificationRow {
    fn into_domain(self) -> Result<Notification, NotificationError> {
        let metadata = match self.metadata {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Notification {
            id: self.id,
            recipient_id: self.recipient_id,
            kind: self.kind.parse().unwrap_or(NotificationType::System),
            title: self.title,
            message: self.message,
            metadata,
            application_id: self.application_id,
            campaign_id: self.campaign_id,
            status: self.status.parse().unwrap_or(NotificationStatus::Unread),
            created_at: self.created_at,
            read_at: self.read_at,
        })
    }
}

/// Errors that can occur while operating on the mailbox.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification not found")]
    NotFound,
    #[error("notification references a missing user")]
    MissingRecipient,
    #[error("invalid notification metadata json: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
