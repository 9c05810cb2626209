use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Lifecycle status of an application.
///
/// Allowed transitions:
/// - pending -> under_review
/// - pending -> accepted
/// - pending -> rejected
/// - under_review -> accepted
/// - under_review -> rejected
///
/// `accepted` and `rejected` are terminal; nothing ever moves back to
/// `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    UnderReview,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    /// Returns `true` when the status machine permits moving to `next`.
    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::UnderReview)
                | (Self::Pending, Self::Accepted)
                | (Self::Pending, Self::Rejected)
                | (Self::UnderReview, Self::Accepted)
                | (Self::UnderReview, Self::Rejected)
        )
    }

    /// Returns `true` when no outgoing transition exists.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

impl FromStr for ApplicationStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "under_review" => Ok(Self::UnderReview),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability declared by the applicant when applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Availability {
    FullTime,
    PartTime,
    Flexible,
    Weekends,
}

impl Availability {
    /// Returns the canonical database representation for the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullTime => "full-time",
            Self::PartTime => "part-time",
            Self::Flexible => "flexible",
            Self::Weekends => "weekends",
        }
    }
}

impl FromStr for Availability {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "full-time" => Ok(Self::FullTime),
            "part-time" => Ok(Self::PartTime),
            "flexible" => Ok(Self::Flexible),
            "weekends" => Ok(Self::Weekends),
            _ => Err(()),
        }
    }
}

/// Open/closed state of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Open,
    Closed,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            _ => Err(()),
        }
    }
}

/// Closed set of notification types the mailbox accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    CampaignUpdated,
    CampaignApproved,
    CampaignRejected,
    NewApplication,
    ApplicationAccepted,
    ApplicationRejected,
    CertificateIssued,
    FineAssigned,
    Reminder,
    System,
}

impl NotificationType {
    /// Returns the canonical wire/database representation for the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CampaignUpdated => "campaign_updated",
            Self::CampaignApproved => "campaign_approved",
            Self::CampaignRejected => "campaign_rejected",
            Self::NewApplication => "new_application",
            Self::ApplicationAccepted => "application_accepted",
            Self::ApplicationRejected => "application_rejected",
            Self::CertificateIssued => "certificate_issued",
            Self::FineAssigned => "fine_assigned",
            Self::Reminder => "reminder",
            Self::System => "system",
        }
    }
}

impl FromStr for NotificationType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "campaign_updated" => Ok(Self::CampaignUpdated),
            "campaign_approved" => Ok(Self::CampaignApproved),
            "campaign_rejected" => Ok(Self::CampaignRejected),
            "new_application" => Ok(Self::NewApplication),
            "application_accepted" => Ok(Self::ApplicationAccepted),
            "application_rejected" => Ok(Self::ApplicationRejected),
            "certificate_issued" => Ok(Self::CertificateIssued),
            "fine_assigned" => Ok(Self::FineAssigned),
            "reminder" => Ok(Self::Reminder),
            "system" => Ok(Self::System),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NotificationType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NotificationType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        NotificationType::from_str(&value)
            .map_err(|_| D::Error::custom(format!("unknown notification type: {value}")))
    }
}

/// Read state of a mailbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Unread,
    Read,
    Archived,
}

impl NotificationStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Read => "read",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unread" => Ok(Self::Unread),
            "read" => Ok(Self::Read),
            "archived" => Ok(Self::Archived),
            _ => Err(()),
        }
    }
}

/// An application submitted by an applicant against one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub applicant_id: i64,
    pub campaign_id: i64,
    pub motivation_letter: String,
    pub experience: String,
    pub availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv_file: Option<String>,
    pub status: ApplicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

/// A mailbox entry addressed to one recipient user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<i64>,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

/// Denormalized applicant data attached to listing/detail responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantSummary {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub accumulated_hours: i64,
}

/// Denormalized guardian data attached to listing/detail responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

/// Minimal campaign reference embedded in listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignBrief {
    pub id: i64,
    pub name: String,
}

/// Campaign data attached to the detail view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub organization_name: String,
}

/// One application row in an organization's listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationListItem {
    pub application: Application,
    pub applicant: ApplicantSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardian: Option<GuardianSummary>,
    pub campaign: CampaignBrief,
}

/// Per-status totals computed alongside an organization's listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplicationStats {
    pub pending: i64,
    pub under_review: i64,
    pub total: i64,
}

/// Full application view with denormalized neighbors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationDetail {
    pub application: Application,
    pub applicant: ApplicantSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardian: Option<GuardianSummary>,
    pub campaign: CampaignSummary,
}

/// Tunable policy knobs for the application registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Minimum motivation letter length, in characters.
    pub min_motivation_len: usize,
    /// Whether a rejected applicant may apply to the same campaign again.
    pub reapply_after_rejection: bool,
}

impl RegistrySettings {
    const DEFAULT_MIN_MOTIVATION_LEN: usize = 50;

    /// Validates the applicant-supplied fields of a new application.
    pub fn validate_submission(
        &self,
        motivation_letter: &str,
        experience: &str,
    ) -> Result<(), ValidationError> {
        if motivation_letter.trim().is_empty() {
            return Err(ValidationError::MissingField("motivation_letter"));
        }
        if experience.trim().is_empty() {
            return Err(ValidationError::MissingField("experience"));
        }
        let len = motivation_letter.chars().count();
        if len < self.min_motivation_len {
            return Err(ValidationError::LetterTooShort {
                min: self.min_motivation_len,
                actual: len,
            });
        }
        Ok(())
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            min_motivation_len: Self::DEFAULT_MIN_MOTIVATION_LEN,
            reapply_after_rejection: false,
        }
    }
}

/// Rejections raised while validating applicant input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("required field is missing: {0}")]
    MissingField(&'static str),
    #[error("motivation letter must be at least {min} characters (got {actual})")]
    LetterTooShort { min: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_state_machine() {
        use ApplicationStatus::*;
        let allowed = [
            (Pending, UnderReview),
            (Pending, Accepted),
            (Pending, Rejected),
            (UnderReview, Accepted),
            (UnderReview, Rejected),
        ];
        for from in [Pending, UnderReview, Accepted, Rejected] {
            for to in [Pending, UnderReview, Accepted, Rejected] {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn nothing_moves_back_to_pending() {
        use ApplicationStatus::*;
        for from in [Pending, UnderReview, Accepted, Rejected] {
            assert!(!from.can_transition_to(Pending));
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        use ApplicationStatus::*;
        for from in [Accepted, Rejected] {
            assert!(from.is_terminal());
            for to in [Pending, UnderReview, Accepted, Rejected] {
                assert!(!from.can_transition_to(to));
            }
        }
        assert!(!Pending.is_terminal());
        assert!(!UnderReview.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        use ApplicationStatus::*;
        for status in [Pending, UnderReview, Accepted, Rejected] {
            assert_eq!(status.as_str().parse::<ApplicationStatus>(), Ok(status));
        }
        assert!("pendiente".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn notification_type_round_trips_and_rejects_unknown() {
        let all = [
            NotificationType::CampaignUpdated,
            NotificationType::CampaignApproved,
            NotificationType::CampaignRejected,
            NotificationType::NewApplication,
            NotificationType::ApplicationAccepted,
            NotificationType::ApplicationRejected,
            NotificationType::CertificateIssued,
            NotificationType::FineAssigned,
            NotificationType::Reminder,
            NotificationType::System,
        ];
        for kind in all {
            assert_eq!(kind.as_str().parse::<NotificationType>(), Ok(kind));
        }
        assert!("welcome_email".parse::<NotificationType>().is_err());
    }

    #[test]
    fn notification_type_serde_uses_canonical_strings() {
        let value = serde_json::to_value(NotificationType::NewApplication).unwrap();
        assert_eq!(value, serde_json::json!("new_application"));

        let parsed: NotificationType = serde_json::from_str("\"reminder\"").unwrap();
        assert_eq!(parsed, NotificationType::Reminder);

        let err = serde_json::from_str::<NotificationType>("\"unknown_kind\"").unwrap_err();
        assert!(err.to_string().contains("unknown notification type"));
    }

    #[test]
    fn availability_uses_kebab_case_values() {
        assert_eq!(Availability::FullTime.as_str(), "full-time");
        assert_eq!("weekends".parse::<Availability>(), Ok(Availability::Weekends));
        let value = serde_json::to_value(Availability::PartTime).unwrap();
        assert_eq!(value, serde_json::json!("part-time"));
        assert!("mornings".parse::<Availability>().is_err());
    }

    #[test]
    fn notification_serializes_kind_under_type_key() {
        let notification = Notification {
            id: 7,
            recipient_id: 3,
            kind: NotificationType::System,
            title: "t".into(),
            message: "m".into(),
            metadata: None,
            application_id: None,
            campaign_id: Some(9),
            status: NotificationStatus::Unread,
            created_at: Utc::now(),
            read_at: None,
        };
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], serde_json::json!("system"));
        assert_eq!(value["campaign_id"], serde_json::json!(9));
        assert!(value.get("read_at").is_none());
    }

    #[test]
    fn default_settings_require_fifty_characters() {
        let settings = RegistrySettings::default();
        assert_eq!(settings.min_motivation_len, 50);
        assert!(!settings.reapply_after_rejection);

        let short = "x".repeat(49);
        let err = settings.validate_submission(&short, "two years").unwrap_err();
        assert_eq!(
            err,
            ValidationError::LetterTooShort {
                min: 50,
                actual: 49
            }
        );

        let exact = "x".repeat(50);
        assert!(settings.validate_submission(&exact, "two years").is_ok());
    }

    #[test]
    fn letter_length_counts_characters_not_bytes() {
        let settings = RegistrySettings::default();
        // 50 two-byte characters.
        let letter = "ñ".repeat(50);
        assert!(settings.validate_submission(&letter, "experiencia").is_ok());
    }

    #[test]
    fn blank_fields_are_missing() {
        let settings = RegistrySettings::default();
        let err = settings.validate_submission("   ", "exp").unwrap_err();
        assert_eq!(err, ValidationError::MissingField("motivation_letter"));

        let letter = "x".repeat(60);
        let err = settings.validate_submission(&letter, "").unwrap_err();
        assert_eq!(err, ValidationError::MissingField("experience"));
    }
}
