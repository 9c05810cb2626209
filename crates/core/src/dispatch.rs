use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::types::{ApplicationStatus, NotificationType};

/// A notification rendered for one recipient, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub recipient_id: i64,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub metadata: Option<Value>,
    pub application_id: Option<i64>,
    pub campaign_id: Option<i64>,
}

/// A lifecycle fact that warrants telling somebody about it.
///
/// Variants carry the already-resolved display names so composition stays
/// a pure string affair; looking the names up is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DomainEvent<'a> {
    /// An applicant submitted a new application to a campaign.
    ApplicationCreated {
        application_id: i64,
        campaign_id: i64,
        campaign_name: &'a str,
        applicant_name: &'a str,
        submitted_at: DateTime<Utc>,
    },
    /// An application moved from `previous` to `next`.
    ApplicationTransitioned {
        application_id: i64,
        applicant_id: i64,
        campaign_id: i64,
        campaign_name: &'a str,
        previous: ApplicationStatus,
        next: ApplicationStatus,
        rejection_reason: Option<&'a str>,
    },
    /// A campaign's published details changed.
    CampaignUpdated {
        campaign_id: i64,
        campaign_name: &'a str,
        changes: &'a [String],
    },
}

/// Renders the notification a recipient should receive for an event.
///
/// Composition is pure: no clock, no storage, no recipient lookup. The
/// titles and messages are the product's Spanish copy verbatim.
pub struct Composer;

impl Composer {
    /// Returns the draft addressed to `recipient_id`, or `None` when the
    /// event produces no notification (a transition into `pending` never
    /// happens through the status machine, but the type admits it).
    pub fn compose(recipient_id: i64, event: &DomainEvent<'_>) -> Option<NotificationDraft> {
        match *event {
            DomainEvent::ApplicationCreated {
                application_id,
                campaign_id,
                campaign_name,
                applicant_name,
                submitted_at,
            } => Some(NotificationDraft {
                recipient_id,
                kind: NotificationType::NewApplication,
                title: "¡Nueva Postulación!".to_string(),
                message: format!("{applicant_name} se ha postulado a \"{campaign_name}\""),
                metadata: Some(json!({
                    "application_id": application_id,
                    "applicant_name": applicant_name,
                    "submitted_at": submitted_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                })),
                application_id: Some(application_id),
                campaign_id: Some(campaign_id),
            }),
            DomainEvent::ApplicationTransitioned {
                application_id,
                campaign_id,
                campaign_name,
                previous,
                next,
                rejection_reason,
                ..
            } => {
                let (kind, title, message) = match next {
                    ApplicationStatus::UnderReview => (
                        NotificationType::System,
                        "Postulación en Revisión",
                        format!("Tu postulación a \"{campaign_name}\" está siendo revisada"),
                    ),
                    ApplicationStatus::Accepted => (
                        NotificationType::ApplicationAccepted,
                        "¡Felicitaciones! Postulación Aceptada",
                        format!(
                            "Tu postulación a \"{campaign_name}\" ha sido aceptada. \
                             La organización se pondrá en contacto contigo."
                        ),
                    ),
                    ApplicationStatus::Rejected => {
                        let mut message = format!(
                            "Lamentablemente tu postulación a \"{campaign_name}\" no fue seleccionada."
                        );
                        if let Some(reason) = rejection_reason {
                            message.push_str(&format!(" Motivo: {reason}"));
                        }
                        (
                            NotificationType::ApplicationRejected,
                            "Postulación No Seleccionada",
                            message,
                        )
                    }
                    ApplicationStatus::Pending => return None,
                };
                Some(NotificationDraft {
                    recipient_id,
                    kind,
                    title: title.to_string(),
                    message,
                    metadata: Some(json!({
                        "application_id": application_id,
                        "previous_status": previous.as_str(),
                        "new_status": next.as_str(),
                    })),
                    application_id: Some(application_id),
                    campaign_id: Some(campaign_id),
                })
            }
            DomainEvent::CampaignUpdated {
                campaign_id,
                campaign_name,
                changes,
            } => Some(NotificationDraft {
                recipient_id,
                kind: NotificationType::CampaignUpdated,
                title: "Campaña Actualizada".to_string(),
                message: format!(
                    "La campaña \"{campaign_name}\" ha sido actualizada: {}",
                    changes.join(", ")
                ),
                metadata: Some(json!({ "changes": changes })),
                application_id: None,
                campaign_id: Some(campaign_id),
            }),
        }
    }
}
