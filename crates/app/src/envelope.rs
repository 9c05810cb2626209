use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::mailbox::MailboxError;
use crate::registry::RegistryError;

#[derive(Debug, Serialize)]
struct SuccessBody<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

/// Wraps `data` in the `{"success": true, "data": …}` envelope.
pub fn success<T: Serialize>(status: StatusCode, data: T) -> Response {
    let mut response = Json(SuccessBody {
        success: true,
        data,
    })
    .into_response();
    *response.status_mut() = status;
    response
}

/// A failure already mapped to a transport status and a client-facing
/// message, rendered as `{"success": false, "message": …}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(context: &'static str, err: &dyn std::error::Error) -> Self {
        error!(stage = "http", context, error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = Json(ErrorBody {
            success: false,
            message: self.message,
        })
        .into_response();
        *response.status_mut() = self.status;
        response
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::Validation(_)
            | RegistryError::InvalidAvailability(_)
            | RegistryError::InvalidStatus(_)
            | RegistryError::InvalidTransition { .. }
            | RegistryError::Duplicate => StatusCode::BAD_REQUEST,
            RegistryError::ApplicantNotFound
            | RegistryError::OrganizationNotFound
            | RegistryError::CampaignNotFound
            | RegistryError::NotFound => StatusCode::NOT_FOUND,
            RegistryError::Dispatch(_) | RegistryError::Database(_) => {
                return Self::internal("registry", &err);
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<MailboxError> for ApiError {
    fn from(err: MailboxError) -> Self {
        let status = match &err {
            MailboxError::InvalidType(_) => StatusCode::BAD_REQUEST,
            MailboxError::NotFound | MailboxError::RecipientNotFound => StatusCode::NOT_FOUND,
            MailboxError::Metadata(_) | MailboxError::Database(_) => {
                return Self::internal("mailbox", &err);
            }
        };
        Self::new(status, err.to_string())
    }
}
