use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use talento_core::types::RegistrySettings;
use talento_storage::Database;

use crate::envelope::{self, ApiError};
use crate::mailbox::{ListOptions, MailboxService, NewNotificationRequest};
use crate::registry::{
    ApplicationFilter, ApplicationRegistry, NewApplicationRequest, TransitionRequest,
};
use crate::telemetry;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    registry: ApplicationRegistry,
    mailbox: MailboxService,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        settings: RegistrySettings,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        let registry = ApplicationRegistry::new(storage.clone(), settings, clock.clone());
        let mailbox = MailboxService::new(storage, clock);
        Self {
            metrics,
            registry,
            mailbox,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn registry(&self) -> &ApplicationRegistry {
        &self.registry
    }

    pub fn mailbox(&self) -> &MailboxService {
        &self.mailbox
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/applications", post(create_application))
        .route(
            "/api/applications/organization/:user_id",
            get(organization_applications),
        )
        .route("/api/applications/:id", get(application_detail))
        .route("/api/applications/:id/status", put(transition_application))
        .route("/api/notifications", post(append_notification))
        .route("/api/notifications/user/:user_id", get(list_notifications))
        .route(
            "/api/notifications/user/:user_id/read-all",
            put(read_all_notifications),
        )
        .route("/api/notifications/:id/read", put(read_notification))
        .route("/api/notifications/:id/archive", put(archive_notification))
        .route("/api/notifications/:id", delete(delete_notification))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}

/// A submission together with the user account it is made from.
#[derive(Debug, Deserialize)]
struct CreateApplicationBody {
    applicant_user_id: i64,
    #[serde(flatten)]
    application: NewApplicationRequest,
}

/// Mailbox mutations identify the acting user in the body.
#[derive(Debug, Deserialize)]
struct OwnerBody {
    user_id: i64,
}

#[derive(Debug, Serialize)]
struct UpdatedCount {
    updated: u64,
}

#[derive(Debug, Serialize)]
struct Deleted {
    deleted: bool,
}

async fn create_application(
    State(state): State<AppState>,
    Json(body): Json<CreateApplicationBody>,
) -> Result<Response, ApiError> {
    let outcome = state
        .registry()
        .create(body.applicant_user_id, &body.application)
        .await?;
    Ok(envelope::success(StatusCode::CREATED, outcome))
}

async fn organization_applications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(filter): Query<ApplicationFilter>,
) -> Result<Response, ApiError> {
    let board = state
        .registry()
        .list_for_organization(user_id, &filter)
        .await?;
    Ok(envelope::success(StatusCode::OK, board))
}

async fn application_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let detail = state.registry().detail(id).await?;
    Ok(envelope::success(StatusCode::OK, detail))
}

async fn transition_application(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<TransitionRequest>,
) -> Result<Response, ApiError> {
    let outcome = state.registry().transition(id, &request).await?;
    Ok(envelope::success(StatusCode::OK, outcome))
}

async fn append_notification(
    State(state): State<AppState>,
    Json(request): Json<NewNotificationRequest>,
) -> Result<Response, ApiError> {
    let notification = state.mailbox().append(&request).await?;
    Ok(envelope::success(StatusCode::CREATED, notification))
}

async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(options): Query<ListOptions>,
) -> Result<Response, ApiError> {
    let page = state.mailbox().list(user_id, &options).await?;
    Ok(envelope::success(StatusCode::OK, page))
}

async fn read_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<OwnerBody>,
) -> Result<Response, ApiError> {
    let notification = state.mailbox().mark_read(id, body.user_id).await?;
    Ok(envelope::success(StatusCode::OK, notification))
}

async fn read_all_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Response, ApiError> {
    let updated = state.mailbox().mark_all_read(user_id).await?;
    Ok(envelope::success(StatusCode::OK, UpdatedCount { updated }))
}

async fn archive_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<OwnerBody>,
) -> Result<Response, ApiError> {
    let notification = state.mailbox().archive(id, body.user_id).await?;
    Ok(envelope::success(StatusCode::OK, notification))
}

async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<OwnerBody>,
) -> Result<Response, ApiError> {
    state.mailbox().delete(id, body.user_id).await?;
    Ok(envelope::success(StatusCode::OK, Deleted { deleted: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request};
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::fixtures;

    fn frozen_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap()
    }

    async fn setup_state() -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let database = fixtures::seeded_database().await;
        AppState::new(
            metrics,
            database,
            RegistrySettings::default(),
            fixtures::fixed_clock(frozen_at()),
        )
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        serde_json::from_slice(&collected.to_bytes()).expect("json body")
    }

    fn application_body(campaign_id: i64) -> Value {
        json!({
            "applicant_user_id": 2,
            "campaign_id": campaign_id,
            "motivation_letter": "Quiero sumarme como voluntaria porque la reforestación me importa mucho.",
            "experience": "Dos años en brigadas escolares.",
            "availability": "weekends",
        })
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(get_request("/healthz"))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(get_request("/metrics"))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn create_application_wraps_outcome_in_envelope() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/api/applications",
                application_body(1),
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        assert_eq!(body["success"], json!(true));
        let data = &body["data"];
        assert_eq!(data["application"]["status"], json!("pending"));
        assert_eq!(
            data["application"]["submitted_at"],
            json!("2024-06-05T12:00:00Z")
        );
        assert_eq!(data["notifications"][0]["recipient_id"], json!(1));
        assert_eq!(data["notifications"][0]["type"], json!("new_application"));
        assert_eq!(data["notifications"][0]["title"], json!("¡Nueva Postulación!"));
    }

    #[tokio::test]
    async fn domain_errors_map_to_envelope_statuses() {
        let app = app_router(setup_state().await);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/applications",
                application_body(1),
            ))
            .await
            .expect("create");
        assert_eq!(response.status(), StatusCode::CREATED);

        // Repeating the submission conflicts.
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/applications",
                application_body(1),
            ))
            .await
            .expect("duplicate");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(
            body["message"],
            json!("an application for this campaign already exists")
        );

        let mut bad_availability = application_body(2);
        bad_availability["availability"] = json!("nights");
        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/applications",
                bad_availability,
            ))
            .await
            .expect("bad availability");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/applications",
                application_body(99),
            ))
            .await
            .expect("missing campaign");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = read_json(response).await;
        assert_eq!(body["message"], json!("campaign not found"));

        let response = app
            .clone()
            .oneshot(get_request("/api/applications/999"))
            .await
            .expect("missing application");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                "/api/applications/1/status",
                json!({"status": "approved"}),
            ))
            .await
            .expect("bad status");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["message"], json!("unknown application status: approved"));
    }

    #[tokio::test]
    async fn review_flow_round_trips_over_http() {
        let app = app_router(setup_state().await);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/applications",
                application_body(1),
            ))
            .await
            .expect("create");
        let body = read_json(response).await;
        let id = body["data"]["application"]["id"].as_i64().expect("id");

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                &format!("/api/applications/{id}/status"),
                json!({"status": "under_review", "internal_notes": "Revisar CV"}),
            ))
            .await
            .expect("review");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                &format!("/api/applications/{id}/status"),
                json!({"status": "rejected", "rejection_reason": "Cupo lleno"}),
            ))
            .await
            .expect("reject");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["data"]["application"]["status"], json!("rejected"));
        assert_eq!(
            body["data"]["application"]["rejection_reason"],
            json!("Cupo lleno")
        );

        let response = app
            .clone()
            .oneshot(get_request(&format!("/api/applications/{id}")))
            .await
            .expect("detail");
        let body = read_json(response).await;
        assert_eq!(body["data"]["application"]["status"], json!("rejected"));
        assert_eq!(body["data"]["applicant"]["name"], json!("María González"));
        assert_eq!(body["data"]["guardian"]["name"], json!("Rosa González"));

        // The rejection reached María's mailbox.
        let response = app
            .clone()
            .oneshot(get_request("/api/notifications/user/2"))
            .await
            .expect("mailbox");
        let body = read_json(response).await;
        let messages: Vec<&str> = body["data"]["notifications"]
            .as_array()
            .expect("array")
            .iter()
            .map(|n| n["message"].as_str().expect("message"))
            .collect();
        assert!(messages
            .iter()
            .any(|message| message.ends_with("Motivo: Cupo lleno")));

        let response = app
            .clone()
            .oneshot(get_request("/api/applications/organization/1"))
            .await
            .expect("board");
        let body = read_json(response).await;
        assert_eq!(body["data"]["stats"]["pending"], json!(0));
        assert_eq!(body["data"]["stats"]["under_review"], json!(0));
        assert_eq!(body["data"]["stats"]["total"], json!(1));

        let response = app
            .clone()
            .oneshot(get_request(
                "/api/applications/organization/1?status=rejected&campaign_id=1",
            ))
            .await
            .expect("filtered board");
        let body = read_json(response).await;
        assert_eq!(
            body["data"]["applications"].as_array().expect("array").len(),
            1
        );
    }

    #[tokio::test]
    async fn mailbox_routes_round_trip() {
        let app = app_router(setup_state().await);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/notifications",
                json!({
                    "recipient_id": 3,
                    "type": "reminder",
                    "title": "Recordatorio",
                    "message": "La jornada empieza a las 9",
                }),
            ))
            .await
            .expect("append");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        let id = body["data"]["id"].as_i64().expect("id");
        assert_eq!(body["data"]["status"], json!("unread"));

        let response = app
            .clone()
            .oneshot(get_request("/api/notifications/user/3?only_unread=true"))
            .await
            .expect("list");
        let body = read_json(response).await;
        assert_eq!(body["data"]["unread_count"], json!(1));
        assert_eq!(
            body["data"]["notifications"].as_array().expect("array").len(),
            1
        );

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                &format!("/api/notifications/{id}/read"),
                json!({"user_id": 3}),
            ))
            .await
            .expect("read");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["data"]["status"], json!("read"));

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                "/api/notifications/user/3/read-all",
                json!({}),
            ))
            .await
            .expect("read all");
        let body = read_json(response).await;
        assert_eq!(body["data"]["updated"], json!(0));

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                &format!("/api/notifications/{id}/archive"),
                json!({"user_id": 3}),
            ))
            .await
            .expect("archive");
        let body = read_json(response).await;
        assert_eq!(body["data"]["status"], json!("archived"));

        // Ownership is checked before deleting.
        let response = app
            .clone()
            .oneshot(json_request(
                Method::DELETE,
                &format!("/api/notifications/{id}"),
                json!({"user_id": 2}),
            ))
            .await
            .expect("foreign delete");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::DELETE,
                &format!("/api/notifications/{id}"),
                json!({"user_id": 3}),
            ))
            .await
            .expect("delete");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["data"]["deleted"], json!(true));

        let response = app
            .clone()
            .oneshot(get_request("/api/notifications/user/3"))
            .await
            .expect("empty list");
        let body = read_json(response).await;
        assert_eq!(body["data"]["unread_count"], json!(0));
        assert!(body["data"]["notifications"]
            .as_array()
            .expect("array")
            .is_empty());
    }
}
