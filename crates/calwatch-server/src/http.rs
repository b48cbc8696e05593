//! HTTP surface.
//!
//! - `POST /webhook/calendar/events`: provider pushes, always answered 200
//! - `POST /subscriptions`: `{calendarId, eventId, offset?}`
//! - `DELETE /subscriptions`: not supported, answered 501
//! - `GET /status`: provider health and watched calendars

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::WEBHOOK_PATH;
use crate::error::ServerError;
use crate::service::{ReminderService, StatusReport, Subscription, UnsubscribeOutcome};
use crate::webhook::{PushNotification, WebhookRouter};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    service: Arc<ReminderService>,
    webhooks: WebhookRouter,
}

impl AppState {
    /// Creates handler state around a service.
    pub fn new(service: Arc<ReminderService>) -> Self {
        Self {
            webhooks: WebhookRouter::new(Arc::clone(&service)),
            service,
        }
    }
}

/// Builds the application router.
pub fn router(service: Arc<ReminderService>) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive_push))
        .route("/subscriptions", post(subscribe).delete(unsubscribe))
        .route("/status", get(status))
        .fallback(not_found)
        .with_state(AppState::new(service))
}

/// Error body: `{"status": 404, "body": "Not found"}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub body: String,
}

fn error_response(status: StatusCode, body: impl Into<String>) -> Response {
    let body = Json(ErrorResponse {
        status: status.as_u16(),
        body: body.into(),
    });
    (status, body).into_response()
}

/// Maps service errors to HTTP responses.
pub struct AppError(ServerError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ServerError::Validation(_) | ServerError::InvalidRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            ServerError::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => {
                error!(error = %self.0, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.0.to_string())
    }
}

impl<E> From<E> for AppError
where
    E: Into<ServerError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Body of subscribe and unsubscribe requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub calendar_id: String,
    pub event_id: String,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// POST /webhook/calendar/events
async fn receive_push(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let push = PushNotification::from_headers(&headers);
    let outcome = state.webhooks.dispatch(&push).await;
    debug!(?outcome, "Push handled");
    StatusCode::OK
}

/// POST /subscriptions
async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let subscription = state
        .service
        .subscribe(&request.calendar_id, &request.event_id, request.offset)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// DELETE /subscriptions
async fn unsubscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionRequest>,
) -> Response {
    match state
        .service
        .unsubscribe(&request.calendar_id, &request.event_id, request.offset)
    {
        UnsubscribeOutcome::Unsupported { .. } => error_response(
            StatusCode::NOT_IMPLEMENTED,
            "Unsubscribe is not supported: scheduled reminders cannot be cancelled",
        ),
    }
}

/// GET /status
async fn status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.service.status().await)
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}
