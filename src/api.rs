//! Admin REST API.
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::clock::{Clock, YearWeek};
use crate::coordinator::Coordinator;
use crate::error::{DatabaseError, DialogError, Error, MatchingError};

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    pub token: Arc<SecretString>,
}

pub fn admin_routes(state: ApiState) -> Router {
    let api = Router::new()
        .route("/api/schedule", get(get_schedule))
        .route("/api/shuffle_meetings", post(shuffle_meetings))
        .route("/api/resend_invitation", post(resend_invitation))
        .route("/api/connect_participants", post(connect_participants))
        .route("/api/collect_feedback", post(collect_feedback))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<ApiState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token.is_empty() || token != state.token.expose_secret() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}

// ── Errors ──────────────────────────────────────────────────────────

enum ApiError {
    BadRequest(String),
    Forbidden(String),
    Service(Error),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Forbidden(m) => (StatusCode::FORBIDDEN, m),
            Self::Service(e) => {
                let status = match &e {
                    Error::Database(DatabaseError::NotFound { .. })
                    | Error::Dialog(DialogError::ParticipantMissing(_)) => StatusCode::NOT_FOUND,
                    Error::Matching(MatchingError::AlreadyBroadcast(_)) => StatusCode::CONFLICT,
                    _ => {
                        error!(error = %e, "Admin request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn parse_week(year: i32, week: u32) -> Result<YearWeek, ApiError> {
    YearWeek::new(year, week)
        .ok_or_else(|| ApiError::BadRequest(format!("{year}-W{week} is not an ISO week")))
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct WeekQuery {
    year: Option<i32>,
    week: Option<u32>,
}

/// GET /api/schedule?year=&week=
///
/// Defaults to next week when either parameter is missing.
async fn get_schedule(
    State(state): State<ApiState>,
    Query(query): Query<WeekQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let week = match (query.year, query.week) {
        (Some(year), Some(week)) => parse_week(year, week)?,
        _ => Clock::next_week(),
    };
    Ok(Json(state.coordinator.schedule_overview(week).await?))
}

#[derive(Debug, Deserialize)]
struct ShuffleRequest {
    year: i32,
    week: u32,
    #[serde(default)]
    ignore_time_flow: bool,
}

/// POST /api/shuffle_meetings
///
/// Past and current weeks are refused unless `ignore_time_flow` is set.
async fn shuffle_meetings(
    State(state): State<ApiState>,
    Json(req): Json<ShuffleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let week = parse_week(req.year, req.week)?;
    if !req.ignore_time_flow && week.monday() < Clock::next_week().monday() {
        return Err(ApiError::Forbidden(format!(
            "{week} has already started, pass ignore_time_flow to rearrange it anyway"
        )));
    }

    info!(%week, ignore_time_flow = req.ignore_time_flow, "Admin shuffle requested");
    let body = match state.coordinator.trigger_matching(week).await? {
        Some(arrangement) => json!({
            "rearranged": true,
            "meetings": arrangement.meetings.len(),
            "left_alone": arrangement.left_alone,
            "left_underutilized": arrangement.left_underutilized,
        }),
        None => json!({ "rearranged": false, "meetings": 0 }),
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct ResendRequest {
    participant_id: String,
    year: i32,
    week: u32,
}

/// POST /api/resend_invitation
async fn resend_invitation(
    State(state): State<ApiState>,
    Json(req): Json<ResendRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let week = parse_week(req.year, req.week)?;
    state.coordinator.resend_invitation(&req.participant_id, week).await?;
    Ok(Json(json!({ "sent": true })))
}

#[derive(Debug, Deserialize)]
struct WeekRequest {
    year: i32,
    week: u32,
}

/// POST /api/connect_participants
///
/// Sends every participant of the week their partners' contacts.
async fn connect_participants(
    State(state): State<ApiState>,
    Json(req): Json<WeekRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let week = parse_week(req.year, req.week)?;
    let notified = state.coordinator.broadcast_meeting_details(week).await?;
    Ok(Json(json!({ "notified": notified })))
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    year: i32,
    week: u32,
    participant_a: Option<String>,
    participant_b: Option<String>,
}

/// POST /api/collect_feedback
///
/// Whole week, or one meeting when both participants are given.
async fn collect_feedback(
    State(state): State<ApiState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let week = parse_week(req.year, req.week)?;
    let asked = match (req.participant_a.as_deref(), req.participant_b.as_deref()) {
        (Some(a), Some(b)) => state.coordinator.collect_feedback_for_pair(week, a, b).await?,
        (None, None) => state.coordinator.collect_feedback(week).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "participant_a and participant_b go together".to_string(),
            ));
        }
    };
    Ok(Json(json!({ "asked": asked })))
}
