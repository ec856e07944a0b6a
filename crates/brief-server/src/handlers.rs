use axum::extract::{Path, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use brief_core::ids::{SessionId, UserId};
use brief_core::quota::RateLimitDecision;
use brief_engine::EngineError;

use crate::server::AppState;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_TIER: &str = "x-ratelimit-tier";

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub domain: String,
}

#[derive(Deserialize)]
pub struct AppendTurnRequest {
    pub role: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct OneShotBriefRequest {
    pub domain: String,
    pub conversation_history: serde_json::Value,
}

/// HTTP-facing wrapper over engine errors.
///
/// Expected outcomes (quota denial, validation, state conflicts) map to
/// specific statuses with their detail intact; storage and provider
/// internals collapse to generic 5xx bodies and go to the log instead.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            EngineError::QuotaExhausted(decision) => {
                let body = json!({
                    "error": "session quota exhausted",
                    "limit": decision.limit,
                    "remaining": decision.remaining,
                    "tier": decision.tier,
                    "retry_after_secs": decision.retry_after_secs,
                });
                let mut resp =
                    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                resp.headers_mut().extend(decision_headers(&decision));
                resp
            }
            e @ EngineError::Validation(_) => error_body(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
            e @ EngineError::SessionNotFound(_) => error_body(StatusCode::NOT_FOUND, &e.to_string()),
            e @ EngineError::InvalidTransition { .. } => error_body(StatusCode::CONFLICT, &e.to_string()),
            EngineError::Synthesis(e) if e.is_retryable() => {
                tracing::error!(error = %e, "synthesis failed upstream");
                error_body(StatusCode::BAD_GATEWAY, "brief synthesis failed, retry later")
            }
            e => {
                tracing::error!(error = %e, "internal error");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// The retry hint rides on every rate-limit response, allowed or denied:
// quota is cumulative, so the hint is a property of the policy, not of
// the individual outcome.
fn decision_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_LIMIT, header_value(decision.limit));
    headers.insert(HEADER_REMAINING, header_value(decision.remaining));
    if let Ok(tier) = HeaderValue::from_str(decision.tier.as_str()) {
        headers.insert(HEADER_TIER, tier);
    }
    headers.insert(RETRY_AFTER, header_value(decision.retry_after_secs as i64));
    headers
}

fn header_value(n: i64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

/// Advisory quota lookup; never consumes.
pub async fn get_limit(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let user_id = UserId::from_raw(user_id);
    let decision = state.service.check_rate_limit(&user_id);
    let headers = decision_headers(&decision);
    (StatusCode::OK, headers, Json(decision))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = UserId::from_raw(req.user_id);
    let snapshot = state.service.create_session(&user_id, &req.domain)?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::from_raw(id);
    let snapshot = state.service.get_session(&id)?;
    Ok(Json(snapshot))
}

pub async fn append_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AppendTurnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::from_raw(id);
    let snapshot = state.service.append_turn(&id, &req.role, &req.content)?;
    Ok(Json(snapshot))
}

pub async fn generate_brief(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = SessionId::from_raw(id);
    let snapshot = state.service.generate_brief(&id).await?;
    Ok(Json(snapshot))
}

/// Stateless one-shot synthesis from a caller-supplied history.
/// Not quota-gated; quota applies to session creation only.
pub async fn one_shot_brief(
    State(state): State<AppState>,
    Json(req): Json<OneShotBriefRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let synthesized = state
        .service
        .synthesizer()
        .synthesize_raw(&req.domain, &req.conversation_history)
        .await?;
    Ok(Json(synthesized))
}
