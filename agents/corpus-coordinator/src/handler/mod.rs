//! HTTP surface
//!
//! Four JSON endpoints over the coordinator: `/health`, `/dashboard`,
//! `/next-instruction` (GET or POST), and `/submit-case`. Request-level
//! failures map to structured `{kind, message}` bodies and never crash the
//! server; submission validation runs outside the coordinator lock.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::error;

use crate::contracts::{
    CoverageSnapshot, HealthSnapshot, NextInstructionResponse, SubmitResponse,
};
use crate::coordinator::Coordinator;
use crate::error::{CoordinatorError, RejectionKind};

/// Shared application state; the mutex is the single-writer section
#[derive(Clone)]
pub struct AppState {
    core: Arc<Mutex<Coordinator>>,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        AppState {
            core: Arc::new(Mutex::new(coordinator)),
        }
    }
}

/// Error body served for every failed request
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    /// Correlates the failure with the server log line
    pub request_id: String,
}

/// Response-side wrapper over `CoordinatorError`
pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CoordinatorError::Rejection { kind, .. } => {
                (StatusCode::BAD_REQUEST, kind.as_str().to_string())
            }
            CoordinatorError::GenerationExhausted { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "generation_unavailable".to_string(),
            ),
            CoordinatorError::Codec(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "codec_error".to_string())
            }
            _ => {
                error!(error = %self.0, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal".to_string())
            }
        };
        let mut message = self.0.to_string();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            message.push_str("; retry the request");
        }
        let body = ErrorBody {
            kind,
            message,
            request_id: uuid::Uuid::new_v4().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the router over a bootstrapped coordinator
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dashboard", get(dashboard))
        .route("/next-instruction", get(next_instruction_get).post(next_instruction_post))
        .route("/submit-case", post(submit_case))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            kind: "not_found".to_string(),
            message: "unknown route".to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }),
    )
        .into_response()
}

async fn health(State(state): State<AppState>) -> Json<HealthSnapshot> {
    Json(state.core.lock().await.health())
}

async fn dashboard(State(state): State<AppState>) -> Json<CoverageSnapshot> {
    Json(state.core.lock().await.coverage())
}

/// Parameters accepted by `next-instruction` in both query and body form
#[derive(Debug, Default, Clone, Deserialize)]
pub struct NextInstructionParams {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

async fn next_instruction_get(
    State(state): State<AppState>,
    Query(params): Query<NextInstructionParams>,
) -> Result<Json<NextInstructionResponse>, ApiError> {
    next_instruction(state, params).await
}

async fn next_instruction_post(
    State(state): State<AppState>,
    body: Option<Json<NextInstructionParams>>,
) -> Result<Json<NextInstructionResponse>, ApiError> {
    let params = body.map(|Json(params)| params).unwrap_or_default();
    next_instruction(state, params).await
}

async fn next_instruction(
    state: AppState,
    params: NextInstructionParams,
) -> Result<Json<NextInstructionResponse>, ApiError> {
    let agent_id = params
        .agent_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let topic = params
        .topic
        .map(|topic| topic.trim().to_string())
        .filter(|topic| !topic.is_empty());
    let mut core = state.core.lock().await;
    let response = core.next_instruction(agent_id, topic).await?;
    Ok(Json(response))
}

/// Body of `submit-case`; the target fields exist only to be rejected
#[derive(Debug, Deserialize)]
pub struct SubmitCaseRequest {
    pub instruction_id: String,
    #[serde(default)]
    pub case_text: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub target_toon: Option<Value>,
    #[serde(default)]
    pub target_json: Option<Value>,
}

async fn submit_case(
    State(state): State<AppState>,
    Json(request): Json<SubmitCaseRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    if request.target_json.is_some() {
        return Err(CoordinatorError::rejection(
            RejectionKind::LegacyTarget,
            "target_json is a legacy field; submit only instruction_id and case_text",
        )
        .into());
    }
    if request.target_toon.is_some() {
        return Err(CoordinatorError::rejection(
            RejectionKind::TargetProvided,
            "the server target is the source of truth; submit only instruction_id and case_text",
        )
        .into());
    }
    let instruction_id = request.instruction_id.trim().to_string();
    if instruction_id.is_empty() {
        return Err(CoordinatorError::rejection(
            RejectionKind::InvalidRequest,
            "instruction_id is required",
        )
        .into());
    }
    let agent_id = request
        .agent_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    // Stage under the lock, validate outside it, commit under it again.
    let staged = {
        let core = state.core.lock().await;
        core.stage_submission(&instruction_id)?
    };
    let (case_text, target_toon, checks) = staged.validate(&request.case_text).await?;
    let mut core = state.core.lock().await;
    let response = core.commit_submission(&staged, agent_id, case_text, target_toon, checks)?;
    Ok(Json(response))
}
