//! HTTP surface over the dispatcher.
//!
//! - `POST /v1/jobs` submit a job
//! - `GET /v1/jobs/:id` fetch a job (owner or admin)
//! - `POST /v1/jobs/:id/cancel` cancel a job (admin)
//!
//! Every route expects `Authorization: Bearer <token>`, resolved through the
//! injected [`Authenticator`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{Authenticator, Identity};
use crate::error::DispatchError;
use crate::scheduler::{Dispatcher, Job, JobRequest, JobStatus};

#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher>,
    pub auth: Arc<dyn Authenticator>,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    id: Uuid,
    status: JobStatus,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: Uuid,
    pub owner: String,
    pub pattern: String,
    pub protocol: String,
    pub input_length: u32,
    pub status: JobStatus,
    pub submitted_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub duration_ms: Option<i64>,
    pub success: Option<bool>,
    pub input: Option<String>,
    pub digest: Option<String>,
    pub error: Option<String>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            owner: job.owner.clone(),
            pattern: job.pattern.clone(),
            protocol: job.protocol.to_string(),
            input_length: job.input_length,
            status: job.status,
            submitted_at: job.submitted_at.timestamp_millis(),
            started_at: job.started_at.map(|t| t.timestamp_millis()),
            finished_at: job.finished_at.map(|t| t.timestamp_millis()),
            duration_ms: job.duration_ms(),
            success: job.success,
            input: job.input.clone(),
            digest: job.digest.clone(),
            error: job.error.clone(),
        }
    }
}

pub enum ApiError {
    Unauthorized,
    InvalidId(String),
    InvalidBody(String),
    Internal(String),
    Dispatch(DispatchError),
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError::Dispatch(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let e = match self {
            ApiError::Unauthorized => {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
                    Json(json!({ "error": "Invalid or missing credentials" })),
                )
                    .into_response();
            }
            ApiError::InvalidId(raw) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Invalid job id '{raw}'"), "field": "id" })),
                )
                    .into_response();
            }
            ApiError::InvalidBody(reason) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": reason, "field": "body" })),
                )
                    .into_response();
            }
            ApiError::Internal(reason) => {
                tracing::error!(error = %reason, "Request task failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal error" })),
                )
                    .into_response();
            }
            ApiError::Dispatch(e) => e,
        };

        match &e {
            DispatchError::Validation(v) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": v.to_string(), "field": v.field() })),
            )
                .into_response(),
            DispatchError::QueueFull { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!({
                    "error": "Server busy. Try again later.",
                    "retryAfterSeconds": retry_after_secs,
                })),
            )
                .into_response(),
            DispatchError::JobNotFound(_) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
            }
            DispatchError::Forbidden(_) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": "Forbidden" }))).into_response()
            }
            DispatchError::AlreadyTerminal { .. } => {
                (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() }))).into_response()
            }
            DispatchError::Store(inner) => {
                tracing::error!(error = %inner, "Store failure while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal error" })),
                )
                    .into_response()
            }
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/jobs", post(submit_job_handler))
        .route("/v1/jobs/:id", get(get_job_handler))
        .route("/v1/jobs/:id/cancel", post(cancel_job_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| state.auth.authenticate(token.trim()))
        .ok_or(ApiError::Unauthorized)
}

/// Run a dispatcher call on the blocking pool; store access is synchronous.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::InvalidId(raw.to_string()))
}

async fn submit_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&state, &headers)?;
    let Json(request) = body.map_err(|e| ApiError::InvalidBody(e.body_text()))?;

    let dispatcher = state.dispatcher.clone();
    let job = blocking(move || dispatcher.submit(&identity, &request)).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            id: job.id,
            status: job.status,
        }),
    ))
}

async fn get_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let identity = authenticate(&state, &headers)?;
    let id = parse_id(&id)?;
    let dispatcher = state.dispatcher.clone();
    let job = blocking(move || dispatcher.get_job(&id, &identity)).await?;
    Ok(Json(JobView::from(&job)))
}

async fn cancel_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let identity = authenticate(&state, &headers)?;
    let id = parse_id(&id)?;
    let dispatcher = state.dispatcher.clone();
    let job = blocking(move || dispatcher.cancel(&id, &identity)).await?;
    Ok(Json(JobView::from(&job)))
}
