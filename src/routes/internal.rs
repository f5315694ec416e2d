use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifacts::MAX_ARTIFACT_BYTES;
use crate::auth::InternalAuth;
use crate::extractors::{JsonBody, QueryParams};
use crate::response::{created, ok, AppError};
use crate::services::wrapped::artifact_url;
use crate::state::AppState;
use crate::store::operations::users::User;
use crate::wrapped::types::{window_duration, AggregateStats, UsageEvent};

/// Upper bound on events accepted per ingest call.
const MAX_INGEST_BATCH: usize = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", post(upsert_user))
        .route("/users/:user_id/stats", get(compute_user_stats))
        .route("/active-users", get(list_active_users))
        .route("/events", post(ingest_events))
        .route(
            "/artifacts",
            post(upload_artifact).layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES)),
        )
        .route("/wrapped", post(create_or_replace))
        .route("/wrapped/sweep", post(sweep))
        .route("/wrapped/generate", post(generate))
        .route("/wrapped/:user_id/:date", delete(delete_snapshot))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertUserRequest {
    id: String,
    display_name: Option<String>,
}

async fn upsert_user(
    _internal: InternalAuth,
    State(state): State<AppState>,
    JsonBody(req): JsonBody<UpsertUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let existing = state.store().get_user_by_id(&req.id)?;
    let user = User {
        display_name: req
            .display_name
            .or_else(|| existing.as_ref().map(|u| u.display_name.clone()))
            .unwrap_or_else(|| req.id.clone()),
        created_at: existing.map(|u| u.created_at).unwrap_or_else(Utc::now),
        id: req.id,
    };
    state.store().upsert_user(&user)?;
    Ok(created(user))
}

async fn compute_user_stats(
    _internal: InternalAuth,
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let service = state.wrapped();
    let stats = service.compute_window_stats(&user_id, service.now())?;
    Ok(ok(stats))
}

#[derive(Debug, Deserialize)]
struct ActiveUsersQuery {
    /// Epoch milliseconds; defaults to one window before now.
    cutoff: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveUsersResponse {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    cutoff: DateTime<Utc>,
    users: Vec<String>,
}

async fn list_active_users(
    _internal: InternalAuth,
    QueryParams(q): QueryParams<ActiveUsersQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let service = state.wrapped();
    let cutoff = match q.cutoff {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| AppError::bad_request("INVALID_CUTOFF", "cutoff out of range"))?,
        None => service.now() - window_duration(),
    };
    let mut users: Vec<String> = service.active_users(cutoff)?.into_iter().collect();
    users.sort();
    Ok(ok(ActiveUsersResponse { cutoff, users }))
}

#[derive(Debug, Deserialize)]
struct IngestEventsRequest {
    events: Vec<UsageEvent>,
}

#[derive(Debug, Serialize)]
struct IngestEventsResponse {
    recorded: usize,
}

async fn ingest_events(
    _internal: InternalAuth,
    State(state): State<AppState>,
    JsonBody(req): JsonBody<IngestEventsRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.events.len() > MAX_INGEST_BATCH {
        return Err(AppError::payload_too_large(&format!(
            "at most {MAX_INGEST_BATCH} events per request"
        )));
    }
    for event in &req.events {
        state.store().record_usage_event(event)?;
    }
    tracing::debug!(count = req.events.len(), "Ingested usage events");
    Ok(created(IngestEventsResponse {
        recorded: req.events.len(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadArtifactResponse {
    artifact_ref: String,
    url: String,
    content_type: String,
    sha256: String,
    size: usize,
}

async fn upload_artifact(
    _internal: InternalAuth,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let meta = state.wrapped().artifacts().put(&body, content_type)?;
    Ok(created(UploadArtifactResponse {
        url: artifact_url(&meta.artifact_ref),
        artifact_ref: meta.artifact_ref,
        content_type: meta.content_type,
        sha256: meta.sha256,
        size: meta.size,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrReplaceRequest {
    user_id: String,
    /// Calendar date in the wrapped zone; defaults to today.
    date: Option<String>,
    design_index: i64,
    artifact_ref: Option<String>,
    /// Precomputed stats; recomputed from the user's window when absent.
    stats: Option<AggregateStats>,
}

async fn create_or_replace(
    _internal: InternalAuth,
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreateOrReplaceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let service = state.wrapped();
    let now = service.now();

    let design_index = u32::try_from(req.design_index).map_err(|_| {
        AppError::bad_request("VALIDATION_ERROR", "designIndex must be a non-negative integer")
    })?;
    let date = req
        .date
        .unwrap_or_else(|| service.clock().calendar_date(now));
    let stats = match req.stats {
        Some(stats) => stats,
        None => service.compute_window_stats(&req.user_id, now)?,
    };

    let snapshot = service.create_or_replace(
        &req.user_id,
        &date,
        design_index,
        req.artifact_ref.filter(|r| !r.is_empty()),
        stats,
        now,
    )?;
    Ok(ok(snapshot))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn delete_snapshot(
    _internal: InternalAuth,
    Path((user_id, date)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = state.wrapped().delete_snapshot(&user_id, &date)?;
    Ok(ok(DeleteResponse { deleted }))
}

#[derive(Debug, Serialize)]
struct SweepResponse {
    reclaimed: usize,
}

async fn sweep(
    _internal: InternalAuth,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let service = state.wrapped();
    let reclaimed = service.sweep_expired(service.now())?;
    Ok(ok(SweepResponse { reclaimed }))
}

async fn generate(
    _internal: InternalAuth,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let service = state.wrapped();
    let report = service.generate_all(service.now()).await?;
    Ok(ok(report))
}
