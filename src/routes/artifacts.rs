use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::response::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/:artifact_ref", get(get_artifact))
}

/// Serve artifact bytes. Refs are random and unguessable, so image tags can
/// load them without a bearer token.
async fn get_artifact(
    Path(artifact_ref): Path<String>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let artifact = state
        .wrapped()
        .artifacts()
        .get(&artifact_ref)?
        .ok_or_else(|| AppError::not_found("Artifact not found"))?;

    let etag = format!("\"{}\"", artifact.meta.sha256);
    let etag_value = HeaderValue::from_str(&etag)
        .map_err(|e| AppError::internal(&format!("invalid etag: {e}")))?;

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag));
    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag_value)]).into_response());
    }

    let content_type = HeaderValue::from_str(&artifact.meta.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::ETAG, etag_value),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("private, max-age=86400"),
            ),
        ],
        Body::from(artifact.bytes),
    )
        .into_response())
}
