use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::auth::AuthUser;
use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/today", get(get_today))
        .route("/stats", get(get_stats))
        .route("/countdown", get(get_countdown))
}

/// Today's snapshot for the caller; `data: null` until one is generated.
async fn get_today(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.wrapped().get_snapshot(&auth.user_id)?;
    Ok(ok(view))
}

async fn get_stats(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.wrapped().get_stats(&auth.user_id)?;
    Ok(ok(stats))
}

async fn get_countdown(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.wrapped().countdown()?))
}
