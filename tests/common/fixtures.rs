use axum::http::Method;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::app::TestApp;
use super::auth::internal;
use super::http::{request, response_json};

pub fn event(id: &str, user_id: &str, model: Option<&str>, tokens: u64, at: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "userId": user_id,
        "createdAt": at.to_rfc3339(),
        "promptTokens": tokens / 2,
        "completionTokens": tokens - tokens / 2,
        "totalTokens": tokens,
        "cost": tokens as f64 / 1000.0,
        "messageCount": 2,
        "model": model,
    })
}

pub async fn create_user(app: &TestApp, user_id: &str) {
    let resp = request(
        &app.app,
        Method::POST,
        "/api/internal/users",
        Some(json!({ "id": user_id, "displayName": format!("User {user_id}") })),
        &internal(app),
    )
    .await;
    let (status, _, body) = response_json(resp).await;
    assert!(status.is_success(), "create user failed: {body}");
}

pub async fn ingest(app: &TestApp, events: Vec<Value>) {
    let resp = request(
        &app.app,
        Method::POST,
        "/api/internal/events",
        Some(json!({ "events": events })),
        &internal(app),
    )
    .await;
    let (status, _, body) = response_json(resp).await;
    assert!(status.is_success(), "ingest failed: {body}");
}
