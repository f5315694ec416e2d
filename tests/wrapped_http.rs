mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

use common::app::{spawn_test_app, spawn_test_app_at};
use common::auth::{bearer, internal};
use common::fixtures::{create_user, event, ingest};
use common::http::{assert_json_error, assert_status_ok_json, request, response_json};

#[tokio::test]
async fn it_read_api_requires_bearer_token() {
    let app = spawn_test_app().await;

    for path in ["/api/wrapped/today", "/api/wrapped/stats"] {
        let resp = request(&app.app, Method::GET, path, None, &[]).await;
        let (status, _, body) = response_json(resp).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
        assert_json_error(&body, "AUTH_UNAUTHORIZED");
        assert!(body["traceId"].is_string());
    }

    let resp = request(
        &app.app,
        Method::GET,
        "/api/wrapped/today",
        None,
        &[("authorization", "Bearer not-a-jwt".to_string())],
    )
    .await;
    let (status, _, _) = response_json(resp).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn it_countdown_is_public_and_pacific() {
    // 2024-03-09 10:00 PST, the day before spring-forward
    let now = Utc.with_ymd_and_hms(2024, 3, 9, 18, 0, 0).unwrap();
    let app = spawn_test_app_at(now).await;

    let resp = request(&app.app, Method::GET, "/api/wrapped/countdown", None, &[]).await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);

    assert_eq!(body["data"]["currentDate"], "2024-03-09");
    // 2024-03-10 09:30 PDT = 16:30 UTC
    let expected = Utc.with_ymd_and_hms(2024, 3, 10, 16, 30, 0).unwrap();
    assert_eq!(body["data"]["nextGenerationAt"], expected.timestamp_millis());
    assert_eq!(
        body["data"]["timeUntilNext"],
        (expected - now).num_milliseconds()
    );
}

#[tokio::test]
async fn it_stats_are_null_for_unknown_user() {
    let app = spawn_test_app().await;

    let resp = request(&app.app, Method::GET, "/api/wrapped/stats", None, &bearer(&app, "ghost")).await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn it_reads_are_null_for_subject_that_cannot_be_a_user() {
    let app = spawn_test_app().await;

    for path in ["/api/wrapped/today", "/api/wrapped/stats"] {
        let resp = request(&app.app, Method::GET, path, None, &bearer(&app, "google:42")).await;
        let (status, _, body) = response_json(resp).await;
        assert_status_ok_json(status, &body);
        assert!(body["data"].is_null(), "{path}");
    }
}

#[tokio::test]
async fn it_end_to_end_stats_and_snapshot() {
    // 2024-06-15 12:00 PDT
    let now = Utc.with_ymd_and_hms(2024, 6, 15, 19, 0, 0).unwrap();
    let app = spawn_test_app_at(now).await;
    create_user(&app, "u1").await;
    ingest(
        &app,
        vec![
            event("e1", "u1", Some("gpt-4"), 100, now - Duration::hours(3)),
            event("e2", "u1", Some("gpt-4"), 50, now - Duration::hours(2)),
            event("e3", "u1", Some("claude-3"), 200, now - Duration::hours(1)),
            event("old", "u1", Some("gpt-4"), 999, now - Duration::hours(25)),
        ],
    )
    .await;

    let resp = request(&app.app, Method::GET, "/api/wrapped/stats", None, &bearer(&app, "u1")).await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);
    let stats = &body["data"];
    assert_eq!(stats["totalTokens"], 350);
    assert_eq!(stats["sessionCount"], 3);
    assert_eq!(
        stats["topModels"],
        json!([{"model": "claude-3", "tokens": 200}, {"model": "gpt-4", "tokens": 150}])
    );
    assert_eq!(
        stats["topProviders"],
        json!([{"provider": "anthropic", "tokens": 200}, {"provider": "openai", "tokens": 150}])
    );

    // nothing generated yet
    let resp = request(&app.app, Method::GET, "/api/wrapped/today", None, &bearer(&app, "u1")).await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);
    assert!(body["data"].is_null());

    let resp = request(&app.app, Method::POST, "/api/internal/wrapped/generate", None, &internal(&app)).await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);
    assert_eq!(body["data"]["generated"], 1);

    let resp = request(&app.app, Method::GET, "/api/wrapped/today", None, &bearer(&app, "u1")).await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);
    let view = &body["data"];
    assert_eq!(view["date"], "2024-06-15");
    assert_eq!(view["stats"]["totalTokens"], 350);
    assert_eq!(view["timeUntilExpiry"], Duration::hours(24).num_milliseconds());
    assert_eq!(view["expiresAt"], (now + Duration::hours(24)).timestamp_millis());
    assert!(view["imageUrl"].is_null());
    assert!(view["designIndex"].as_u64().unwrap() < 10);
}

#[tokio::test]
async fn it_snapshot_image_is_served_with_etag() {
    let app = spawn_test_app().await;
    create_user(&app, "u1").await;

    let upload = common::http::request_raw(
        &app.app,
        Method::POST,
        "/api/internal/artifacts",
        b"\x89PNG-bytes".to_vec(),
        &[
            ("content-type", "image/png".to_string()),
            internal(&app)[0].clone(),
        ],
    )
    .await;
    let (status, _, body) = response_json(upload).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let artifact_ref = body["data"]["artifactRef"].as_str().unwrap().to_string();
    let sha256 = body["data"]["sha256"].as_str().unwrap().to_string();

    let today = app.state.wrapped().clock().calendar_date(Utc::now());
    let resp = request(
        &app.app,
        Method::POST,
        "/api/internal/wrapped",
        Some(json!({ "userId": "u1", "date": today, "designIndex": 4, "artifactRef": artifact_ref })),
        &internal(&app),
    )
    .await;
    let (status, _, body) = response_json(resp).await;
    assert_status_ok_json(status, &body);

    let resp = request(&app.app, Method::GET, "/api/wrapped/today", None, &bearer(&app, "u1")).await;
    let (_, _, body) = response_json(resp).await;
    let image_url = body["data"]["imageUrl"].as_str().unwrap().to_string();
    assert_eq!(image_url, format!("/api/artifacts/{artifact_ref}"));

    let resp = request(&app.app, Method::GET, &image_url, None, &[]).await;
    let (status, headers, bytes) = common::http::response_bytes(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "image/png");
    assert_eq!(headers["etag"].to_str().unwrap(), format!("\"{sha256}\""));
    assert_eq!(bytes, b"\x89PNG-bytes");

    let resp = request(
        &app.app,
        Method::GET,
        &image_url,
        None,
        &[("if-none-match", format!("\"{sha256}\""))],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

    let resp = request(&app.app, Method::GET, "/api/artifacts/missing", None, &[]).await;
    let (status, _, body) = response_json(resp).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_json_error(&body, "NOT_FOUND");
}
