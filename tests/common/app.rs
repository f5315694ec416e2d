use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio::sync::broadcast;

use wrapped_backend::artifacts::SledArtifactStore;
use wrapped_backend::clock::{FixedTimeSource, SystemTimeSource, TimeSource};
use wrapped_backend::config::{Config, WorkerConfig, WrappedConfig};
use wrapped_backend::routes::build_router;
use wrapped_backend::state::AppState;
use wrapped_backend::store::Store;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub config: Config,
    _temp_dir: TempDir,
}

fn test_config(sled_path: String) -> Config {
    // built directly; set_var would race across parallel tests
    Config {
        host: std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
        port: 3000,
        log_level: "info".to_string(),
        enable_file_logs: false,
        log_dir: "./logs".to_string(),
        sled_path,
        jwt_secret: format!("integration-test-jwt-secret-{}", uuid::Uuid::new_v4()),
        internal_api_token: format!("integration-test-internal-{}", uuid::Uuid::new_v4()),
        cors_origin: "http://localhost:5173".to_string(),
        worker: WorkerConfig {
            is_leader: false,
            ..WorkerConfig::default()
        },
        wrapped: WrappedConfig::default(),
    }
}

async fn spawn_with_time(time: Arc<dyn TimeSource>) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let sled_path = temp_dir.path().join("wrapped-test.sled");
    let config = test_config(sled_path.to_string_lossy().to_string());

    let store = Arc::new(Store::open(&config.sled_path).expect("open store"));
    store.run_migrations().expect("run migrations");

    let artifacts = Arc::new(SledArtifactStore::from_store(&store));
    let (shutdown_tx, _) = broadcast::channel::<()>(8);
    let state = AppState::with_parts(store, artifacts, time, &config, shutdown_tx);

    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        config,
        _temp_dir: temp_dir,
    }
}

pub async fn spawn_test_app() -> TestApp {
    spawn_with_time(Arc::new(SystemTimeSource)).await
}

/// App whose clock is pinned to `now`.
pub async fn spawn_test_app_at(now: DateTime<Utc>) -> TestApp {
    spawn_with_time(Arc::new(FixedTimeSource(now))).await
}
