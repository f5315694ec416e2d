use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::artifacts::{ArtifactStore, SledArtifactStore};
use crate::clock::{Clock, SystemTimeSource, TimeSource};
use crate::config::Config;
use crate::services::wrapped::WrappedService;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
    wrapped: WrappedService,
    config: Arc<Config>,
    shutdown_tx: broadcast::Sender<()>,
    started_at: Instant,
}

impl AppState {
    /// Production wiring: sled-backed artifacts, Pacific clock, system time.
    pub fn new(store: Arc<Store>, config: &Config, shutdown_tx: broadcast::Sender<()>) -> Self {
        let artifacts = Arc::new(SledArtifactStore::from_store(&store));
        Self::with_parts(store, artifacts, Arc::new(SystemTimeSource), config, shutdown_tx)
    }

    pub fn with_parts(
        store: Arc<Store>,
        artifacts: Arc<dyn ArtifactStore>,
        time: Arc<dyn TimeSource>,
        config: &Config,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let wrapped = WrappedService::new(
            store.clone(),
            artifacts,
            Clock::pacific(),
            time,
            &config.worker,
            &config.wrapped,
        );
        Self {
            store,
            wrapped,
            config: Arc::new(config.clone()),
            shutdown_tx,
            started_at: Instant::now(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn wrapped(&self) -> &WrappedService {
        &self.wrapped
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shutdown_rx(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use crate::config::Config;
    use crate::store::Store;

    use super::*;

    #[tokio::test]
    async fn shutdown_receiver_can_clone() {
        let cfg = Config::from_env();
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(
            Store::open(tmp.path().join("state_shutdown.sled").to_str().unwrap()).unwrap(),
        );
        let (tx, _) = broadcast::channel(4);
        let state = AppState::new(store, &cfg, tx.clone());

        let mut rx1 = state.shutdown_rx();
        let mut rx2 = state.shutdown_rx();
        tx.send(()).unwrap();
        rx1.recv().await.unwrap();
        rx2.recv().await.unwrap();
    }

    #[tokio::test]
    async fn service_shares_the_store() {
        let cfg = Config::from_env();
        let tmp = tempfile::tempdir().expect("tempdir");
        let store =
            Arc::new(Store::open(tmp.path().join("state_store.sled").to_str().unwrap()).unwrap());
        let (tx, _) = broadcast::channel(4);
        let state = AppState::new(store.clone(), &cfg, tx);

        assert!(Arc::ptr_eq(state.wrapped().store(), &store));
    }
}
