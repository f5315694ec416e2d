pub mod keys;
pub mod migrate;
pub mod operations;
pub mod trees;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::TransactionError;
use sled::Db;
use thiserror::Error;

#[derive(Debug)]
pub struct Store {
    db: Db,
    pub users: sled::Tree,
    pub usage_events: sled::Tree,
    pub wrapped_snapshots: sled::Tree,
    pub artifacts: sled::Tree,
    pub config_versions: sled::Tree,
    // Secondary index trees
    pub usage_events_by_time: sled::Tree,
    pub wrapped_by_expiry: sled::Tree,
    pub artifact_owners: sled::Tree,
    pub usage_event_ids: sled::Tree,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: entity={entity}, key={key}")]
    NotFound { entity: String, key: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("migration error at version {version}: {message}")]
    Migration { version: u32, message: String },
}

impl Store {
    pub fn open(sled_path: &str) -> Result<Self, StoreError> {
        let db = sled::open(sled_path)?;
        let users = db.open_tree(trees::USERS)?;
        let usage_events = db.open_tree(trees::USAGE_EVENTS)?;
        let wrapped_snapshots = db.open_tree(trees::WRAPPED_SNAPSHOTS)?;
        let artifacts = db.open_tree(trees::ARTIFACTS)?;
        let config_versions = db.open_tree(trees::CONFIG_VERSIONS)?;
        let usage_events_by_time = db.open_tree(trees::USAGE_EVENTS_BY_TIME)?;
        let wrapped_by_expiry = db.open_tree(trees::WRAPPED_BY_EXPIRY)?;
        let artifact_owners = db.open_tree(trees::ARTIFACT_OWNERS)?;
        let usage_event_ids = db.open_tree(trees::USAGE_EVENT_IDS)?;

        Ok(Self {
            db,
            users,
            usage_events,
            wrapped_snapshots,
            artifacts,
            config_versions,
            usage_events_by_time,
            wrapped_by_expiry,
            artifact_owners,
            usage_event_ids,
        })
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        migrate::run(self)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn raw_db(&self) -> &Db {
        &self.db
    }

    pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    pub(crate) fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Flatten a multi-tree transaction error; aborts carry a `StoreError`.
pub(crate) fn map_tx_error(error: TransactionError<StoreError>) -> StoreError {
    match error {
        TransactionError::Abort(store_error) => store_error,
        TransactionError::Storage(storage_error) => StoreError::Sled(storage_error),
    }
}
