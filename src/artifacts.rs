//! Opaque binary artifacts (rendered wrapped images) attached to snapshots.
//!
//! The snapshot lifecycle only needs `put`/`release`; `get` backs the image
//! download route. Implementations must treat releasing an unknown ref as a
//! no-op so cleanup can be retried safely, and must keep an artifact that a
//! live snapshot still owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sled::transaction::TransactionError;
use sled::Transactional;
use thiserror::Error;

use crate::store::{keys, Store, StoreError};

/// Upper bound on a single artifact payload (rendered images are ~1 MiB).
pub const MAX_ARTIFACT_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("artifact metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("invalid artifact: {0}")]
    Invalid(String),
    #[error("corrupt artifact record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for ArtifactError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Sled(e) => ArtifactError::Storage(e),
            StoreError::Serialization(e) => ArtifactError::Metadata(e),
            other => ArtifactError::Invalid(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMeta {
    pub artifact_ref: String,
    pub content_type: String,
    pub sha256: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub bytes: Vec<u8>,
}

pub trait ArtifactStore: Send + Sync {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<ArtifactMeta, ArtifactError>;

    fn get(&self, artifact_ref: &str) -> Result<Option<Artifact>, ArtifactError>;

    fn release(&self, artifact_ref: &str) -> Result<(), ArtifactError>;
}

// Stored value: `[meta_len: u32 BE][meta json][payload]`.
fn encode_value(meta: &ArtifactMeta, bytes: &[u8]) -> Result<Vec<u8>, ArtifactError> {
    let meta_json = serde_json::to_vec(meta)?;
    let meta_len = u32::try_from(meta_json.len())
        .map_err(|_| ArtifactError::Invalid("metadata too large".to_string()))?;
    let mut value = Vec::with_capacity(4 + meta_json.len() + bytes.len());
    value.extend_from_slice(&meta_len.to_be_bytes());
    value.extend_from_slice(&meta_json);
    value.extend_from_slice(bytes);
    Ok(value)
}

fn decode_value(value: &[u8]) -> Result<Artifact, ArtifactError> {
    let corrupt = || ArtifactError::Corrupt(format!("{} bytes", value.len()));
    let (len_bytes, rest) = value.split_first_chunk::<4>().ok_or_else(corrupt)?;
    let meta_len = u32::from_be_bytes(*len_bytes) as usize;
    if rest.len() < meta_len {
        return Err(corrupt());
    }
    let (meta_json, payload) = rest.split_at(meta_len);
    Ok(Artifact {
        meta: serde_json::from_slice(meta_json)?,
        bytes: payload.to_vec(),
    })
}

/// Keeps artifacts in the `artifacts` tree of the main sled database. The
/// `artifact_owners` tree is written by snapshot transactions; release only
/// reads it.
#[derive(Debug, Clone)]
pub struct SledArtifactStore {
    tree: sled::Tree,
    owners: sled::Tree,
}

impl SledArtifactStore {
    pub fn new(tree: sled::Tree, owners: sled::Tree) -> Self {
        Self { tree, owners }
    }

    pub fn from_store(store: &Store) -> Self {
        Self::new(store.artifacts.clone(), store.artifact_owners.clone())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl ArtifactStore for SledArtifactStore {
    fn put(&self, bytes: &[u8], content_type: &str) -> Result<ArtifactMeta, ArtifactError> {
        if bytes.is_empty() {
            return Err(ArtifactError::Invalid("empty payload".to_string()));
        }
        if bytes.len() > MAX_ARTIFACT_BYTES {
            return Err(ArtifactError::Invalid(format!(
                "payload of {} bytes exceeds {MAX_ARTIFACT_BYTES}",
                bytes.len()
            )));
        }

        let meta = ArtifactMeta {
            artifact_ref: uuid::Uuid::new_v4().simple().to_string(),
            content_type: content_type.to_string(),
            sha256: hex::encode(Sha256::digest(bytes)),
            size: bytes.len(),
            created_at: Utc::now(),
        };
        let key = keys::artifact_key(&meta.artifact_ref)?;
        self.tree
            .insert(key.as_bytes(), encode_value(&meta, bytes)?)?;

        tracing::debug!(artifact_ref = %meta.artifact_ref, size = meta.size, "Stored artifact");
        Ok(meta)
    }

    fn get(&self, artifact_ref: &str) -> Result<Option<Artifact>, ArtifactError> {
        let key = keys::artifact_key(artifact_ref)?;
        let Some(raw) = self.tree.get(key.as_bytes())? else {
            return Ok(None);
        };
        decode_value(&raw).map(Some)
    }

    fn release(&self, artifact_ref: &str) -> Result<(), ArtifactError> {
        let key = keys::artifact_key(artifact_ref)?;
        let outcome = (&self.tree, &self.owners)
            .transaction(|(tx_artifacts, tx_owners)| {
                // reattached between the record commit and this release
                if tx_owners.get(key.as_bytes())?.is_some() {
                    return Ok(Release::StillOwned);
                }
                Ok(match tx_artifacts.remove(key.as_bytes())? {
                    Some(_) => Release::Removed,
                    None => Release::Unknown,
                })
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Storage(e) => ArtifactError::Storage(e),
                TransactionError::Abort(()) => {
                    ArtifactError::Invalid("release transaction aborted".to_string())
                }
            })?;

        match outcome {
            Release::Removed => {}
            Release::Unknown => tracing::debug!(artifact_ref, "Release of unknown artifact ignored"),
            Release::StillOwned => {
                tracing::debug!(artifact_ref, "Artifact still owned by a snapshot, kept")
            }
        }
        Ok(())
    }
}

enum Release {
    Removed,
    Unknown,
    StillOwned,
}
